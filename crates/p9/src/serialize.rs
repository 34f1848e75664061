//! Wire codec: binary (de)serialization of [`Msg`]/[`FCall`]/[`Dir`]/[`Qid`],
//! and [`pack_dir`], the bounded-size directory-record packer the directory
//! stream cursor (§4.5) drives.
//!
//! Layout follows 9P2000 with the 9P2000.u extension fields always present
//! on the wire; this crate only ever speaks the dotu dialect. `Dir.dotu`
//! being `None` just means the adapter didn't compute real values for it —
//! the extension fields still get encoded, as zero/empty.

use crate::fcall::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io;
use std::io::{Read, Result};
use std::mem;
use std::ops::{Shl, Shr};

fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Threads a `Result` through chained `<<`/`>>` field encode/decode calls.
pub struct SResult<T>(Result<T>);

/// A wrapper around a writer providing `<<` for chained field encoding.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A wrapper around a reader providing `>>` for chained field decoding.
#[derive(Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }
    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(mut self, rhs: &'a mut T) -> Self::Output {
        match self.decode() {
            Ok(v) => {
                *rhs = v;
                SResult(Ok(self))
            }
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        match self.0 {
            Ok(mut decoder) => match decoder.decode() {
                Ok(v) => {
                    *rhs = v;
                    SResult(Ok(decoder))
                }
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A type which can be serialized into binary.
pub trait Encodable {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

/// A type which can be deserialized from binary.
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

/// Expand `encode!(w, a, b, c)` into chained `<<` calls, returning total bytes written.
macro_rules! encode {
    ($w:expr, $($field:expr),+ $(,)?) => {{
        let enc = Encoder::new($w);
        match enc $(<< $field)+ {
            SResult(r) => r.map(|e| e.bytes_written()),
        }
    }};
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let bytes = (self.len() as u16).encode(w)?;
        w.write_all(self.as_bytes())?;
        Ok(bytes + self.len())
    }
}
impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let bytes = read_exact(r, len as usize)?;
        String::from_utf8(bytes).map_err(|e| invalid_data(&e.to_string()))
    }
}

impl Encodable for QidType {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.bits().encode(w)
    }
}
impl Decodable for QidType {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let bits: u8 = Decodable::decode(r)?;
        Ok(QidType::from_bits_truncate(bits))
    }
}

impl Encodable for Qid {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        encode!(w, &self.typ, &self.version, &self.path)
    }
}
impl Decodable for Qid {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let mut qid = Qid::default();
        match Decoder::new(r) >> &mut qid.typ >> &mut qid.version >> &mut qid.path {
            SResult(res) => res.and(Ok(qid)),
        }
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.0.len();
        let bytes = (size as u32).encode(w)?;
        w.write_all(&self.0)?;
        Ok(bytes + size)
    }
}
impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        for item in self {
            bytes += item.encode(w)?;
        }
        Ok(bytes)
    }
}
impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        (0..len).map(|_| Decodable::decode(r)).collect()
    }
}

/// Encode a [`Dir`]'s body (everything after the leading `statsize[2]`) to an
/// in-memory buffer so its length can be prefixed. `type[2] dev[4]` are wire
/// padding this crate doesn't otherwise model, present in both dialects. The
/// dotu extension fields (`extension[s] n_uid[4] n_gid[4] n_muid[4]`) are
/// written only when `dir.dotu` is `Some` — a base-dialect `Dir` (`dotu:
/// None`, as built by `ufsd`'s stat marshaller when running without `--dotu`)
/// gets the shorter base 9P2000 `Stat` layout instead.
fn encode_dir_body(dir: &Dir) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode!(
        &mut buf,
        &0u16,
        &0u32,
        &dir.qid,
        &dir.mode,
        &dir.atime,
        &dir.mtime,
        &dir.length,
        &dir.name,
        &dir.uid,
        &dir.gid,
        &dir.muid
    )?;
    if let Some(ref dotu) = dir.dotu {
        encode!(&mut buf, &dotu.ext, &dotu.uidnum, &dotu.gidnum, &dotu.muidnum)?;
    }
    Ok(buf)
}

impl Encodable for Dir {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let body = encode_dir_body(self)?;
        let bytes = (body.len() as u16).encode(w)?;
        w.write_all(&body)?;
        Ok(bytes + body.len())
    }
}
impl Decodable for Dir {
    /// `statsize[2]` self-delimits the record, so the dialect doesn't need to
    /// be threaded in separately: a base 9P2000 `Stat` runs out of bytes
    /// right after `muid[s]`, while a dotu one has the four extension fields
    /// still left in `cur`. Whichever the peer sent is whichever this
    /// produces.
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let size: u16 = Decodable::decode(r)?;
        let body = read_exact(r, size as usize)?;
        let mut cur = io::Cursor::new(body);

        let mut _typ = 0u16;
        let mut _dev = 0u32;
        let mut qid = Qid::default();
        let mut mode = 0u32;
        let mut atime = 0u32;
        let mut mtime = 0u32;
        let mut length = 0u64;
        let mut name = String::new();
        let mut uid = String::new();
        let mut gid = String::new();
        let mut muid = String::new();

        match Decoder::new(&mut cur)
            >> &mut _typ
            >> &mut _dev
            >> &mut qid
            >> &mut mode
            >> &mut atime
            >> &mut mtime
            >> &mut length
            >> &mut name
            >> &mut uid
            >> &mut gid
            >> &mut muid
        {
            SResult(r) => r.map(|_| ())?,
        }

        let dotu = if cur.position() < cur.get_ref().len() as u64 {
            let mut ext = String::new();
            let mut uidnum = NOUID;
            let mut gidnum = NOUID;
            let mut muidnum = NOUID;
            match Decoder::new(&mut cur)
                >> &mut ext
                >> &mut uidnum
                >> &mut gidnum
                >> &mut muidnum
            {
                SResult(r) => r.map(|_| ())?,
            }
            Some(DotuExt {
                ext,
                uidnum,
                gidnum,
                muidnum,
            })
        } else {
            None
        };

        Ok(Dir {
            qid,
            mode,
            atime,
            mtime,
            length,
            name,
            uid,
            gid,
            muid,
            dotu,
        })
    }
}

impl Encodable for MsgType {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (*self as u8).encode(w)
    }
}
impl Decodable for MsgType {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let byte: u8 = Decodable::decode(r)?;
        MsgType::from_u8(byte).ok_or_else(|| invalid_data("unknown message type"))
    }
}

/// Encode everything in an [`FCall`] after its leading `type[1]` byte.
/// Split out of [`Encodable for FCall`] so [`Msg`] can interleave `tag[2]`
/// between the type byte and the body, matching the wire order
/// `type[1] tag[2] body` instead of re-deriving the type byte twice.
fn encode_fcall_body<W: WriteBytesExt>(fcall: &FCall, w: &mut W) -> Result<usize> {
    Ok(match *fcall {
            FCall::Tversion { ref msize, ref version } => encode!(w, msize, version)?,
            FCall::Rversion { ref msize, ref version } => encode!(w, msize, version)?,
            FCall::Tauth {
                ref afid,
                ref uname,
                ref aname,
                ref n_uname,
            } => encode!(w, afid, uname, aname, n_uname)?,
            FCall::Rauth { ref aqid } => encode!(w, aqid)?,
            FCall::Rerror { ref ename, ref ecode } => encode!(w, ename, ecode)?,
            FCall::Tflush { ref oldtag } => encode!(w, oldtag)?,
            FCall::Rflush => 0,
            FCall::Tattach {
                ref fid,
                ref afid,
                ref uname,
                ref aname,
                ref n_uname,
            } => encode!(w, fid, afid, uname, aname, n_uname)?,
            FCall::Rattach { ref qid } => encode!(w, qid)?,
            FCall::Twalk {
                ref fid,
                ref newfid,
                ref wnames,
            } => encode!(w, fid, newfid, wnames)?,
            FCall::Rwalk { ref wqids } => encode!(w, wqids)?,
            FCall::Topen { ref fid, ref mode } => encode!(w, fid, mode)?,
            FCall::Ropen { ref qid, ref iounit } => encode!(w, qid, iounit)?,
            FCall::Tcreate {
                ref fid,
                ref name,
                ref perm,
                ref mode,
                ref ext,
            } => encode!(w, fid, name, perm, mode, ext)?,
            FCall::Rcreate { ref qid, ref iounit } => encode!(w, qid, iounit)?,
            FCall::Tread {
                ref fid,
                ref offset,
                ref count,
            } => encode!(w, fid, offset, count)?,
            FCall::Rread { ref data } => encode!(w, data)?,
            FCall::Twrite {
                ref fid,
                ref offset,
                ref data,
            } => encode!(w, fid, offset, data)?,
            FCall::Rwrite { ref count } => encode!(w, count)?,
            FCall::Tclunk { ref fid } => encode!(w, fid)?,
            FCall::Rclunk => 0,
            FCall::Tremove { ref fid } => encode!(w, fid)?,
            FCall::Rremove => 0,
            FCall::Tstat { ref fid } => encode!(w, fid)?,
            FCall::Rstat { ref stat } => encode!(w, stat)?,
            FCall::Twstat { ref fid, ref stat } => encode!(w, fid, stat)?,
        FCall::Rwstat => 0,
    })
}

impl Encodable for FCall {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let msg_type = MsgType::from(self);
        let bytes = msg_type.encode(w)?;
        Ok(bytes + encode_fcall_body(self, w)?)
    }
}

/// Decode an [`FCall`]'s fields given its already-read `type[1]` byte.
/// Split out of [`Decodable for FCall`] so [`Msg`] can read `tag[2]`
/// between the type byte and the body, matching the wire order
/// `type[1] tag[2] body` instead of re-reading the type byte twice.
fn decode_fcall_body<R: ReadBytesExt>(msg_type: MsgType, r: &mut R) -> Result<FCall> {
    Ok(match msg_type {
            MsgType::Tversion => FCall::Tversion {
                msize: Decodable::decode(r)?,
                version: Decodable::decode(r)?,
            },
            MsgType::Rversion => FCall::Rversion {
                msize: Decodable::decode(r)?,
                version: Decodable::decode(r)?,
            },
            MsgType::Tauth => FCall::Tauth {
                afid: Decodable::decode(r)?,
                uname: Decodable::decode(r)?,
                aname: Decodable::decode(r)?,
                n_uname: Decodable::decode(r)?,
            },
            MsgType::Rauth => FCall::Rauth {
                aqid: Decodable::decode(r)?,
            },
            MsgType::Rerror => FCall::Rerror {
                ename: Decodable::decode(r)?,
                ecode: Decodable::decode(r)?,
            },
            MsgType::Tflush => FCall::Tflush {
                oldtag: Decodable::decode(r)?,
            },
            MsgType::Rflush => FCall::Rflush,
            MsgType::Tattach => FCall::Tattach {
                fid: Decodable::decode(r)?,
                afid: Decodable::decode(r)?,
                uname: Decodable::decode(r)?,
                aname: Decodable::decode(r)?,
                n_uname: Decodable::decode(r)?,
            },
            MsgType::Rattach => FCall::Rattach {
                qid: Decodable::decode(r)?,
            },
            MsgType::Twalk => FCall::Twalk {
                fid: Decodable::decode(r)?,
                newfid: Decodable::decode(r)?,
                wnames: Decodable::decode(r)?,
            },
            MsgType::Rwalk => FCall::Rwalk {
                wqids: Decodable::decode(r)?,
            },
            MsgType::Topen => FCall::Topen {
                fid: Decodable::decode(r)?,
                mode: Decodable::decode(r)?,
            },
            MsgType::Ropen => FCall::Ropen {
                qid: Decodable::decode(r)?,
                iounit: Decodable::decode(r)?,
            },
            MsgType::Tcreate => FCall::Tcreate {
                fid: Decodable::decode(r)?,
                name: Decodable::decode(r)?,
                perm: Decodable::decode(r)?,
                mode: Decodable::decode(r)?,
                ext: Decodable::decode(r)?,
            },
            MsgType::Rcreate => FCall::Rcreate {
                qid: Decodable::decode(r)?,
                iounit: Decodable::decode(r)?,
            },
            MsgType::Tread => FCall::Tread {
                fid: Decodable::decode(r)?,
                offset: Decodable::decode(r)?,
                count: Decodable::decode(r)?,
            },
            MsgType::Rread => FCall::Rread {
                data: Decodable::decode(r)?,
            },
            MsgType::Twrite => FCall::Twrite {
                fid: Decodable::decode(r)?,
                offset: Decodable::decode(r)?,
                data: Decodable::decode(r)?,
            },
            MsgType::Rwrite => FCall::Rwrite {
                count: Decodable::decode(r)?,
            },
            MsgType::Tclunk => FCall::Tclunk {
                fid: Decodable::decode(r)?,
            },
            MsgType::Rclunk => FCall::Rclunk,
            MsgType::Tremove => FCall::Tremove {
                fid: Decodable::decode(r)?,
            },
            MsgType::Rremove => FCall::Rremove,
            MsgType::Tstat => FCall::Tstat {
                fid: Decodable::decode(r)?,
            },
            MsgType::Rstat => FCall::Rstat {
                stat: Decodable::decode(r)?,
            },
            MsgType::Twstat => FCall::Twstat {
                fid: Decodable::decode(r)?,
                stat: Decodable::decode(r)?,
            },
        MsgType::Rwstat => FCall::Rwstat,
    })
}

impl Decodable for FCall {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let msg_type: MsgType = Decodable::decode(r)?;
        decode_fcall_body(msg_type, r)
    }
}

/// `type[1] tag[2] body` — no length prefix. Framing (the `size[4]` the wire
/// format prepends to every message) is the caller's job: `srv::dispatch`
/// frames each message with `LengthDelimitedCodec` before `encode`/after
/// `decode` ever sees the bytes.
impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let msg_type = MsgType::from(&self.body);
        let mut bytes = msg_type.encode(w)?;
        bytes += self.tag.encode(w)?;
        bytes += encode_fcall_body(&self.body, w)?;
        Ok(bytes)
    }
}
impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let msg_type: MsgType = Decodable::decode(r)?;
        let tag: u16 = Decodable::decode(r)?;
        let body = decode_fcall_body(msg_type, r)?;
        Ok(Msg { tag, body })
    }
}

/// Read one [`Msg`] off the wire.
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Write one [`Msg`] to the wire.
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    msg.encode(w)
}

/// Append one [`Dir`] record to `buf`, bounded by `max_count` bytes total
/// (the directory-stream cursor's per-response budget, §4.5).
///
/// Returns the number of bytes appended, or `0` if the record would not fit
/// and nothing was written — the caller (the cursor) un-advances its index
/// on a `0` return and stops filling this response.
pub fn pack_dir(dir: &Dir, buf: &mut Vec<u8>, max_count: u32) -> Result<u32> {
    let mut tmp = Vec::new();
    let written = dir.encode(&mut tmp)? as u32;
    if buf.len() as u32 + written > max_count {
        return Ok(0);
    }
    buf.extend_from_slice(&tmp);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dir() -> Dir {
        Dir {
            qid: Qid {
                typ: QidType::FILE,
                version: 42,
                path: 7,
            },
            mode: 0o644,
            atime: 0,
            mtime: 1_690_000_000,
            length: 1024,
            name: "hello.txt".into(),
            uid: "1000".into(),
            gid: "1000".into(),
            muid: "none".into(),
            dotu: Some(DotuExt {
                ext: String::new(),
                uidnum: 1000,
                gidnum: 1000,
                muidnum: NOUID,
            }),
        }
    }

    #[test]
    fn dir_round_trips() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        dir.encode(&mut buf).unwrap();
        let mut cur = io::Cursor::new(buf);
        let decoded: Dir = Decodable::decode(&mut cur).unwrap();
        assert_eq!(decoded.name, dir.name);
        assert_eq!(decoded.qid, dir.qid);
        assert_eq!(decoded.dotu.unwrap().uidnum, 1000);
    }

    #[test]
    fn dir_round_trips_base_dialect() {
        let mut dir = sample_dir();
        dir.dotu = None;
        let mut buf = Vec::new();
        dir.encode(&mut buf).unwrap();
        let mut cur = io::Cursor::new(buf);
        let decoded: Dir = Decodable::decode(&mut cur).unwrap();
        assert_eq!(decoded.name, dir.name);
        assert_eq!(decoded.qid, dir.qid);
        assert!(decoded.dotu.is_none());
    }

    #[test]
    fn msg_round_trips() {
        let msg = Msg {
            tag: 5,
            body: FCall::Twalk {
                fid: 1,
                newfid: 2,
                wnames: vec!["a".into(), "b".into()],
            },
        };
        let mut buf = Vec::new();
        write_msg(&mut buf, &msg).unwrap();
        let mut cur = io::Cursor::new(buf);
        let decoded = read_msg(&mut cur).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn pack_dir_rejects_overflow() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        let n = pack_dir(&dir, &mut buf, 4).unwrap();
        assert_eq!(n, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn pack_dir_fills_until_full() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        let mut total = 0u32;
        loop {
            let n = pack_dir(&dir, &mut buf, 200).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert!(total > 0);
        assert!(buf.len() as u32 <= 200);
    }
}
