//! 9P protocol data types and constants.
//!
//! # Protocol
//! 9P2000 with the 9P2000.u ("dotu") Unix extension.

use std::fs;
use std::os::unix::fs::MetadataExt;

use bitflags::bitflags;
use enum_primitive::*;

/// 9P2000 version string
pub const P92000: &str = "9P2000";

/// 9P2000.u version string
pub const P92000U: &str = "9P2000.u";

/// The version string that comes with RVersion when the server does not understand
/// the client's version string
pub const VERSION_UNKNOWN: &str = "unknown";

/// Special tag which `TVersion`/`RVersion` must use as `tag`
pub const NOTAG: u16 = !0;

/// Special value which `TAttach` with no auth must use as `afid`
///
/// If the client does not wish to authenticate the connection, or knows that authentication is
/// not required, the afid field in the attach message should be set to `NOFID`
pub const NOFID: u32 = !0;

/// Special uid which `TAuth`/`TAttach` use as `n_uname` to indicate no uid is specified
pub const NONUNAME: u32 = !0;

/// Sentinel meaning "no user id specified" in dotu fields (`muidnum`, etc.)
pub const NOUID: u32 = !0;

/// "Don't touch this field" sentinel for 32-bit `Wstat` fields
pub const DONTTOUCH32: u32 = !0;

/// "Don't touch this field" sentinel for the 64-bit `Wstat` length field
pub const DONTTOUCH64: u64 = !0;

/// Ample room for `TRead`/`TWrite` header
///
/// size[4] Tread/Twrite[2] tag[2] fid[4] offset[8] count[4]
pub const IOHDRSZ: u32 = 24;

/// v9fs default port
pub const V9FS_PORT: u16 = 564;

/// Open-mode byte, `om`: low two bits select the access mode, remaining bits are flags.
pub mod om {
    /// Open for read
    pub const READ: u8 = 0;
    /// Write
    pub const WRITE: u8 = 1;
    /// Read and write
    pub const RDWR: u8 = 2;
    /// Execute, == read but check execute permission
    pub const EXEC: u8 = 3;
    /// Mask selecting the access-mode bits above
    pub const MODE_MASK: u8 = 0x03;
    /// Or'ed in (except for exec), truncate file first
    pub const TRUNC: u8 = 0x10;
    /// Or'ed in, close on exec
    pub const CEXEC: u8 = 0x20;
    /// Or'ed in, remove on close
    pub const RCLOSE: u8 = 0x40;
}

bitflags! {
    /// Bits in `Qid.typ`
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
    pub struct QidType: u8 {
        #[doc = "Type bit for directories"]
        const DIR       = 0x80;
        #[doc = "Type bit for append only files"]
        const APPEND    = 0x40;
        #[doc = "Type bit for exclusive use files"]
        const EXCL      = 0x20;
        #[doc = "Type bit for mounted channel"]
        const MOUNT     = 0x10;
        #[doc = "Type bit for authentication file"]
        const AUTH      = 0x08;
        #[doc = "Type bit for not-backed-up file"]
        const TMP       = 0x04;
        #[doc = "Type bit for symbolic links (9P2000.u)"]
        const SYMLINK   = 0x02;
        #[doc = "Type bit for hard-link (9P2000.u, unused on the wire)"]
        const LINK      = 0x01;
        #[doc = "Plain file"]
        const FILE      = 0x00;
    }
}

bitflags! {
    /// Bits in `Dir.mode` (a.k.a. `Stat.mode`)
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DirMode: u32 {
        #[doc = "Mode bit for directories"]
        const DIR        = 0x8000_0000;
        #[doc = "Mode bit for append only files"]
        const APPEND     = 0x4000_0000;
        #[doc = "Mode bit for exclusive use files"]
        const EXCL       = 0x2000_0000;
        #[doc = "Mode bit for mounted channel"]
        const MOUNT      = 0x1000_0000;
        #[doc = "Mode bit for authentication file"]
        const AUTH       = 0x0800_0000;
        #[doc = "Mode bit for non-backed-up files"]
        const TMP        = 0x0400_0000;
        #[doc = "Mode bit for symbolic links (9P2000.u)"]
        const SYMLINK    = 0x0200_0000;
        #[doc = "Mode bit for hard links (9P2000.u, DMLINK in Tcreate)"]
        const LINK       = 0x0100_0000;
        #[doc = "Mode bit for devices (9P2000.u)"]
        const DEVICE     = 0x0080_0000;
        #[doc = "Mode bit for named pipes (9P2000.u)"]
        const NAMEDPIPE  = 0x0020_0000;
        #[doc = "Mode bit for sockets (9P2000.u)"]
        const SOCKET     = 0x0010_0000;
        #[doc = "Mode bit for setuid (9P2000.u)"]
        const SETUID     = 0x0008_0000;
        #[doc = "Mode bit for setgid (9P2000.u)"]
        const SETGID     = 0x0004_0000;
        #[doc = "Owner read permission"]
        const READ       = 0x4;
        #[doc = "Owner write permission"]
        const WRITE      = 0x2;
        #[doc = "Owner execute permission"]
        const EXEC       = 0x1;
    }
}

impl From<fs::FileType> for QidType {
    fn from(typ: fs::FileType) -> Self {
        From::from(&typ)
    }
}

impl<'a> From<&'a fs::FileType> for QidType {
    fn from(typ: &'a fs::FileType) -> Self {
        let mut qid_type = QidType::FILE;
        if typ.is_dir() {
            qid_type.insert(QidType::DIR);
        }
        if typ.is_symlink() {
            qid_type.insert(QidType::SYMLINK);
        }
        qid_type
    }
}

/// Server's unique identification for the file being accessed: `(type, version, path)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Qid {
    /// Specify whether the file is a directory, symlink, etc.
    pub typ: QidType,
    /// Version number for a file; here, the mtime in milliseconds (§4.1).
    pub version: u32,
    /// An integer which is unique among all files in the hierarchy (host inode number).
    pub path: u64,
}

/// The 9P2000.u extension fields carried on a [`Dir`] when the connection
/// negotiated the dotu dialect.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DotuExt {
    /// Symlink target, device `"b/c MAJOR MINOR"` string, or empty.
    pub ext: String,
    /// Numeric uid of the owner.
    pub uidnum: u32,
    /// Numeric gid of the owning group.
    pub gidnum: u32,
    /// Numeric uid of the last modifier; always [`NOUID`] (unknown on host filesystems).
    pub muidnum: u32,
}

/// Marshalled metadata record for one filesystem object (a.k.a. `Stat`/`Dir`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dir {
    /// Unique id from the server.
    pub qid: Qid,
    /// Permission and type bits, see [`DirMode`].
    pub mode: u32,
    /// Last access time, seconds since epoch. Always 0 (§4.2 — atime is not read).
    pub atime: u32,
    /// Last write time, seconds since epoch.
    pub mtime: u32,
    /// File length in bytes (0 for directories).
    pub length: u64,
    /// Last element of the path.
    pub name: String,
    /// Owner: numeric uid as a decimal string, or the resolved username.
    pub uid: String,
    /// Group: numeric gid as a decimal string, or the resolved group name.
    pub gid: String,
    /// Last modifier. Unknown on host filesystems, always `"none"`.
    pub muid: String,
    /// Present iff the dotu dialect is in effect on this connection.
    pub dotu: Option<DotuExt>,
}

/// Data type used in `Rread` and `Twrite`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(pub Vec<u8>);

enum_from_primitive! {
    /// Message type, 9P operations.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum MsgType {
        Tversion =  100,
        Rversion,
        Tauth =     102,
        Rauth,
        Rerror =    107,
        Tflush =    108,
        Rflush,
        Tattach =   104,
        Rattach,
        Twalk =     110,
        Rwalk,
        Topen =     112,
        Ropen,
        Tcreate =   114,
        Rcreate,
        Tread =     116,
        Rread,
        Twrite =    118,
        Rwrite,
        Tclunk =    120,
        Rclunk,
        Tremove =   122,
        Rremove,
        Tstat =     124,
        Rstat,
        Twstat =    126,
        Rwstat,
    }
}

impl MsgType {
    /// If the message type is T-message
    pub fn is_t(&self) -> bool {
        !self.is_r()
    }

    /// If the message type is R-message
    pub fn is_r(&self) -> bool {
        use MsgType::*;
        matches!(
            *self,
            Rversion
                | Rauth
                | Rerror
                | Rflush
                | Rattach
                | Rwalk
                | Ropen
                | Rcreate
                | Rread
                | Rwrite
                | Rclunk
                | Rremove
                | Rstat
                | Rwstat
        )
    }
}

impl<'a> From<&'a FCall> for MsgType {
    fn from(fcall: &'a FCall) -> MsgType {
        match *fcall {
            FCall::Tversion { .. } => MsgType::Tversion,
            FCall::Rversion { .. } => MsgType::Rversion,
            FCall::Tauth { .. } => MsgType::Tauth,
            FCall::Rauth { .. } => MsgType::Rauth,
            FCall::Rerror { .. } => MsgType::Rerror,
            FCall::Tflush { .. } => MsgType::Tflush,
            FCall::Rflush => MsgType::Rflush,
            FCall::Tattach { .. } => MsgType::Tattach,
            FCall::Rattach { .. } => MsgType::Rattach,
            FCall::Twalk { .. } => MsgType::Twalk,
            FCall::Rwalk { .. } => MsgType::Rwalk,
            FCall::Topen { .. } => MsgType::Topen,
            FCall::Ropen { .. } => MsgType::Ropen,
            FCall::Tcreate { .. } => MsgType::Tcreate,
            FCall::Rcreate { .. } => MsgType::Rcreate,
            FCall::Tread { .. } => MsgType::Tread,
            FCall::Rread { .. } => MsgType::Rread,
            FCall::Twrite { .. } => MsgType::Twrite,
            FCall::Rwrite { .. } => MsgType::Rwrite,
            FCall::Tclunk { .. } => MsgType::Tclunk,
            FCall::Rclunk => MsgType::Rclunk,
            FCall::Tremove { .. } => MsgType::Tremove,
            FCall::Rremove => MsgType::Rremove,
            FCall::Tstat { .. } => MsgType::Tstat,
            FCall::Rstat { .. } => MsgType::Rstat,
            FCall::Twstat { .. } => MsgType::Twstat,
            FCall::Rwstat => MsgType::Rwstat,
        }
    }
}

/// A data type encapsulating the various 9P messages.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FCall {
    Tversion {
        msize: u32,
        version: String,
    },
    Rversion {
        msize: u32,
        version: String,
    },
    /// 9P2000.u extends `Tauth`/`Tattach` with a numeric `n_uname`.
    Tauth {
        afid: u32,
        uname: String,
        aname: String,
        n_uname: u32,
    },
    Rauth {
        aqid: Qid,
    },
    Rerror {
        ename: String,
        /// 9P2000.u extension: the host errno, 0 if unavailable.
        ecode: u32,
    },
    Tflush {
        oldtag: u16,
    },
    Rflush,
    Tattach {
        fid: u32,
        afid: u32,
        uname: String,
        aname: String,
        n_uname: u32,
    },
    Rattach {
        qid: Qid,
    },
    Twalk {
        fid: u32,
        newfid: u32,
        wnames: Vec<String>,
    },
    Rwalk {
        wqids: Vec<Qid>,
    },
    Topen {
        fid: u32,
        mode: u8,
    },
    Ropen {
        qid: Qid,
        iounit: u32,
    },
    /// `ext` carries the 9P2000.u create extension argument (symlink target,
    /// device spec, or hardlink source fid as a decimal string).
    Tcreate {
        fid: u32,
        name: String,
        perm: u32,
        mode: u8,
        ext: String,
    },
    Rcreate {
        qid: Qid,
        iounit: u32,
    },
    Tread {
        fid: u32,
        offset: u64,
        count: u32,
    },
    Rread {
        data: Data,
    },
    Twrite {
        fid: u32,
        offset: u64,
        data: Data,
    },
    Rwrite {
        count: u32,
    },
    Tclunk {
        fid: u32,
    },
    Rclunk,
    Tremove {
        fid: u32,
    },
    Rremove,
    Tstat {
        fid: u32,
    },
    Rstat {
        stat: Dir,
    },
    Twstat {
        fid: u32,
        stat: Dir,
    },
    Rwstat,
}

impl FCall {
    /// Get the fids which self contains.
    pub fn fids(&self) -> Vec<u32> {
        match *self {
            FCall::Tattach { afid, .. } if afid != NOFID => vec![afid],
            FCall::Tattach { .. } => Vec::new(),
            FCall::Twalk { fid, .. } => vec![fid],
            FCall::Topen { fid, .. } => vec![fid],
            FCall::Tcreate { fid, .. } => vec![fid],
            FCall::Tread { fid, .. } => vec![fid],
            FCall::Twrite { fid, .. } => vec![fid],
            FCall::Tclunk { fid } => vec![fid],
            FCall::Tremove { fid } => vec![fid],
            FCall::Tstat { fid } => vec![fid],
            FCall::Twstat { fid, .. } => vec![fid],
            _ => Vec::new(),
        }
    }

    /// Get the newfid which self contains, if any.
    pub fn newfid(&self) -> Option<u32> {
        match *self {
            FCall::Tauth { afid, .. } => Some(afid),
            FCall::Tattach { fid, .. } => Some(fid),
            FCall::Twalk { newfid, .. } => Some(newfid),
            _ => None,
        }
    }
}

/// Filesystem information corresponding to `struct stat` on the host, reduced
/// to the fields the mode translator and stat marshaller need.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub ino: u64,
    pub rdev: u64,
    pub size: u64,
    pub mtime_nsec: i128,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl From<fs::Metadata> for HostStat {
    fn from(attr: fs::Metadata) -> Self {
        From::from(&attr)
    }
}

impl<'a> From<&'a fs::Metadata> for HostStat {
    fn from(attr: &'a fs::Metadata) -> Self {
        HostStat {
            mode: attr.mode(),
            uid: attr.uid(),
            gid: attr.gid(),
            ino: attr.ino(),
            rdev: attr.rdev(),
            size: attr.size(),
            mtime_nsec: attr.mtime() as i128 * 1_000_000_000 + attr.mtime_nsec() as i128,
            is_dir: attr.file_type().is_dir(),
            is_symlink: attr.file_type().is_symlink(),
        }
    }
}

/// Envelope for 9P messages.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msg {
    /// Chosen and used by the client to identify the message.
    /// The reply to the message will have the same tag.
    pub tag: u16,
    /// Message body encapsulating the various 9P messages.
    pub body: FCall,
}
