//! Asynchronous server side 9P library.
//!
//! # Protocol
//! 9P2000 with the 9P2000.u extension.

use {
    crate::{
        error::{self, errno::*},
        fcall::*,
        io_err, serialize,
        utils::{self, Result},
    },
    async_trait::async_trait,
    bytes::buf::{Buf, BufMut},
    futures::sink::SinkExt,
    log::{error, info},
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{Arc, atomic::Ordering},
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, UnixListener},
        sync::{Mutex, RwLock},
    },
    tokio_stream::StreamExt,
    tokio_util::codec::length_delimited::LengthDelimitedCodec,
};

/// Represents a fid of clients holding associated `Filesystem::FId`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FId<T> {
    /// Raw client side fid.
    fid: u32,

    /// `Filesystem::FId` associated with this fid.
    /// Changing this value affects the continuous callbacks.
    pub aux: T,
}

impl<T> FId<T> {
    /// Get the raw fid.
    pub fn fid(&self) -> u32 {
        self.fid
    }
}

/// Filesystem server trait for implementing 9P2000/9P2000.u servers.
///
/// Implementors represent an error condition by returning an `Err`; otherwise
/// they return the appropriate `FCall` response. Every method defaults to
/// `EOPNOTSUPP`, so an implementation only needs to override the operations
/// it actually supports.
///
/// # Example
/// ```no_run
/// use std::path::PathBuf;
///
/// use p9::{error, srv::{Filesystem, FId}, fcall::FCall};
/// use async_trait::async_trait;
///
/// struct MyFs;
/// type Result<T> = ::std::result::Result<T, error::Error>;
///
/// #[async_trait]
/// impl Filesystem for MyFs {
///     type FId = PathBuf;
///
///     async fn rattach(
///         &self,
///         fid: &FId<Self::FId>,
///         afid: Option<&FId<Self::FId>>,
///         uname: &str,
///         aname: &str,
///         n_uname: u32,
///     ) -> Result<FCall> {
///         todo!("implementation")
///     }
/// }
/// ```
///
/// # FId Management
///
/// The `FId` type represents a file identifier that tracks open files. Each
/// fid can store custom state via the associated `FId` type. Fids are
/// created during `rattach` and `rwalk`, and must be cleaned up in `rclunk`.
#[async_trait]
pub trait Filesystem: Send {
    /// User defined fid type to be associated with a client's fid.
    ///
    /// This type stores per-fid state such as the current path, open file
    /// handle, directory-stream cursor, or any other metadata needed to
    /// service requests on this fid.
    type FId: Send + Sync + Default;

    /// Authenticate a user (9P2000.u).
    ///
    /// Returns `EOPNOTSUPP` by default — the common case for adapters that
    /// trust the transport and don't require a separate auth exchange.
    async fn rauth(
        &self,
        _afid: &FId<Self::FId>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Attach to the filesystem root.
    ///
    /// The first operation a client performs to obtain a usable fid. This is
    /// a core operation that must be implemented.
    async fn rattach(
        &self,
        _fid: &FId<Self::FId>,
        _afid: Option<&FId<Self::FId>>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Negotiate protocol version and message size.
    ///
    /// The default implementation accepts both the base `9P2000` dialect and
    /// its `9P2000.u` extension, echoing back whichever the client requested,
    /// and returns [`VERSION_UNKNOWN`] for anything else. A `Filesystem` that
    /// only speaks one dialect (as [`crate`]'s `ufsd` does, per its `--dotu`/
    /// `--no-dotu` flag) should override this to reject the other.
    async fn rversion(&self, msize: u32, ver: &str) -> Result<FCall> {
        Ok(FCall::Rversion {
            msize,
            version: match ver {
                P92000 | P92000U => ver.to_owned(),
                _ => VERSION_UNKNOWN.to_owned(),
            },
        })
    }

    /// Abandon a pending request.
    async fn rflush(&self, _old: Option<&FCall>) -> Result<FCall> {
        Ok(FCall::Rflush)
    }

    /// Walk the directory tree.
    ///
    /// Traverses `wnames` starting at `fid`, producing `newfid`. A core
    /// operation that must be implemented for navigation.
    async fn rwalk(
        &self,
        _fid: &FId<Self::FId>,
        _newfid: &FId<Self::FId>,
        _wnames: &[String],
    ) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Open a file.
    async fn ropen(&self, _fid: &FId<Self::FId>, _mode: u8) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Create a new file, directory, symlink, device, or named pipe.
    ///
    /// After a successful create, `fid` represents the new object. `fids`
    /// is the connection's full fid table, exposed so that a hard-link
    /// create (whose `ext` names the decimal fid of an existing open file)
    /// can resolve that fid (§6, "a FID lookup by number").
    async fn rcreate(
        &self,
        _fid: &FId<Self::FId>,
        _name: &str,
        _perm: u32,
        _mode: u8,
        _ext: &str,
        _fids: &HashMap<u32, FId<Self::FId>>,
    ) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Read data from a file, or the next batch of directory records.
    async fn rread(&self, _fid: &FId<Self::FId>, _offset: u64, _count: u32) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Write data to a file.
    async fn rwrite(&self, _fid: &FId<Self::FId>, _offset: u64, _data: &Data) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Close a fid and release any resources held for it.
    async fn rclunk(&self, _fid: &FId<Self::FId>) -> Result<FCall> {
        Ok(FCall::Rclunk)
    }

    /// Remove the file represented by `fid`, then clunk it.
    async fn rremove(&self, _fid: &FId<Self::FId>) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Fetch the stat record for `fid`.
    async fn rstat(&self, _fid: &FId<Self::FId>) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }

    /// Apply a (partial) stat record to `fid`.
    async fn rwstat(&self, _fid: &FId<Self::FId>, _stat: &Dir) -> Result<FCall> {
        Err(error::Error::No(EOPNOTSUPP))
    }
}

#[rustfmt::skip]
async fn dispatch_once<Fs, FsFId>(
    msg: &Msg,
    fs: Arc<Fs>,
    fsfids: Arc<RwLock<HashMap<u32, FId<FsFId>>>>,
) -> Result<FCall>
where
    Fs: Filesystem<FId = FsFId> + Send + Sync,
    FsFId: Send + Sync + Default,
{
    let newfid = msg.body.newfid().map(|f| FId {
        fid: f,
        aux: Default::default(),
    });

    use crate::FCall::*;
    let result: Result<FCall> = {
        let fids = fsfids.read().await;
        let get_fid = |fid: &u32| fids.get(fid).ok_or(error::Error::No(EBADF));
        let get_newfid = || newfid.as_ref().ok_or(error::Error::No(EPROTO));

        match msg.body {
            Tversion { ref msize, ref version }                         => fs.rversion(*msize, version).await,
            Tauth { afid: _, ref uname, ref aname, ref n_uname }         => fs.rauth(get_newfid()?, uname, aname, *n_uname).await,
            Tattach { fid: _, afid, ref uname, ref aname, ref n_uname }  => {
                let afid = if afid == NOFID { None } else { Some(get_fid(&afid)?) };
                fs.rattach(get_newfid()?, afid, uname, aname, *n_uname).await
            }
            Tflush { oldtag: _ }                                        => fs.rflush(None).await,
            Twalk { fid, newfid: _, ref wnames }                        => fs.rwalk(get_fid(&fid)?, get_newfid()?, wnames).await,
            Topen { fid, ref mode }                                     => fs.ropen(get_fid(&fid)?, *mode).await,
            Tcreate { fid, ref name, ref perm, ref mode, ref ext }       => fs.rcreate(get_fid(&fid)?, name, *perm, *mode, ext, &fids).await,
            Tread { fid, ref offset, ref count }                        => fs.rread(get_fid(&fid)?, *offset, *count).await,
            Twrite { fid, ref offset, ref data }                        => fs.rwrite(get_fid(&fid)?, *offset, data).await,
            Tclunk { fid }                                              => fs.rclunk(get_fid(&fid)?).await,
            Tremove { fid }                                             => fs.rremove(get_fid(&fid)?).await,
            Tstat { fid }                                               => fs.rstat(get_fid(&fid)?).await,
            Twstat { fid, ref stat }                                    => fs.rwstat(get_fid(&fid)?, stat).await,
            _                                                           => Err(error::Error::No(EOPNOTSUPP)),
        }
    };

    /* Tclunk/Tremove always terminate the fid, even if the handler errored. */
    match msg.body {
        Tclunk { fid } | Tremove { fid } => {
            let mut fids = fsfids.write().await;
            fids.remove(&fid);
        }
        _ => {}
    }

    if result.is_ok() {
        if let Some(newfid) = newfid {
            let mut fids = fsfids.write().await;
            fids.insert(newfid.fid, newfid);
        }
    }

    result
}

async fn dispatch<Fs, Reader, Writer>(filesystem: Fs, reader: Reader, writer: Writer) -> Result<()>
where
    Fs: 'static + Filesystem + Send + Sync,
    Reader: 'static + AsyncRead + Send + std::marker::Unpin,
    Writer: 'static + AsyncWrite + Send + std::marker::Unpin,
{
    let fsfids = Arc::new(RwLock::new(HashMap::new()));
    let filesystem = Arc::new(filesystem);

    let mut framedread = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_read(reader);
    let framedwrite = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_write(writer);
    let framedwrite = Arc::new(Mutex::new(framedwrite));

    while let Some(bytes) = framedread.next().await {
        let bytes = bytes?;

        let msg = serialize::read_msg(&mut bytes.reader())?;
        info!("\t← {:?}", msg);

        let fids = fsfids.clone();
        let fs = filesystem.clone();
        let framedwrite = framedwrite.clone();

        tokio::spawn(async move {
            let response_fcall = dispatch_once(&msg, fs, fids).await.unwrap_or_else(|e| {
                error!("{:?}: Error: \"{}\": {:?}", MsgType::from(&msg.body), e, e);
                FCall::Rerror {
                    ename: e.message(),
                    ecode: e.errno() as u32,
                }
            });

            let response = Msg {
                tag: msg.tag,
                body: response_fcall,
            };

            let mut writer = bytes::BytesMut::with_capacity(4096).writer();
            if let Err(e) = serialize::write_msg(&mut writer, &response) {
                error!("Failed to serialize response for tag {}: {:?}", msg.tag, e);
                return;
            }

            let frozen = writer.into_inner().freeze();
            {
                let mut framedwrite_locked = framedwrite.lock().await;
                if let Err(e) = framedwrite_locked.send(frozen).await {
                    error!("Failed to send response for tag {}: {:?}", msg.tag, e);
                    return;
                }
            }
            info!("\t→ {:?}", response);
        });
    }

    Ok(())
}

async fn srv_async_tcp<Fs>(filesystem: Fs, addr: &str) -> Result<()>
where
    Fs: 'static + Filesystem + Send + Sync + Clone,
{
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {:?}", peer);

        let fs = filesystem.clone();
        tokio::spawn(async move {
            let (readhalf, writehalf) = stream.into_split();
            let res = dispatch(fs, readhalf, writehalf).await;
            if let Err(e) = res {
                error!("Error: {}: {:?}", e, e);
            }
        });
    }
}

struct DeleteOnDrop {
    path: PathBuf,
    listener: UnixListener,
}

impl DeleteOnDrop {
    fn bind(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_owned();
        UnixListener::bind(&path).map(|listener| DeleteOnDrop { path, listener })
    }
}

impl std::ops::Deref for DeleteOnDrop {
    type Target = UnixListener;

    fn deref(&self) -> &Self::Target {
        &self.listener
    }
}

impl std::ops::DerefMut for DeleteOnDrop {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.listener
    }
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        // There's no way to return a useful error here
        if let Err(e) = std::fs::remove_file(&self.path) {
            eprintln!(
                "Warning: Failed to remove socket file {:?}: {}",
                self.path, e
            );
        }
    }
}

pub async fn srv_async_unix<Fs>(filesystem: Fs, addr: impl AsRef<Path>) -> Result<()>
where
    Fs: 'static + Filesystem + Send + Sync + Clone,
{
    use tokio::signal::unix::{SignalKind, signal};

    let listener = DeleteOnDrop::bind(addr)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    {
        let running = running.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        info!("accepted: {:?}", peer);

                        let fs = filesystem.clone();
                        tokio::spawn(async move {
                            let (readhalf, writehalf) = tokio::io::split(stream);
                            let res = dispatch(fs, readhalf, writehalf).await;
                            if let Err(e) = res {
                                error!("Error: {:?}", e);
                            }
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                // Allow the server to check the running flag
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Start serving `filesystem` at `addr`, formatted as `tcp!host!port` or
/// `unix!path!0` (the trailing field is unused for unix sockets).
pub async fn srv_async<Fs>(filesystem: Fs, addr: &str) -> Result<()>
where
    Fs: 'static + Filesystem + Send + Sync + Clone,
{
    let (proto, host, port) = utils::parse_proto(addr)
        .ok_or_else(|| io_err!(InvalidInput, "Invalid protocol or address"))?;

    match proto {
        "tcp" => srv_async_tcp(filesystem, &format!("{}:{}", host, port)).await,
        "unix" => srv_async_unix(filesystem, host).await,
        _ => Err(From::from(io_err!(InvalidInput, "Protocol not supported"))),
    }
}
