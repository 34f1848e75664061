//! 9P error representations.
//!
//! 9P2000 represents errors as strings (`Rerror.ename`); the 9P2000.u
//! extension additionally carries the numeric host errno (`Rerror.ecode`),
//! which is what `Error::errno()` below produces.

use std::io;
use std::io::ErrorKind::*;

use nix::errno::Errno;

fn errno_from_ioerror(e: &io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_raw).unwrap_or(match e.kind() {
        NotFound => Errno::ENOENT,
        PermissionDenied => Errno::EPERM,
        ConnectionRefused => Errno::ECONNREFUSED,
        ConnectionReset => Errno::ECONNRESET,
        ConnectionAborted => Errno::ECONNABORTED,
        NotConnected => Errno::ENOTCONN,
        AddrInUse => Errno::EADDRINUSE,
        AddrNotAvailable => Errno::EADDRNOTAVAIL,
        BrokenPipe => Errno::EPIPE,
        AlreadyExists => Errno::EEXIST,
        WouldBlock => Errno::EAGAIN,
        InvalidInput => Errno::EINVAL,
        InvalidData => Errno::EINVAL,
        TimedOut => Errno::ETIMEDOUT,
        WriteZero => Errno::EAGAIN,
        Interrupted => Errno::EINTR,
        _ => Errno::EIO,
    })
}

/// 9P error type, convertible to an `(ename, ecode)` pair for `Rerror` (§7).
///
/// Handlers return `Result<FCall, Error>` and use `?` throughout; the server
/// skeleton (`srv::dispatch_once`) catches the `Err` and builds the `Rerror`
/// reply, so there is no manual `RespondError` call in adapter code.
#[derive(Debug)]
pub enum Error {
    /// A host syscall failure with a known errno.
    No(Errno),
    /// An I/O error without a directly corresponding errno (falls back to `EIO`).
    Io(io::Error),
    /// A 9P protocol-level error not backed by any host errno (e.g. `Enoauth`).
    Protocol(Errno, &'static str),
}

impl Error {
    /// The numeric errno to report on the wire (`ecode`).
    pub fn errno(&self) -> Errno {
        match *self {
            Error::No(e) => e,
            Error::Io(ref e) => errno_from_ioerror(e),
            Error::Protocol(e, _) => e,
        }
    }

    /// The human-readable message to report on the wire (`ename`).
    pub fn message(&self) -> String {
        match *self {
            Error::No(e) => e.to_string(),
            Error::Io(ref e) => e.to_string(),
            Error::Protocol(_, msg) => msg.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::No(e)
    }
}

/// Shorthand constructors for the protocol-level errors named in §7.
pub fn enoauth() -> Error {
    Error::Protocol(Errno::EPERM, "authentication not required")
}

pub fn enoent() -> Error {
    Error::Protocol(Errno::ENOENT, string::ENOENT)
}

pub fn eunknownfid() -> Error {
    Error::Protocol(Errno::EBADF, "unknown fid")
}

pub fn eio_unimplemented(msg: &'static str) -> Error {
    Error::Protocol(Errno::EIO, msg)
}

/// Re-export of `nix`'s errno constants, the numeric alphabet `Error::No` is built from.
pub mod errno {
    pub use nix::errno::Errno::*;
}

/// 9P error strings, as sent in `Rerror.ename` for protocol-level errors that
/// have no corresponding host errno message. Carried forward from the base
/// 9P2000 error table for diagnostics and tests; wire replies for host
/// syscall failures use the host's own error message instead (§7).
pub mod string {
    pub const EPERM: &str = "Operation not permitted";
    pub const ENOENT: &str = "No such file or directory";
    pub const EIO: &str = "Input/output error";
    pub const EACCES: &str = "Permission denied";
    pub const EEXIST: &str = "File exists";
    pub const ENOTDIR: &str = "Not a directory";
    pub const EISDIR: &str = "Is a directory";
    pub const EINVAL: &str = "Invalid argument";
    pub const ENOTEMPTY: &str = "Directory not empty";
    pub const ELOOP: &str = "Too many levels of symbolic links";
    pub const EBADF: &str = "fid unknown or out of range";
    pub const EOPNOTSUPP: &str = "Operation not supported";
    pub const NOT_IMPLEMENTED: &str = "not implemented";
}
