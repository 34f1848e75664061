//! FID table entry: per-client-handle state (§3).

use std::path::PathBuf;

use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::cursor::DirCursor;

/// A handle the FID currently has open.
pub struct OpenHandle {
    pub file: fs::File,
}

/// Per-fid state threaded through [`p9::srv::FId::aux`].
///
/// `path` is mutated by `Walk`, `Create`, and `Wstat` (rename). `open_handle`
/// is present iff the fid has been opened and not yet clunked/removed.
/// `dir_cursor` is only ever `Some` while `open_handle` refers to a
/// directory and a streaming read is in progress.
#[derive(Default)]
pub struct UfsFId {
    pub path: RwLock<PathBuf>,
    pub open_handle: Mutex<Option<OpenHandle>>,
    pub dir_cursor: Mutex<Option<DirCursor>>,
}

impl UfsFId {
    pub async fn path(&self) -> PathBuf {
        self.path.read().await.clone()
    }

    pub async fn set_path(&self, path: PathBuf) {
        *self.path.write().await = path;
    }

    /// Close and drop any held file handle and cursor, per the FID-destroy
    /// hook (§4.4). Errors from `close` are deliberately ignored — the
    /// client has already moved on.
    pub async fn destroy(&self) {
        let _ = self.open_handle.lock().await.take();
        let _ = self.dir_cursor.lock().await.take();
    }
}
