//! Directory-stream cursor (§4.5): satisfies successive `Tread` requests on
//! a directory by reading host entries in batches of 16 and packing them
//! into the response buffer without ever splitting a record.

use std::path::Path;

use p9::Result;
use p9::error;
use p9::fcall::Dir;
use p9::serialize::pack_dir;
use tokio::fs;
use tokio_stream::{StreamExt, wrappers::ReadDirStream};

use p9::users::Users;

use crate::stat::dir_from_path;

const BATCH_SIZE: usize = 16;

/// Buffered batch of marshalled directory entries, plus an index into it.
/// Re-created from the host directory stream whenever the batch is drained.
pub struct DirCursor {
    stream: Option<ReadDirStream>,
    batch: Vec<Dir>,
    index: usize,
    exhausted: bool,
}

impl DirCursor {
    /// Start (or restart) a cursor over `dirpath`.
    pub async fn open(dirpath: &Path) -> Result<DirCursor> {
        let stream = ReadDirStream::new(fs::read_dir(dirpath).await?);
        Ok(DirCursor {
            stream: Some(stream),
            batch: Vec::new(),
            index: 0,
            exhausted: false,
        })
    }

    async fn fill_batch(&mut self, dotu: bool, users: &Users) -> Result<()> {
        self.batch.clear();
        self.index = 0;

        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        for _ in 0..BATCH_SIZE {
            match stream.next().await {
                Some(Ok(entry)) => {
                    let path = entry.path();
                    let dir = dir_from_path(&path, dotu, users).await?;
                    self.batch.push(dir);
                }
                Some(Err(e)) => return Err(error::Error::Io(e)),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Fill `buf` with as many whole `Dir` records as fit within
    /// `max_count` bytes, fetching further host batches as needed. Returns
    /// the number of bytes appended.
    pub async fn read(&mut self, max_count: u32, dotu: bool, users: &Users) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        loop {
            if self.index >= self.batch.len() {
                if self.exhausted {
                    break;
                }
                self.fill_batch(dotu, users).await?;
                if self.batch.is_empty() {
                    break;
                }
            }

            let dir = &self.batch[self.index];
            let written = pack_dir(dir, &mut buf, max_count)?;
            if written == 0 {
                // Doesn't fit; retain this entry (and everything after it)
                // for the next Tread.
                break;
            }
            self.index += 1;
        }

        Ok(buf)
    }
}
