//! Request handlers (§4.3): the `Filesystem` implementation that bridges
//! 9P operations onto host filesystem syscalls.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use nix::unistd::{Gid, Group, Uid, User};
use p9::error;
use p9::fcall::{
    DONTTOUCH32, DONTTOUCH64, Data, DirMode, FCall, HostStat, NOUID, P92000, P92000U,
    VERSION_UNKNOWN,
};
use p9::srv::{FId, Filesystem};
use p9::users::Users;
use p9::Result;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::cursor::DirCursor;
use crate::fid::{OpenHandle, UfsFId};
use crate::mode::{file_info_to_qid, open_mode_to_host_flags};

/// Exposes a host directory tree to 9P clients (§1, §2).
#[derive(Clone)]
pub struct Ufs {
    pub root: PathBuf,
    pub dotu: bool,
    pub users: Users,
}

async fn restat(path: &Path) -> Result<HostStat> {
    Ok(HostStat::from(fs::symlink_metadata(path).await?))
}

fn fid_not_open() -> error::Error {
    error::Error::Protocol(nix::errno::Errno::EBADF, "fid not open")
}

#[async_trait]
impl Filesystem for Ufs {
    type FId = UfsFId;

    /// Accepts only the dialect this server was started with (`self.dotu`);
    /// the wire layout of every [`p9::fcall::Dir`] this adapter sends is
    /// fixed at startup, so a client negotiating the other dialect would
    /// otherwise get mismatched stat records.
    async fn rversion(&self, msize: u32, ver: &str) -> Result<FCall> {
        let accepted = match ver {
            P92000U => self.dotu,
            P92000 => !self.dotu,
            _ => false,
        };
        Ok(FCall::Rversion {
            msize,
            version: if accepted {
                ver.to_owned()
            } else {
                VERSION_UNKNOWN.to_owned()
            },
        })
    }

    async fn rattach(
        &self,
        fid: &FId<Self::FId>,
        afid: Option<&FId<Self::FId>>,
        _uname: &str,
        aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        if afid.is_some() {
            return Err(error::enoauth());
        }

        let path = if aname.is_empty() {
            self.root.clone()
        } else {
            self.root.join(aname.trim_start_matches('/'))
        };

        let info = restat(&path).await?;
        fid.aux.set_path(path).await;

        Ok(FCall::Rattach {
            qid: file_info_to_qid(&info),
        })
    }

    async fn rwalk(
        &self,
        fid: &FId<Self::FId>,
        newfid: &FId<Self::FId>,
        wnames: &[String],
    ) -> Result<FCall> {
        let mut path = fid.aux.path().await;
        let mut wqids = Vec::with_capacity(wnames.len());

        for (i, name) in wnames.iter().enumerate() {
            let candidate = path.join(name);
            match restat(&candidate).await {
                Ok(info) => {
                    wqids.push(file_info_to_qid(&info));
                    path = candidate;
                }
                Err(e) => {
                    if i == 0 {
                        return Err(error::enoent());
                    }
                    let _ = e;
                    break;
                }
            }
        }

        newfid.aux.set_path(path).await;
        Ok(FCall::Rwalk { wqids })
    }

    async fn ropen(&self, fid: &FId<Self::FId>, mode: u8) -> Result<FCall> {
        let path = fid.aux.path().await;
        let info = restat(&path).await?;
        let qid = file_info_to_qid(&info);

        if !info.is_dir {
            let oflags = open_mode_to_host_flags(mode);
            let omode = nix::sys::stat::Mode::from_bits_truncate(0);
            let fd = nix::fcntl::open(&path, oflags, omode)?;
            let mut handle = fid.aux.open_handle.lock().await;
            *handle = Some(OpenHandle {
                file: fs::File::from_std(fd.into()),
            });
        }

        Ok(FCall::Ropen { qid, iounit: 0 })
    }

    async fn rcreate(
        &self,
        fid: &FId<Self::FId>,
        name: &str,
        perm: u32,
        mode: u8,
        ext: &str,
        fids: &HashMap<u32, FId<Self::FId>>,
    ) -> Result<FCall> {
        let dirpath = fid.aux.path().await;
        let newpath = dirpath.join(name);
        let permbits = DirMode::from_bits_truncate(perm);

        if permbits.contains(DirMode::DIR) {
            fs::create_dir(&newpath).await?;
            fs::set_permissions(&newpath, PermissionsExt::from_mode(perm & 0o777)).await?;
        } else if permbits.contains(DirMode::SYMLINK) {
            fs::symlink(ext, &newpath).await?;
        } else if permbits.contains(DirMode::LINK) {
            let src_fid: u32 = ext.parse().map_err(|_| error::eunknownfid())?;
            let src = fids.get(&src_fid).ok_or_else(error::eunknownfid)?;
            let src_path = src.aux.path().await;
            fs::hard_link(&src_path, &newpath).await?;
        } else if permbits.intersects(DirMode::NAMEDPIPE | DirMode::DEVICE) {
            return Err(error::eio_unimplemented("not implemented"));
        } else {
            let mut filemode = perm & 0o777;
            if self.dotu {
                if permbits.contains(DirMode::SETUID) {
                    filemode |= nix::libc::S_ISUID;
                }
                if permbits.contains(DirMode::SETGID) {
                    filemode |= nix::libc::S_ISGID;
                }
            }
            let oflags = open_mode_to_host_flags(mode) | nix::fcntl::OFlag::O_CREAT;
            let omode = nix::sys::stat::Mode::from_bits_truncate(filemode);
            let fd = nix::fcntl::open(&newpath, oflags, omode)?;
            let mut handle = fid.aux.open_handle.lock().await;
            *handle = Some(OpenHandle {
                file: fs::File::from_std(fd.into()),
            });
        }

        fid.aux.set_path(newpath.clone()).await;
        let info = restat(&newpath).await?;
        let qid = file_info_to_qid(&info);

        if !info.is_dir && !info.is_symlink {
            let mut handle = fid.aux.open_handle.lock().await;
            if handle.is_none() {
                let oflags = open_mode_to_host_flags(mode);
                let omode = nix::sys::stat::Mode::from_bits_truncate(0);
                let fd = nix::fcntl::open(&newpath, oflags, omode)?;
                *handle = Some(OpenHandle {
                    file: fs::File::from_std(fd.into()),
                });
            }
        }

        Ok(FCall::Rcreate { qid, iounit: 0 })
    }

    async fn rread(&self, fid: &FId<Self::FId>, offset: u64, count: u32) -> Result<FCall> {
        let path = fid.aux.path().await;
        let info = restat(&path).await?;

        if info.is_dir {
            let mut cursor_guard = fid.aux.dir_cursor.lock().await;
            if offset == 0 || cursor_guard.is_none() {
                *cursor_guard = Some(DirCursor::open(&path).await?);
            }
            let buf = if let Some(cursor) = cursor_guard.as_mut() {
                cursor.read(count, self.dotu, &self.users).await?
            } else {
                Vec::new()
            };
            Ok(FCall::Rread { data: Data(buf) })
        } else {
            let mut handle = fid.aux.open_handle.lock().await;
            let openh = handle.as_mut().ok_or_else(fid_not_open)?;
            openh.file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut buf = vec![0u8; count as usize];
            let n = openh.file.read(&mut buf).await?;
            buf.truncate(n);
            Ok(FCall::Rread { data: Data(buf) })
        }
    }

    async fn rwrite(&self, fid: &FId<Self::FId>, offset: u64, data: &Data) -> Result<FCall> {
        let mut handle = fid.aux.open_handle.lock().await;
        let openh = handle.as_mut().ok_or_else(fid_not_open)?;
        openh.file.seek(std::io::SeekFrom::Start(offset)).await?;
        let n = openh.file.write(&data.0).await?;
        Ok(FCall::Rwrite { count: n as u32 })
    }

    async fn rclunk(&self, fid: &FId<Self::FId>) -> Result<FCall> {
        fid.aux.destroy().await;
        Ok(FCall::Rclunk)
    }

    async fn rremove(&self, fid: &FId<Self::FId>) -> Result<FCall> {
        let path = fid.aux.path().await;
        let info = restat(&path).await?;

        if info.is_dir {
            fs::remove_dir(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }

        fid.aux.destroy().await;
        Ok(FCall::Rremove)
    }

    async fn rstat(&self, fid: &FId<Self::FId>) -> Result<FCall> {
        let path = fid.aux.path().await;
        let stat = crate::stat::dir_from_path(&path, self.dotu, &self.users).await?;
        Ok(FCall::Rstat { stat })
    }

    async fn rwstat(
        &self,
        fid: &FId<Self::FId>,
        newdir: &p9::fcall::Dir,
    ) -> Result<FCall> {
        let mut path = fid.aux.path().await;
        let _ = restat(&path).await?;

        // 1. Mode
        if newdir.mode != DONTTOUCH32 {
            let mut filemode = newdir.mode & 0o777;
            if self.dotu {
                let bits = DirMode::from_bits_truncate(newdir.mode);
                if bits.contains(DirMode::SETUID) {
                    filemode |= nix::libc::S_ISUID;
                }
                if bits.contains(DirMode::SETGID) {
                    filemode |= nix::libc::S_ISGID;
                }
            }
            fs::set_permissions(&path, PermissionsExt::from_mode(filemode)).await?;
        }

        // 2. Ownership
        let (uid, gid): (Option<Uid>, Option<Gid>) = if self.dotu {
            let dotu = newdir.dotu.clone().unwrap_or_default();
            let uid = (dotu.uidnum != NOUID).then(|| Uid::from_raw(dotu.uidnum));
            let gid = (dotu.gidnum != NOUID).then(|| Gid::from_raw(dotu.gidnum));
            (uid, gid)
        } else {
            let uid = if !newdir.uid.is_empty() {
                User::from_name(&newdir.uid)?.map(|u| u.uid)
            } else {
                None
            };
            // Known source defect (resolving groups via the user database)
            // is fixed here: resolve through the real group database.
            let gid = if !newdir.gid.is_empty() {
                Group::from_name(&newdir.gid)?.map(|g| g.gid)
            } else {
                None
            };
            (uid, gid)
        };
        if uid.is_some() || gid.is_some() {
            nix::unistd::chown(&path, uid, gid)?;
        }

        // 3. Rename
        if !newdir.name.is_empty() {
            let newpath = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"))
                .join(&newdir.name);
            fs::rename(&path, &newpath).await?;
            path = newpath;
            fid.aux.set_path(path.clone()).await;
        }

        // 4. Truncate
        if newdir.length != DONTTOUCH64 {
            let f = fs::OpenOptions::new().write(true).open(&path).await?;
            f.set_len(newdir.length).await?;
        }

        // 5. Times
        if newdir.mtime != DONTTOUCH32 || newdir.atime != DONTTOUCH32 {
            let current = restat(&path).await?;
            let mtime_sec = if newdir.mtime != DONTTOUCH32 {
                newdir.mtime
            } else {
                (current.mtime_nsec / 1_000_000_000) as u32
            };
            // atime is never read by this adapter (§9); a sentinel atime
            // falls back to 0, not the host's real atime.
            let atime_sec = if newdir.atime != DONTTOUCH32 { newdir.atime } else { 0 };

            let atime = FileTime::from_unix_time(atime_sec as i64, 0);
            let mtime = FileTime::from_unix_time(mtime_sec as i64, 0);
            let target = path.clone();
            tokio::task::spawn_blocking(move || filetime::set_file_times(target, atime, mtime))
                .await
                .map_err(|e| error::Error::Io(std::io::Error::other(e)))??;
        }

        Ok(FCall::Rwstat)
    }
}
