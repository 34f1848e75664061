//! Stat/Dir marshaller (§4.2): builds a 9P `Dir` record from a host path's
//! metadata, in both the base 9P2000 and 9P2000.u dialects.

use std::path::Path;

use p9::Result;
use p9::fcall::{DotuExt, HostStat, NOUID};
use p9::fcall::Dir;
use tokio::fs;

use p9::users::Users;

use crate::mode::{file_info_to_9p_mode, file_info_to_qid};

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_owned())
}

/// Decimal-string fallback for an id the `Users` pool couldn't resolve.
fn owner_string(name: &str, id: u32) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        name.to_owned()
    }
}

fn device_ext(info: &HostStat) -> String {
    let fmt = info.mode & nix::libc::S_IFMT;
    let major = info.rdev >> 24;
    let minor = info.rdev & 0xFF_FFFF;
    match fmt {
        nix::libc::S_IFBLK => format!("b {} {}", major, minor),
        nix::libc::S_IFCHR => format!("c {} {}", major, minor),
        _ => String::new(),
    }
}

/// Stat `path` (without following a trailing symlink) and marshal it into a
/// `Dir`, per the dialect in effect on the connection.
pub async fn dir_from_path(path: &Path, dotu: bool, users: &Users) -> Result<Dir> {
    let attr = fs::symlink_metadata(path).await?;
    let info = HostStat::from(attr);
    dir_from_stat(path, &info, dotu, users).await
}

/// As [`dir_from_path`], but for metadata already in hand (avoids a
/// redundant stat when the caller just performed one).
pub async fn dir_from_stat(path: &Path, info: &HostStat, dotu: bool, users: &Users) -> Result<Dir> {
    let qid = file_info_to_qid(info);
    let mode = file_info_to_9p_mode(info, dotu);
    let mtime = (info.mtime_nsec / 1_000_000_000) as u32;
    let length = if info.is_dir { 0 } else { info.size };
    let name = basename(path);

    let owner = users.uid2user(info.uid);
    let group = users.gid2group(info.gid);

    let dotu_ext = if dotu {
        let ext = if info.is_symlink {
            fs::read_link(path)
                .await
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            device_ext(info)
        };
        Some(DotuExt {
            ext,
            uidnum: info.uid,
            gidnum: info.gid,
            muidnum: NOUID,
        })
    } else {
        None
    };

    let (uid, gid) = if dotu {
        (
            if owner.name().is_empty() { "none".to_owned() } else { owner.name().to_owned() },
            if group.name().is_empty() { "none".to_owned() } else { group.name().to_owned() },
        )
    } else {
        (
            owner_string(owner.name(), info.uid),
            owner_string(group.name(), info.gid),
        )
    };

    Ok(Dir {
        qid,
        mode,
        atime: 0,
        mtime,
        length,
        name,
        uid,
        gid,
        muid: "none".to_owned(),
        dotu: dotu_ext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use p9::fcall::QidType;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[tokio::test]
    async fn marshals_regular_file_base_dialect() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("hello.txt");
        tokio::fs::write(&file_path, b"hi").await.unwrap();

        let users = Users;
        let stat = dir_from_path(&file_path, false, &users).await.unwrap();
        assert_eq!(stat.name, "hello.txt");
        assert_eq!(stat.length, 2);
        assert!(stat.dotu.is_none());
        assert_eq!(stat.muid, "none");
    }

    #[tokio::test]
    async fn marshals_directory_dotu_dialect() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();

        let users = Users;
        let stat = dir_from_path(&sub, true, &users).await.unwrap();
        assert!(stat.qid.typ.contains(QidType::DIR));
        assert_eq!(stat.length, 0);
        assert!(stat.dotu.is_some());
        assert_eq!(stat.dotu.unwrap().muidnum, NOUID);
    }

    #[tokio::test]
    async fn marshals_symlink_ext_is_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.txt");
        tokio::fs::write(&target, b"x").await.unwrap();
        let link = dir.path().join("link");
        tokio::fs::symlink(&target, &link).await.unwrap();

        let users = Users;
        let stat = dir_from_path(&link, true, &users).await.unwrap();
        assert!(stat.qid.typ.contains(QidType::SYMLINK));
        let ext = stat.dotu.unwrap().ext;
        assert_eq!(PathBuf::from(ext), target);
    }
}
