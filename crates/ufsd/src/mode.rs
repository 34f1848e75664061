//! Mode translator: 9P open-mode/permission bits <-> host flags, and host
//! stat metadata <-> `Qid`/`Dir` mode bits (§4.1). Pure, stateless functions.

use nix::fcntl::OFlag;
use p9::fcall::{DirMode, HostStat, Qid, QidType, om};

/// Translate a 9P open-mode byte into host open flags.
///
/// The low two bits select the access mode; `EXEC` has no host analog and is
/// treated as `READ`. `OTRUNC` ORs in `O_TRUNC`; all other bits are ignored.
pub fn open_mode_to_host_flags(mode: u8) -> OFlag {
    let mut flags = match mode & om::MODE_MASK {
        om::WRITE => OFlag::O_WRONLY,
        om::RDWR => OFlag::O_RDWR,
        _ => OFlag::O_RDONLY, // READ and EXEC
    };
    if mode & om::TRUNC != 0 {
        flags |= OFlag::O_TRUNC;
    }
    flags
}

/// Build a [`Qid`] from host stat metadata.
///
/// `path` is the host inode number; `version` is the modification time in
/// milliseconds; `type` sets `DIR`/`SYMLINK` (both may co-occur in theory,
/// though a host filesystem never reports both for the same object).
pub fn file_info_to_qid(info: &HostStat) -> Qid {
    let mut typ = QidType::FILE;
    if info.is_dir {
        typ.insert(QidType::DIR);
    }
    if info.is_symlink {
        typ.insert(QidType::SYMLINK);
    }
    Qid {
        typ,
        version: (info.mtime_nsec / 1_000_000) as u32,
        path: info.ino,
    }
}

/// Build the 9P `Dir.mode` bits from host stat metadata.
///
/// The lowest nine bits are the POSIX permission bits. `DMDIR` is set for
/// directories. In dotu mode, symlink/socket/named-pipe/device/setuid/setgid
/// bits are additionally set from the host mode.
pub fn file_info_to_9p_mode(info: &HostStat, dotu: bool) -> u32 {
    let mut mode = DirMode::from_bits_truncate(info.mode & 0o777);

    if info.is_dir {
        mode.insert(DirMode::DIR);
    }

    if dotu {
        let fmt = info.mode & nix::libc::S_IFMT;
        if info.is_symlink {
            mode.insert(DirMode::SYMLINK);
        }
        if fmt == nix::libc::S_IFSOCK {
            mode.insert(DirMode::SOCKET);
        }
        if fmt == nix::libc::S_IFIFO {
            mode.insert(DirMode::NAMEDPIPE);
        }
        if fmt == nix::libc::S_IFBLK || fmt == nix::libc::S_IFCHR {
            mode.insert(DirMode::DEVICE);
        }
        if info.mode & nix::libc::S_ISUID != 0 {
            mode.insert(DirMode::SETUID);
        }
        if info.mode & nix::libc::S_ISGID != 0 {
            mode.insert(DirMode::SETGID);
        }
    }

    mode.bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(mode: u32, is_dir: bool, is_symlink: bool) -> HostStat {
        HostStat {
            mode,
            uid: 1000,
            gid: 1000,
            ino: 1,
            rdev: 0,
            size: 0,
            mtime_nsec: 1_234_000_000_000,
            is_dir,
            is_symlink,
        }
    }

    #[test]
    fn open_mode_maps_exec_to_read() {
        assert_eq!(open_mode_to_host_flags(om::EXEC), OFlag::O_RDONLY);
    }

    #[test]
    fn open_mode_ors_in_trunc() {
        let flags = open_mode_to_host_flags(om::WRITE | om::TRUNC);
        assert!(flags.contains(OFlag::O_WRONLY));
        assert!(flags.contains(OFlag::O_TRUNC));
    }

    #[test]
    fn qid_version_is_mtime_millis() {
        let info = stat(0o644, false, false);
        let qid = file_info_to_qid(&info);
        assert_eq!(qid.version, 1_234_000);
        assert_eq!(qid.path, 1);
        assert_eq!(qid.typ, QidType::FILE);
    }

    #[test]
    fn dir_qid_sets_dir_bit() {
        let info = stat(0o755, true, false);
        let qid = file_info_to_qid(&info);
        assert!(qid.typ.contains(QidType::DIR));
    }

    #[test]
    fn mode_sets_dmdir_for_directories() {
        let info = stat(0o755, true, false);
        let mode = file_info_to_9p_mode(&info, true);
        assert_eq!(mode & DirMode::DIR.bits(), DirMode::DIR.bits());
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn mode_omits_dotu_bits_in_base_dialect() {
        let mut info = stat(0o644, false, true);
        info.mode |= nix::libc::S_IFLNK;
        let mode = file_info_to_9p_mode(&info, false);
        assert_eq!(mode & DirMode::SYMLINK.bits(), 0);
    }

    #[test]
    fn mode_sets_symlink_bit_in_dotu() {
        let mut info = stat(0o644, false, true);
        info.mode |= nix::libc::S_IFLNK;
        let mode = file_info_to_9p_mode(&info, true);
        assert_eq!(mode & DirMode::SYMLINK.bits(), DirMode::SYMLINK.bits());
    }
}
