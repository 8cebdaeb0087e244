//! Destination emission
//!
//! Everything that lands on disk goes through here: bounded regular-file
//! contents, verbatim symlink text, device nodes via mknod, and directories
//! with an owner-write fixup so later writes into them cannot fail on a
//! faithfully copied read-only sysfs mode.
//!
//! Write failures are never fatal. They map to destination-side counters
//! and the scan moves on.

use crate::stats::{DestClass, Stats};
use std::ffi::{CString, OsStr};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, warn};

/// Bottom 9 mode bits, the only ones carried to the destination.
const PERM_MASK: u32 = 0o777;

/// How a directory creation went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOutcome {
    Created,
    AlreadyExists,
    Failed,
}

/// Write one regular file. The source permission bits are kept, OR'd with
/// owner read/write so a later run can overwrite the snapshot.
///
/// Returns the number of bytes that reached the destination.
pub fn write_regular(
    dst: &Path,
    contents: &[u8],
    src_mode: u32,
    all_new: bool,
    stats: &mut Stats,
) -> u64 {
    let perms = (src_mode & PERM_MASK) | 0o600;
    let mut opts = OpenOptions::new();
    opts.write(true).mode(perms);
    if all_new {
        opts.create_new(true);
    } else {
        opts.create(true).truncate(true);
    }

    let mut file = match opts.open(dst) {
        Ok(f) => f,
        Err(e) => {
            stats.count_dest(DestClass::from_errno(e.raw_os_error().unwrap_or(0)));
            return 0;
        }
    };

    let mut written = 0u64;
    if !contents.is_empty() {
        match file.write(contents) {
            Ok(n) => {
                written = n as u64;
                if n < contents.len() {
                    stats.num_reg_d_short_write += 1;
                    warn!(path = %dst.display(), "short write(), strange");
                }
            }
            Err(e) => {
                stats.count_dest(DestClass::from_errno(e.raw_os_error().unwrap_or(0)));
                return 0;
            }
        }
    }
    stats.num_reg_success += 1;
    stats.bytes_copied += written;
    written
}

/// Create a symlink carrying `target` verbatim (usually relative text).
///
/// With `extra` set, the freshly created link is re-checked and counted as
/// dangling when its target does not resolve at the destination.
pub fn create_symlink(
    target: &OsStr,
    lnk: &Path,
    all_new: bool,
    extra: bool,
    stats: &mut Stats,
) {
    if !all_new {
        // a previous run may already have put the link there
        match std::fs::symlink_metadata(lnk) {
            Ok(meta) if meta.file_type().is_symlink() => return,
            Ok(_) => {
                warn!(path = %lnk.display(), "exists but is not a symlink, skip");
                stats.num_error += 1;
                return;
            }
            Err(_) => {} // not there, create below
        }
    }

    match symlink(target, lnk) {
        Ok(()) => {
            stats.num_sym_d_success += 1;
            if extra && std::fs::metadata(lnk).is_err() {
                stats.num_dst_dangling_sym += 1;
            }
        }
        Err(e) => {
            debug!(path = %lnk.display(), error = %e, "create_symlink failed");
            stats.num_error += 1;
        }
    }
}

/// Create a device node with the source's full mode (type + permission
/// bits) and `st_rdev`. Only privileged processes succeed; failure is
/// counted, never fatal.
pub fn create_device_node(dst: &Path, st_mode: u32, st_rdev: u64, stats: &mut Stats) {
    let c_path = match CString::new(dst.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => {
            stats.num_mknod_d_e_other += 1;
            return;
        }
    };
    let r = unsafe {
        libc::mknod(
            c_path.as_ptr(),
            st_mode as libc::mode_t,
            st_rdev as libc::dev_t,
        )
    };
    if r == 0 {
        stats.num_mknod_d_success += 1;
        return;
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error().unwrap_or(0) {
        libc::EACCES => stats.num_mknod_d_eacces += 1,
        libc::EPERM => stats.num_mknod_d_eperm += 1,
        _ => stats.num_mknod_d_e_other += 1,
    }
    debug!(path = %dst.display(), error = %err, "mknod failed");
}

/// Create a directory carrying the source permission bits plus owner-write,
/// so contents can be written into it afterwards.
pub fn create_dir(dst: &Path, src_mode: u32, all_new: bool, stats: &mut Stats) -> DirOutcome {
    if !all_new && dst.is_dir() {
        stats.num_dir_d_exists += 1;
        return DirOutcome::AlreadyExists;
    }
    match std::fs::create_dir(dst) {
        Ok(()) => {
            let perms = (src_mode & PERM_MASK) | 0o200;
            if let Err(e) =
                std::fs::set_permissions(dst, std::fs::Permissions::from_mode(perms))
            {
                debug!(path = %dst.display(), error = %e, "set_permissions failed");
            }
            stats.num_dir_d_success += 1;
            DirOutcome::Created
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            stats.num_dir_d_exists += 1;
            DirOutcome::AlreadyExists
        }
        Err(e) => {
            debug!(path = %dst.display(), error = %e, "create_directory failed");
            stats.num_dir_d_fail += 1;
            stats.num_error += 1;
            DirOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_write_regular_contents_and_mode() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("attr");

        let mut stats = Stats::default();
        let n = write_regular(&dst, b"hello\n", 0o444, true, &mut stats);
        assert_eq!(n, 6);
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello\n");
        // owner rw added on top of the source's r--r--r--
        assert_eq!(
            std::fs::metadata(&dst).unwrap().mode() & 0o777,
            0o644
        );
        assert_eq!(stats.num_reg_success, 1);
        assert_eq!(stats.bytes_copied, 6);
    }

    #[test]
    fn test_write_regular_overwrites_when_not_all_new() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("attr");
        std::fs::write(&dst, b"old old old").unwrap();

        let mut stats = Stats::default();
        write_regular(&dst, b"new", 0o644, false, &mut stats);
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn test_write_regular_into_missing_dir_counts() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("nodir").join("attr");

        let mut stats = Stats::default();
        let n = write_regular(&dst, b"x", 0o644, true, &mut stats);
        assert_eq!(n, 0);
        assert_eq!(stats.num_reg_success, 0);
        assert_eq!(stats.num_reg_d_e_other + stats.num_reg_d_eacces, 1);
    }

    #[test]
    fn test_create_symlink_verbatim_text() {
        let dir = TempDir::new().unwrap();
        let lnk = dir.path().join("link");

        let mut stats = Stats::default();
        create_symlink(OsStr::new("../devices/foo"), &lnk, true, false, &mut stats);
        assert_eq!(
            std::fs::read_link(&lnk).unwrap(),
            Path::new("../devices/foo")
        );
        assert_eq!(stats.num_sym_d_success, 1);
    }

    #[test]
    fn test_create_symlink_extra_counts_dangling() {
        let dir = TempDir::new().unwrap();
        let lnk = dir.path().join("dangle");

        let mut stats = Stats::default();
        create_symlink(OsStr::new("no_such_target"), &lnk, true, true, &mut stats);
        assert_eq!(stats.num_sym_d_success, 1);
        assert_eq!(stats.num_dst_dangling_sym, 1);
    }

    #[test]
    fn test_create_symlink_skips_existing() {
        let dir = TempDir::new().unwrap();
        let lnk = dir.path().join("link");
        symlink("first", &lnk).unwrap();

        let mut stats = Stats::default();
        create_symlink(OsStr::new("second"), &lnk, false, false, &mut stats);
        assert_eq!(std::fs::read_link(&lnk).unwrap(), Path::new("first"));
        assert_eq!(stats.num_sym_d_success, 0);
    }

    #[test]
    fn test_create_dir_adds_owner_write() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("sub");

        let mut stats = Stats::default();
        let out = create_dir(&dst, 0o555, true, &mut stats);
        assert_eq!(out, DirOutcome::Created);
        assert_eq!(std::fs::metadata(&dst).unwrap().mode() & 0o777, 0o755);
        assert_eq!(stats.num_dir_d_success, 1);
    }

    #[test]
    fn test_create_dir_existing() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("sub");
        std::fs::create_dir(&dst).unwrap();

        let mut stats = Stats::default();
        assert_eq!(
            create_dir(&dst, 0o755, false, &mut stats),
            DirOutcome::AlreadyExists
        );
        assert_eq!(stats.num_dir_d_exists, 1);
    }

    #[test]
    fn test_create_dir_failure_counts() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("a").join("b");

        let mut stats = Stats::default();
        assert_eq!(create_dir(&dst, 0o755, true, &mut stats), DirOutcome::Failed);
        assert_eq!(stats.num_dir_d_fail, 1);
    }

    #[test]
    fn test_mknod_unprivileged_counts_or_succeeds() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("null");

        let mut stats = Stats::default();
        // S_IFCHR | 0666, dev 1:3 (/dev/null); outcome depends on privilege
        create_device_node(&dst, libc::S_IFCHR | 0o666, 0x0103, &mut stats);
        let attempted = stats.num_mknod_d_success
            + stats.num_mknod_d_eacces
            + stats.num_mknod_d_eperm
            + stats.num_mknod_d_e_other;
        assert_eq!(attempted, 1);
    }
}
