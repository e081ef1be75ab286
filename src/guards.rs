//! Centralized invariant checks shared by every `inode_fs` operation, per
//! spec.md §2 ("Guards: is-directory, is-readable, not-root, ...").
//! Keeping these in one place is what makes the POSIX errno table in
//! spec.md §4.2.1 consistent across operations instead of being
//! re-derived ad hoc at each call site.

use crate::error::FsError;
use crate::store::schema::ROOT_INO;

pub const S_IFMT: i64 = 0o170000;
pub const S_IFREG: i64 = 0o100000;
pub const S_IFDIR: i64 = 0o040000;
pub const S_IFLNK: i64 = 0o120000;

pub fn is_dir(mode: i64) -> bool {
    mode & S_IFMT == S_IFDIR
}

pub fn is_regular(mode: i64) -> bool {
    mode & S_IFMT == S_IFREG
}

pub fn is_symlink(mode: i64) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// Options accepted by `rm`, normalized to their spec defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmOptions {
    pub force: bool,
    pub recursive: bool,
}

pub fn normalize_rm_options(opts: Option<RmOptions>) -> RmOptions {
    opts.unwrap_or_default()
}

pub fn require_not_root(ino: i64, path: &str, syscall: &'static str) -> Result<(), FsError> {
    if ino == ROOT_INO {
        Err(FsError::new("EPERM", syscall, path))
    } else {
        Ok(())
    }
}

pub fn require_dir(mode: i64, path: &str, syscall: &'static str) -> Result<(), FsError> {
    if is_dir(mode) {
        Ok(())
    } else {
        Err(FsError::new("ENOTDIR", syscall, path))
    }
}

/// Used where the operation needs a regular file and must reject a
/// directory target (`EISDIR`) — e.g. `readFile`, `writeFile` on an
/// existing path, `copyFile` destination.
pub fn require_not_dir(mode: i64, path: &str, syscall: &'static str) -> Result<(), FsError> {
    if is_dir(mode) {
        Err(FsError::new("EISDIR", syscall, path))
    } else {
        Ok(())
    }
}

/// Symlinks are not supported as targets of `rm`/`rename`/`copyFile`
/// per spec.md §9's open question; surfaced as an explicit ENOSYS-class
/// error rather than silently mishandled as a regular file.
pub fn reject_symlink(mode: i64, path: &str, syscall: &'static str) -> Result<(), FsError> {
    if is_symlink(mode) {
        Err(FsError::new(
            "ENOSYS",
            syscall,
            format!("{path}: symlink not supported"),
        ))
    } else {
        Ok(())
    }
}
