//! Exclusive lock on a database directory.
//!
//! Only one open handle may own a database directory at a time, whether the
//! competitor lives in another process or in this one. The lock is an
//! OS-level file lock (`flock` on Unix, `LockFileEx` on Windows) on
//! `<dir>/LOCK`, so it disappears with the process even after a crash.

use fs2::FileExt;
use hyperstore_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Lock file name inside the database directory
pub const LOCK_FILE: &str = "LOCK";

/// Held for as long as the database is open; released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock without blocking
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!(path = %path.display(), "acquired database lock");
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => {
                error!(path = %dir.display(), "database directory is already locked");
                Err(Error::Locked(dir.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &io::Error) -> bool {
    // EWOULDBLOCK/EAGAIN: 11 on Linux, 35 on macOS
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        || matches!(err.raw_os_error(), Some(11) | Some(35))
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            error!(path = %self.path.display(), error = %e, "failed to release database lock");
        } else {
            info!(path = %self.path.display(), "released database lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.path(), dir.path().join(LOCK_FILE));
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempdir().unwrap();
        let _first = DirLock::acquire(dir.path()).unwrap();

        let second = DirLock::acquire(dir.path());
        assert!(matches!(second, Err(Error::Locked(_))));
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _lock = DirLock::acquire(dir.path()).unwrap();
        }
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
