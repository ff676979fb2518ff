// src/transaction/lock.rs

//! The database lock
//!
//! One lock file per database path. Acquisition never waits: a second
//! mutating instance is refused immediately.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive hold on `db.lck`; released and removed on drop
#[derive(Debug)]
pub struct TransactionLock {
    _file: File,
    path: PathBuf,
}

impl TransactionLock {
    /// Take the lock or fail with `AlreadyLocked`
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        // No truncate: the holder's pid must survive a failed attempt
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::hold(file, path)
    }

    /// Lock an opened `db.lck`
    ///
    /// The releasing holder unlinks the file before unlocking it, so a lock
    /// won on an inode no longer at `path` is stale.
    fn hold(file: File, path: &Path) -> Result<Self> {
        if file.try_lock_exclusive().is_err() {
            return Err(Error::AlreadyLocked(path.to_path_buf()));
        }
        if !is_linked_at(&file, path) {
            debug!("lock file {} was replaced", path.display());
            return Err(Error::AlreadyLocked(path.to_path_buf()));
        }

        file.set_len(0)?;
        let _ = writeln!(&file, "{}", std::process::id());
        debug!("acquired lock {}", path.display());

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_linked_at(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

impl Drop for TransactionLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        debug!("released lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.lck");

        let lock = TransactionLock::acquire(&path).unwrap();
        match TransactionLock::acquire(&path) {
            Err(Error::AlreadyLocked(p)) => assert_eq!(p, path),
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }

        drop(lock);
        assert!(!path.exists());
        assert!(TransactionLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_released_lock_file_cannot_be_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.lck");

        let first = TransactionLock::acquire(&path).unwrap();
        // Opened before the holder lets go
        let stale = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        drop(first);

        let fresh = TransactionLock::acquire(&path).unwrap();
        match TransactionLock::hold(stale, &path) {
            Err(Error::AlreadyLocked(p)) => assert_eq!(p, path),
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }
        assert!(fresh.path().exists());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("var/lib/pacman/db.lck");
        let lock = TransactionLock::acquire(&path).unwrap();
        assert!(lock.path().exists());
    }
}
