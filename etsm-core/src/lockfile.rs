//! Advisory file locks for cross-invocation exclusivity
//!
//! Locks are taken on dedicated lock files, never on payload files, so a
//! stale lock file is harmless: the advisory lock dies with the process
//! holding it. The guard releases on drop.

use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// An exclusive advisory lock on a dedicated lock file
#[derive(Debug)]
pub struct LockFile {
    // Held for its flock; releases when the handle drops
    _file: File,
    path: PathBuf,
}

impl LockFile {
    /// Block until the lock is acquired
    pub fn acquire_blocking(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|e| Error::io(path, e))?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Poll for the lock every `poll` until `timeout` elapses
    ///
    /// Returns `Ok(None)` on timeout; the caller decides how to surface
    /// the conflict.
    pub fn acquire_timeout(path: &Path, timeout: Duration, poll: Duration) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Some(Self {
                        _file: file,
                        path: path.to_path_buf(),
                    }))
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(poll);
                }
                Err(e) => return Err(Error::io(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.lock");

        let guard = LockFile::acquire_blocking(&path).unwrap();
        drop(guard);

        // Reacquirable after drop
        let _guard = LockFile::acquire_blocking(&path).unwrap();
    }

    #[test]
    fn test_timeout_when_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.lock");

        let _held = LockFile::acquire_blocking(&path).unwrap();

        let second = LockFile::acquire_timeout(
            &path,
            Duration::from_millis(150),
            Duration::from_millis(20),
        )
        .unwrap();
        assert!(second.is_none());
    }
}
