//! Per-server reconciliation lock
//!
//! Reconciliation holds an exclusive lock scoped to one server name for
//! its whole duration, so two invocations naming the same server can
//! never interleave writes. The lock file lives under `servers/.locks/`,
//! outside the server directory, so acquiring it never creates the
//! server itself. The policy is bounded wait: poll every 100ms up to a
//! timeout, then fail with the distinct, retryable `Locked` error.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::lockfile::LockFile;
use crate::paths::EtsmPaths;

/// How long a second invocation waits before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive lock on one server name, released on drop
#[derive(Debug)]
pub struct ServerLock {
    _lock: LockFile,
}

impl ServerLock {
    /// Acquire the lock for `server_name`, waiting up to `timeout`
    pub fn acquire(paths: &EtsmPaths, server_name: &str, timeout: Duration) -> Result<Self> {
        let lock_path = paths.server_lock_path(server_name);
        match LockFile::acquire_timeout(&lock_path, timeout, POLL_INTERVAL.min(timeout))? {
            Some(lock) => Ok(Self { _lock: lock }),
            None => Err(Error::Locked {
                server: server_name.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_locked() {
        let dir = TempDir::new().unwrap();
        let paths = EtsmPaths::at_root(dir.path());

        let _held = ServerLock::acquire(&paths, "default", Duration::from_millis(50)).unwrap();
        let err = ServerLock::acquire(&paths, "default", Duration::from_millis(120)).unwrap_err();

        assert!(matches!(err, Error::Locked { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        let paths = EtsmPaths::at_root(dir.path());

        let held = ServerLock::acquire(&paths, "default", Duration::from_millis(50)).unwrap();
        drop(held);

        ServerLock::acquire(&paths, "default", Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn test_acquire_does_not_create_the_server_dir() {
        let dir = TempDir::new().unwrap();
        let paths = EtsmPaths::at_root(dir.path());

        let _held = ServerLock::acquire(&paths, "default", Duration::from_millis(50)).unwrap();
        assert!(!paths.server_dir("default").exists());
    }
}
