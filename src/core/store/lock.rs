//! core::store::lock
//!
//! Exclusive lock guarding one store file.
//!
//! # Architecture
//!
//! Every read-modify-write of a persisted store (port registry, domain
//! bindings, site aliases) happens while holding this lock. Two
//! concurrent `wp-spin` invocations touching the same store serialize
//! rather than lose an update.
//!
//! Unlike a fail-fast repository lock, acquisition blocks with polling up to
//! a timeout: a user running `start` in two terminals should see the second
//! one wait, not error.
//!
//! # Storage
//!
//! - `<store>.lock` - Lock file with OS-level exclusive lock
//!
//! # Invariants
//!
//! - The lock is held for the whole load-modify-save sequence
//! - The lock is released on drop (RAII), including on error paths
//!
//! # Example
//!
//! ```ignore
//! use wpspin::core::store::lock::StoreLock;
//! use std::time::Duration;
//!
//! let lock = StoreLock::acquire(&paths.ports_path(), Duration::from_secs(10))?;
//! // read, modify, write ports.json
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

use crate::core::paths::lock_path_for;

/// Default timeout for lock acquisition (10 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval when waiting for lock (100ms).
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process held the lock past the timeout.
    #[error("timed out waiting for {0}")]
    Timeout(PathBuf),

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on one store file.
#[derive(Debug)]
pub struct StoreLock {
    /// Path to the lock file.
    path: PathBuf,
    /// The open file handle with the lock held.
    file: Option<File>,
}

impl StoreLock {
    /// Acquire the lock for `store_path`, blocking up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if the timeout expires before acquiring
    /// - [`LockError::CreateFailed`] / [`LockError::AcquireFailed`] on I/O errors
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(store_path);
        let deadline = Instant::now() + timeout;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LockError::CreateFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        loop {
            if let Some(lock) = Self::try_acquire_at(&path)? {
                debug!(lock = %path.display(), "store lock acquired");
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout(path));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `Ok(Some(lock))` if acquired, `Ok(None)` if already held.
    pub fn try_acquire(store_path: &Path) -> Result<Option<Self>, LockError> {
        let path = lock_path_for(store_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LockError::CreateFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        Self::try_acquire_at(&path)
    }

    fn try_acquire_at(path: &Path) -> Result<Option<Self>, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                file: Some(file),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly.
    ///
    /// This is called automatically on drop.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file_next_to_store() {
        let temp = TempDir::new().expect("create temp dir");
        let store = temp.path().join("nested").join("ports.json");

        let lock = StoreLock::acquire(&store, DEFAULT_LOCK_TIMEOUT).expect("acquire");
        assert!(lock.is_held());
        assert_eq!(lock.path(), temp.path().join("nested").join("ports.json.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_try_acquire_sees_lock_held() {
        let temp = TempDir::new().expect("create temp dir");
        let store = temp.path().join("ports.json");

        let _held = StoreLock::acquire(&store, DEFAULT_LOCK_TIMEOUT).expect("acquire");
        let second = StoreLock::try_acquire(&store).expect("try_acquire");
        assert!(second.is_none());
    }

    #[test]
    fn acquire_times_out_while_held() {
        let temp = TempDir::new().expect("create temp dir");
        let store = temp.path().join("ports.json");

        let _held = StoreLock::acquire(&store, DEFAULT_LOCK_TIMEOUT).expect("acquire");
        let result = StoreLock::acquire(&store, Duration::from_millis(250));
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let temp = TempDir::new().expect("create temp dir");
        let store = temp.path().join("ports.json");
        let held = StoreLock::acquire(&store, DEFAULT_LOCK_TIMEOUT).expect("acquire");

        let (tx, rx) = mpsc::channel();
        let store_clone = store.clone();
        let waiter = thread::spawn(move || {
            let lock = StoreLock::acquire(&store_clone, Duration::from_secs(5));
            tx.send(lock.is_ok()).expect("send");
        });

        thread::sleep(Duration::from_millis(200));
        drop(held);

        assert!(rx.recv().expect("recv"));
        waiter.join().expect("join");
    }

    #[test]
    fn release_is_idempotent() {
        let temp = TempDir::new().expect("create temp dir");
        let store = temp.path().join("ports.json");

        let mut lock = StoreLock::acquire(&store, DEFAULT_LOCK_TIMEOUT).expect("acquire");
        lock.release().expect("first release");
        lock.release().expect("second release");
        assert!(!lock.is_held());

        let again = StoreLock::try_acquire(&store).expect("try_acquire");
        assert!(again.is_some());
    }

    #[test]
    fn poll_interval_is_reasonable() {
        assert!(LOCK_POLL_INTERVAL >= Duration::from_millis(50));
        assert!(LOCK_POLL_INTERVAL <= Duration::from_millis(500));
    }
}
