//! core::store
//!
//! File-backed JSON document with a single mutation path.
//!
//! # Architecture
//!
//! Each persisted registry is an explicit repository type constructed per
//! invocation from a file path. All mutation goes through
//! [`JsonStore::update`], which performs load-lock-modify-save-unlock:
//!
//! 1. Acquire `<file>.lock` (blocking, bounded)
//! 2. Refuse if the store is quarantined
//! 3. Read and parse the whole document
//! 4. Apply the caller's closure
//! 5. Write a temp file, fsync, rename over the original
//! 6. Release the lock (on drop, on every exit path)
//!
//! # Corruption
//!
//! A document that fails to parse is never overwritten. It is renamed to
//! `<file>.corrupt-<timestamp>`, a `<file>.quarantine` marker records where
//! it went, reads proceed as if the store were empty, and writes fail with
//! [`SpinError::RegistryCorrupt`] until [`JsonStore::acknowledge_corruption`]
//! removes the marker.

pub mod lock;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use self::lock::{LockError, StoreLock, DEFAULT_LOCK_TIMEOUT};
use super::errors::SpinError;
use super::paths::quarantine_path_for;

/// A JSON document persisted at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    lock_timeout: Duration,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Create a store at `path` with the default lock timeout.
    pub fn new(path: PathBuf) -> Self {
        Self::with_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store with an explicit lock timeout.
    pub fn with_timeout(path: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            path,
            lock_timeout,
            _doc: PhantomData,
        }
    }

    /// Path of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current document.
    ///
    /// A missing file reads as the default document. A corrupt file is
    /// quarantined and also reads as the default document.
    pub fn load(&self) -> Result<T, SpinError> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let _lock = self.lock()?;
        self.read_locked()
    }

    /// Apply `mutate` to the document and persist the result atomically.
    ///
    /// The closure's error aborts the update without writing.
    ///
    /// # Errors
    ///
    /// - [`SpinError::RegistryCorrupt`] if the store is quarantined
    /// - [`SpinError::StoreLocked`] if the lock could not be acquired in time
    /// - any error returned by `mutate`
    pub fn update<R>(
        &self,
        mutate: impl FnOnce(&mut T) -> Result<R, SpinError>,
    ) -> Result<R, SpinError> {
        let _lock = self.lock()?;

        let mut doc = self.read_locked()?;
        if let Some(aside) = self.quarantined() {
            return Err(SpinError::RegistryCorrupt {
                path: self.path.clone(),
                aside,
            });
        }

        let result = mutate(&mut doc)?;
        self.write_locked(&doc)?;
        Ok(result)
    }

    /// Location of the quarantined copy, if writes are currently refused.
    pub fn quarantined(&self) -> Option<PathBuf> {
        let marker = quarantine_path_for(&self.path);
        fs::read_to_string(marker)
            .ok()
            .map(|content| PathBuf::from(content.trim()))
    }

    /// Lift the write refusal after a corruption. The aside copy is kept.
    ///
    /// Returns `true` if a quarantine was lifted.
    pub fn acknowledge_corruption(&self) -> Result<bool, SpinError> {
        let _lock = self.lock()?;
        let marker = quarantine_path_for(&self.path);
        if !marker.exists() {
            return Ok(false);
        }
        fs::remove_file(&marker).map_err(|e| SpinError::io(&marker, e))?;
        Ok(true)
    }

    fn lock(&self) -> Result<StoreLock, SpinError> {
        StoreLock::acquire(&self.path, self.lock_timeout).map_err(|e| match e {
            LockError::Timeout(_) => SpinError::StoreLocked {
                path: self.path.clone(),
            },
            other => SpinError::io(&self.path, std::io::Error::other(other.to_string())),
        })
    }

    fn read_locked(&self) -> Result<T, SpinError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(SpinError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(T::default());
        }

        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(parse_err) => {
                let aside = self.quarantine(&parse_err.to_string())?;
                warn!(
                    store = %self.path.display(),
                    aside = %aside.display(),
                    error = %parse_err,
                    "store is corrupt; treating as empty and refusing writes"
                );
                Ok(T::default())
            }
        }
    }

    fn quarantine(&self, reason: &str) -> Result<PathBuf, SpinError> {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
        let aside = self.path.with_file_name(name);

        fs::rename(&self.path, &aside).map_err(|e| SpinError::io(&self.path, e))?;
        let marker = quarantine_path_for(&self.path);
        fs::write(&marker, aside.to_string_lossy().as_bytes())
            .map_err(|e| SpinError::io(&marker, e))?;
        debug!(reason, "quarantined {}", self.path.display());
        Ok(aside)
    }

    fn write_locked(&self, doc: &T) -> Result<(), SpinError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SpinError::io(parent, e))?;
        }

        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| SpinError::io(&self.path, std::io::Error::other(e)))?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// Write `content` to `path` through a unique temp file and a rename.
///
/// Readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), SpinError> {
    let mut temp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(format!(".tmp-{}", Uuid::new_v4().simple()));
    let temp_path = path.with_file_name(temp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| SpinError::io(&temp_path, e))?;
        file.write_all(content)
            .map_err(|e| SpinError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| SpinError::io(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        SpinError::io(path, e)
    })
}
