//! core::errors
//!
//! Error taxonomy shared by the port registry, domain router and stack
//! controller.
//!
//! # Propagation
//!
//! - Prerequisite and resource errors abort immediately; the user has to fix
//!   the host environment.
//! - [`SpinError::ProbeUnavailable`] is never treated as "port free". The
//!   allocator skips the candidate.
//! - [`SpinError::PortBindConflict`] triggers a bounded retry in the stack
//!   controller.
//! - [`SpinError::RegistryCorrupt`] is raised for writes against a
//!   quarantined store until the corruption is acknowledged.
//! - Everything else is surfaced verbatim with hostname, port or project
//!   path attached.

use std::path::PathBuf;

use thiserror::Error;

/// Stable classification of a [`SpinError`].
///
/// # Example
///
/// ```
/// use wpspin::core::errors::{ErrorKind, SpinError};
///
/// let err = SpinError::PrerequisiteNotRunning {
///     what: "docker daemon".into(),
///     hint: "start Docker Desktop".into(),
/// };
/// assert_eq!(err.kind(), ErrorKind::PrerequisiteNotRunning);
/// assert!(err.is_environmental());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PrerequisiteMissing,
    PrerequisiteNotRunning,
    ResourceInsufficient,
    ProbeUnavailable,
    NoPortAvailable,
    PortBindConflict,
    StackOperationFailed,
    RouteActivationFailed,
    RegistryCorrupt,
    InvalidHostname,
    StoreLocked,
    Io,
    Config,
}

/// Errors surfaced by the lifecycle and network allocation engine.
#[derive(Debug, Error)]
pub enum SpinError {
    /// A required tool (container engine, compose) is not installed.
    #[error("{what} is not installed: {hint}")]
    PrerequisiteMissing { what: String, hint: String },

    /// The container engine daemon cannot be reached.
    #[error("{what} is not running: {hint}")]
    PrerequisiteNotRunning { what: String, hint: String },

    /// Not enough disk or memory headroom.
    #[error("insufficient {resource}: {available_mb} MB available, {required_mb} MB required")]
    ResourceInsufficient {
        resource: String,
        available_mb: u64,
        required_mb: u64,
    },

    /// The host socket table could not be queried for this port.
    #[error("cannot determine whether port {port} is in use: {reason}")]
    ProbeUnavailable { port: u16, reason: String },

    /// The allocation scan window was exhausted.
    #[error(
        "no free port for '{key}' in {window} candidates starting at {preferred} \
         ({unprobeable} could not be probed)"
    )]
    NoPortAvailable {
        key: String,
        preferred: u16,
        window: u32,
        unprobeable: u32,
    },

    /// A port believed free was rejected by the engine or is held by another key.
    #[error("port {port} is already taken ({detail})")]
    PortBindConflict { port: u16, detail: String },

    /// The engine or compose tool exited non-zero.
    #[error(
        "{operation} failed for {project} (exit code {}):\n{output}",
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
    )]
    StackOperationFailed {
        operation: String,
        project: PathBuf,
        exit_code: Option<i32>,
        output: String,
    },

    /// The reverse proxy refused to activate a route.
    #[error("could not activate route for {hostname} (port {port}): {reason}")]
    RouteActivationFailed {
        hostname: String,
        port: u16,
        reason: String,
    },

    /// A persisted store could not be parsed and has been quarantined.
    #[error(
        "{} is corrupt; original preserved at {}. Run `wp-spin doctor --acknowledge-corrupt` to resume writes",
        path.display(),
        aside.display()
    )]
    RegistryCorrupt { path: PathBuf, aside: PathBuf },

    /// Hostname failed syntax validation.
    #[error("invalid hostname '{hostname}': {reason}")]
    InvalidHostname { hostname: String, reason: String },

    /// Another invocation held a store lock for too long.
    #[error("timed out waiting for lock on {}", path.display())]
    StoreLocked { path: PathBuf },

    /// Filesystem error with the offending path.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SpinError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpinError::PrerequisiteMissing { .. } => ErrorKind::PrerequisiteMissing,
            SpinError::PrerequisiteNotRunning { .. } => ErrorKind::PrerequisiteNotRunning,
            SpinError::ResourceInsufficient { .. } => ErrorKind::ResourceInsufficient,
            SpinError::ProbeUnavailable { .. } => ErrorKind::ProbeUnavailable,
            SpinError::NoPortAvailable { .. } => ErrorKind::NoPortAvailable,
            SpinError::PortBindConflict { .. } => ErrorKind::PortBindConflict,
            SpinError::StackOperationFailed { .. } => ErrorKind::StackOperationFailed,
            SpinError::RouteActivationFailed { .. } => ErrorKind::RouteActivationFailed,
            SpinError::RegistryCorrupt { .. } => ErrorKind::RegistryCorrupt,
            SpinError::InvalidHostname { .. } => ErrorKind::InvalidHostname,
            SpinError::StoreLocked { .. } => ErrorKind::StoreLocked,
            SpinError::Io { .. } => ErrorKind::Io,
            SpinError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for errors the user must fix on the host (never retried).
    pub fn is_environmental(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PrerequisiteMissing
                | ErrorKind::PrerequisiteNotRunning
                | ErrorKind::ResourceInsufficient
        )
    }

    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SpinError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T, E = SpinError> = std::result::Result<T, E>;
