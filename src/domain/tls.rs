//! domain::tls
//!
//! Certificate issuance for TLS-enabled routes.
//!
//! Material is written to `<root>/certs/<hostname>.pem` and
//! `<root>/certs/<hostname>-key.pem`. Locations are derived from the
//! hostname and never stored in the bindings file.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::core::process::{self, ProcessError};
use crate::core::types::Hostname;

/// Errors from certificate issuance.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error("certificate issuer failed: {0}")]
    Failed(String),

    #[error("cannot prepare certificate directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Issues a locally trusted certificate for a hostname.
pub trait CertificateIssuer {
    fn issue(&self, hostname: &Hostname, cert: &Path, key: &Path) -> Result<(), TlsError>;
}

/// `mkcert`-compatible issuer.
#[derive(Debug, Clone)]
pub struct MkcertIssuer {
    binary: String,
}

impl MkcertIssuer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CertificateIssuer for MkcertIssuer {
    fn issue(&self, hostname: &Hostname, cert: &Path, key: &Path) -> Result<(), TlsError> {
        if let Some(dir) = cert.parent() {
            fs::create_dir_all(dir)?;
        }
        let cert_arg = cert.to_string_lossy();
        let key_arg = key.to_string_lossy();
        let out = process::run(
            &self.binary,
            &["-cert-file", &cert_arg, "-key-file", &key_arg, hostname.as_str()],
            None,
        )?;
        if !out.success() {
            return Err(TlsError::Failed(out.combined()));
        }
        info!(hostname = %hostname, "issued certificate");
        Ok(())
    }
}
