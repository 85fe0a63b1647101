//! domain::mock
//!
//! Test doubles for the proxy reload signal and certificate issuance.
//!
//! # Example
//!
//! ```
//! use wpspin::domain::mock::MockProxy;
//! use wpspin::domain::proxy::ProxyController;
//!
//! let proxy = MockProxy::new();
//! proxy.fail_next_reloads(1);
//! assert!(proxy.reload().is_err());
//! assert!(proxy.reload().is_ok());
//! assert_eq!(proxy.reload_count(), 2);
//! ```

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::proxy::{ProxyController, ProxyError};
use super::tls::{CertificateIssuer, TlsError};
use crate::core::types::Hostname;

/// Proxy whose reloads can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MockProxy {
    inner: Arc<Mutex<MockProxyInner>>,
}

#[derive(Debug, Default)]
struct MockProxyInner {
    reloads: usize,
    failures_remaining: usize,
    always_fail: bool,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` reloads, then succeed.
    pub fn fail_next_reloads(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_remaining = n;
        }
    }

    /// Fail every reload until changed.
    pub fn set_always_fail(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.always_fail = fail;
        }
    }

    /// Number of reload attempts, failed ones included.
    pub fn reload_count(&self) -> usize {
        self.inner.lock().map(|i| i.reloads).unwrap_or_default()
    }
}

impl ProxyController for MockProxy {
    fn reload(&self) -> Result<(), ProxyError> {
        let mut inner = self.inner.lock().map_err(|_| ProxyError::Rejected {
            code: None,
            output: "mock proxy poisoned".into(),
        })?;
        inner.reloads += 1;
        if inner.always_fail || inner.failures_remaining > 0 {
            inner.failures_remaining = inner.failures_remaining.saturating_sub(1);
            return Err(ProxyError::Rejected {
                code: Some(1),
                output: "nginx: [emerg] mock failure".into(),
            });
        }
        Ok(())
    }
}

/// Issuer that writes placeholder PEM files.
#[derive(Debug, Clone, Default)]
pub struct MockIssuer {
    inner: Arc<Mutex<MockIssuerInner>>,
}

#[derive(Debug, Default)]
struct MockIssuerInner {
    issued: Vec<Hostname>,
    fail: bool,
}

impl MockIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every issuance fail.
    pub fn set_fail(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail = fail;
        }
    }

    /// Hostnames issued so far, in order.
    pub fn issued(&self) -> Vec<Hostname> {
        self.inner
            .lock()
            .map(|i| i.issued.clone())
            .unwrap_or_default()
    }
}

impl CertificateIssuer for MockIssuer {
    fn issue(&self, hostname: &Hostname, cert: &Path, key: &Path) -> Result<(), TlsError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TlsError::Failed("mock issuer poisoned".into()))?;
        if inner.fail {
            return Err(TlsError::Failed("mock: CA not installed".into()));
        }
        if let Some(dir) = cert.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(cert, format!("CERT {}\n", hostname))?;
        fs::write(key, format!("KEY {}\n", hostname))?;
        inner.issued.push(hostname.clone());
        Ok(())
    }
}
