//! ports::mock
//!
//! Deterministic prober for tests.
//!
//! # Example
//!
//! ```
//! use wpspin::ports::mock::MockProber;
//! use wpspin::ports::PortProber;
//!
//! let prober = MockProber::new().with_busy([8080]);
//! assert!(prober.is_in_use(8080).unwrap());
//! assert!(!prober.is_in_use(8081).unwrap());
//! assert_eq!(prober.probes(), vec![8080, 8081]);
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::prober::PortProber;
use crate::core::errors::SpinError;

/// In-memory prober. Clones share state, so a test can keep a handle
/// while the registry owns another.
#[derive(Debug, Clone, Default)]
pub struct MockProber {
    inner: Arc<Mutex<MockProberInner>>,
}

#[derive(Debug, Default)]
struct MockProberInner {
    busy: HashSet<u16>,
    unavailable: HashSet<u16>,
    probes: Vec<u16>,
}

impl MockProber {
    /// A prober that reports every port free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ports as bound.
    pub fn with_busy(self, ports: impl IntoIterator<Item = u16>) -> Self {
        for port in ports {
            self.set_busy(port);
        }
        self
    }

    /// Mark ports as impossible to probe.
    pub fn with_unavailable(self, ports: impl IntoIterator<Item = u16>) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable.extend(ports);
        }
        self
    }

    /// Mark a port as bound.
    pub fn set_busy(&self, port: u16) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.busy.insert(port);
        }
    }

    /// Mark a port as free again.
    pub fn set_free(&self, port: u16) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.busy.remove(&port);
            inner.unavailable.remove(&port);
        }
    }

    /// Every port probed so far, in order.
    pub fn probes(&self) -> Vec<u16> {
        self.inner
            .lock()
            .map(|inner| inner.probes.clone())
            .unwrap_or_default()
    }
}

impl PortProber for MockProber {
    fn is_in_use(&self, port: u16) -> Result<bool, SpinError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SpinError::ProbeUnavailable {
                port,
                reason: "mock prober poisoned".into(),
            })?;
        inner.probes.push(port);
        if inner.unavailable.contains(&port) {
            return Err(SpinError::ProbeUnavailable {
                port,
                reason: "mock: unavailable".into(),
            });
        }
        Ok(inner.busy.contains(&port))
    }
}
