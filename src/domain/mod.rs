//! domain
//!
//! Custom hostnames for local stacks.
//!
//! # Architecture
//!
//! - [`router`] owns the bindings file and the bind/unbind transaction
//! - [`proxy`] renders route files and signals the reverse proxy
//! - [`tls`] issues certificates for TLS-enabled routes
//! - [`mock`] provides proxy and issuer doubles for tests
//!
//! The proxy configuration directory is authoritative. The bindings file is
//! a fast index over it that [`DomainRouter::reconcile`] can rebuild.

pub mod mock;
pub mod proxy;
pub mod router;
pub mod tls;

pub use proxy::{CommandProxy, ProxyController, ProxyError, RouteSpec};
pub use router::{DomainBinding, DomainRouter, ReconcileReport};
pub use tls::{CertificateIssuer, MkcertIssuer, TlsError};
