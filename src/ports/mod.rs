//! ports
//!
//! Host port probing and the persisted port registry.
//!
//! # Architecture
//!
//! - [`prober`] answers "is this TCP port bound on the host right now?"
//! - [`registry`] reserves ports under allocation keys in `ports.json`
//! - [`mock`] provides a deterministic prober for tests
//!
//! The registry consults the prober for every candidate it hands out, so a
//! port held by a process outside wp-spin is never allocated.

pub mod mock;
pub mod prober;
pub mod registry;

pub use prober::{PortProber, SystemProber};
pub use registry::{PortAllocation, PortRegistry, DEFAULT_SCAN_WINDOW};
