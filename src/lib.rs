//! wp-spin - Local WordPress development environments
//!
//! wp-spin starts Docker Compose stacks for WordPress projects, keeps their
//! host ports from colliding, and routes custom hostnames to them through a
//! local reverse proxy.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates)
//! - [`core`] - Shared types, errors, storage paths, locked JSON stores,
//!   configuration and the subprocess runner
//! - [`ports`] - Port probing and the persistent port registry
//! - [`domain`] - Hostname bindings, proxy route files and TLS issuance
//! - [`stack`] - Compose stack lifecycle, prerequisites and status
//! - [`sites`] - Named aliases for project directories
//! - [`tunnel`] - Public URLs through an ngrok agent
//! - [`doctor`] - Diagnosis and explicit repair of persisted state
//! - [`ui`] - User-facing output
//!
//! # Correctness Invariants
//!
//! 1. No two live projects hold the same host port in the registry
//! 2. A hostname has exactly one route file and one binding record
//! 3. Nothing is allocated or routed before the host prerequisites pass
//! 4. Corrupt stores are set aside, never silently overwritten
//! 5. Repairs are explicit

pub mod cli;
pub mod core;
pub mod doctor;
pub mod domain;
pub mod ports;
pub mod sites;
pub mod stack;
pub mod tunnel;
pub mod ui;
