//! core
//!
//! Shared building blocks for the port registry, domain router and stack
//! controller.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Hostname, ProjectRoot, AllocationKey
//! - [`errors`] - The error taxonomy surfaced to the command layer
//! - [`paths`] - Centralized path routing for wp-spin storage
//! - [`config`] - Configuration schema and loading
//! - [`store`] - Locked, atomic JSON documents
//! - [`process`] - The single doorway for external tools
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid keys from reaching disk
//! - Every persisted registry is an explicit repository, never a singleton
//! - External tools are the source of truth for runtime state

pub mod config;
pub mod errors;
pub mod paths;
pub mod process;
pub mod store;
pub mod types;
