//! ui
//!
//! User-facing output.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing and table/JSON formatting
//!
//! # Design
//!
//! Command handlers print through this module only. Diagnostic logging goes
//! through `tracing` instead and is controlled by `--debug` / `WP_SPIN_LOG`.

pub mod output;
