//! cli
//!
//! Command-line interface layer for wp-spin.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Resolve the project and open the stores for one invocation
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to
//! handlers that call the library ([`crate::stack`], [`crate::domain`],
//! [`crate::ports`], [`crate::sites`]). Errors are `anyhow` with context
//! here; library modules keep their typed errors.

pub mod args;
pub mod commands;
pub mod context;

pub use args::{Cli, Shell};
pub use context::{Context, Workspace};

use anyhow::Result;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run(cli: Cli) -> Result<()> {
    let ctx = Context {
        cwd: cli.cwd.clone(),
        site: cli.site.clone(),
        debug: cli.debug,
        quiet: cli.quiet,
    };

    commands::dispatch(cli.command, &ctx)
}
