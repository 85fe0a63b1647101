//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--cwd <path>`: Run as if in that directory
//! - `--site <name|path>`: Operate on a site alias or project directory
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// wp-spin - Local WordPress development environments
#[derive(Parser, Debug)]
#[command(name = "wp-spin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if wp-spin was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Site alias or project directory to operate on
    #[arg(long, global = true)]
    pub site: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the project's containers
    #[command(
        name = "start",
        long_about = "Start the project's Docker Compose stack.\n\n\
            Declared host ports that are taken by another project or process are \
            moved to the next free port and the compose file is updated. With \
            --domain the site is also routed through the local reverse proxy.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Start the stack in the current directory
    wp-spin start

    # Start and serve it on a custom hostname over HTTPS
    wp-spin start --domain blog.test --tls

    # First start of a new project: also check disk and memory
    wp-spin start --init"
    )]
    Start {
        /// Route this hostname to the site
        #[arg(long)]
        domain: Option<String>,

        /// Serve the hostname over HTTPS
        #[arg(long, requires = "domain")]
        tls: bool,

        /// Also check free disk space and memory before starting
        #[arg(long)]
        init: bool,
    },

    /// Stop the project's containers
    Stop,

    /// Stop and start the project's containers
    Restart,

    /// Show the state of the project's stack
    #[command(
        name = "status",
        after_help = "\
WORKFLOW EXAMPLES:
    # Human-readable status
    wp-spin status

    # Machine-readable status for scripts
    wp-spin status --json"
    )]
    Status {
        /// Print the stack descriptor as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show container logs
    Logs {
        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,

        /// Only this service
        service: Option<String>,
    },

    /// Manage hostname routes
    Domain {
        #[command(subcommand)]
        action: DomainAction,
    },

    /// Inspect and clean up port allocations
    Ports {
        #[command(subcommand)]
        action: PortsAction,
    },

    /// Manage site aliases
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Share the site through a public tunnel
    #[command(
        name = "share",
        long_about = "Expose the site's primary port through an ngrok tunnel.\n\n\
            Prints the public https URL once the tunnel is up and keeps running \
            until the tunnel agent exits.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Share the running site
    wp-spin share

    # Share a site by alias from anywhere
    wp-spin share --site blog"
    )]
    Share,

    /// Open the site in a browser
    Open,

    /// Diagnose and repair persisted state
    #[command(
        name = "doctor",
        long_about = "Check the container engine and the port, domain and site stores.\n\n\
            Nothing is changed unless --repair or --acknowledge-corrupt is given.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Show problems
    wp-spin doctor

    # Release stale ports, resync routes, prune dead aliases
    wp-spin doctor --repair

    # Resume writes after a corrupt store was set aside
    wp-spin doctor --acknowledge-corrupt"
    )]
    Doctor {
        /// Apply repairs for the issues found
        #[arg(long)]
        repair: bool,

        /// Lift the write refusal on stores that were found corrupt
        #[arg(long)]
        acknowledge_corrupt: bool,
    },

    /// Get, set, or list configuration values
    #[command(
        name = "config",
        long_about = "View or modify wp-spin configuration.\n\n\
            Global configuration lives in config.toml under the storage root \
            (or $WP_SPIN_CONFIG). Keys are dotted paths such as ports.scan_window.",
        after_help = "\
WORKFLOW EXAMPLES:
    # List all configuration values
    wp-spin config list

    # Get a specific value
    wp-spin config get ports.scan_window

    # Set a value
    wp-spin config set ports.bind_retries 5"
    )]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
WORKFLOW EXAMPLES:
    # Bash (add to ~/.bashrc)
    wp-spin completion bash >> ~/.bashrc

    # Fish
    wp-spin completion fish > ~/.config/fish/completions/wp-spin.fish"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Domain subcommands
#[derive(Subcommand, Debug)]
pub enum DomainAction {
    /// Route a hostname to the project's primary port
    Bind {
        /// Hostname, e.g. blog.test
        hostname: String,

        /// Serve over HTTPS
        #[arg(long)]
        tls: bool,

        /// Route to this port instead of the primary port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Remove a hostname route
    Unbind {
        /// Hostname to remove
        hostname: String,
    },
    /// List hostname routes
    List {
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the bindings file from the proxy configuration
    Reconcile,
}

/// Port subcommands
#[derive(Subcommand, Debug)]
pub enum PortsAction {
    /// List port allocations
    List {
        #[arg(long)]
        json: bool,
    },
    /// Release one allocation by key
    Release {
        /// Allocation key as shown by `ports list`
        key: String,
    },
    /// Release allocations of projects that no longer exist
    Gc,
}

/// Site alias subcommands
#[derive(Subcommand, Debug)]
pub enum SitesAction {
    /// Register an alias for a project directory
    Add {
        /// Alias name
        name: String,
        /// Project directory (defaults to the working directory)
        path: Option<PathBuf>,
    },
    /// Remove an alias
    Remove {
        /// Alias name
        name: String,
    },
    /// List aliases
    List {
        #[arg(long)]
        json: bool,
    },
    /// Drop aliases whose directory is gone
    Prune,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },
    /// List all configuration values
    List,
    /// Print the global config file location
    Path,
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
