use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use wpspin::cli::{self, Cli};

/// Environment variable holding a `tracing` filter, e.g. `wpspin=trace`.
const LOG_ENV: &str = "WP_SPIN_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            wpspin::ui::output::error(format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
