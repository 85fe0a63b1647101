//! share command - Expose the site through a public tunnel

use anyhow::{anyhow, Context as _, Result};

use crate::cli::context::{Context, Workspace};
use crate::stack::{PrereqScope, StackStatus};
use crate::tunnel::{NgrokInspector, Tunnel};
use crate::ui::output::{self, Verbosity};

/// Open a tunnel to the primary port and keep it up until the agent exits.
pub fn share(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let descriptor = ws
        .controller(PrereqScope::Operate)?
        .status()
        .context("Failed to read stack status")?;
    if descriptor.status != StackStatus::Running {
        return Err(anyhow!(
            "{} is {}; start it before sharing",
            ws.project.dir_name(),
            descriptor.status
        ));
    }
    let port = descriptor
        .primary_port()
        .ok_or_else(|| anyhow!("{} publishes no port to share", ws.project.dir_name()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let inspector = NgrokInspector::new(ws.config.tunnel_api_url());
    let binary = ws.config.tunnel_binary();
    output::print(format!("Starting {} for port {}...", binary, port), verbosity);

    let tunnel = runtime
        .block_on(Tunnel::open(
            binary,
            port,
            &inspector,
            ws.config.tunnel_timeout(),
        ))
        .context("Failed to open tunnel")?;

    // The URL is the point of the command, so it prints even with --quiet.
    output::print(&tunnel.public_url, Verbosity::Normal);
    output::print("Press Ctrl+C to stop sharing.", verbosity);

    let code = tunnel.wait().context("Tunnel agent failed")?;
    match code {
        Some(0) | None => Ok(()),
        Some(code) => Err(anyhow!("tunnel agent exited with code {}", code)),
    }
}
