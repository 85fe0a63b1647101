//! domain command - Bind, unbind, list and reconcile hostname routes

use anyhow::{anyhow, Context as _, Result};

use crate::cli::context::{Context, Workspace};
use crate::core::types::Hostname;
use crate::domain::{DomainBinding, ReconcileReport};
use crate::stack::PrereqScope;
use crate::ui::output::{self, Verbosity};

/// Route `hostname` to the project's primary port (or `port`).
pub fn bind(ctx: &Context, hostname: &str, tls: bool, port: Option<u16>) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let hostname = Hostname::new(hostname).context("Invalid hostname")?;

    let port = match port {
        Some(port) => port,
        None => {
            let descriptor = ws
                .controller(PrereqScope::Operate)?
                .status()
                .context("Failed to read stack status")?;
            descriptor.primary_port().ok_or_else(|| {
                anyhow!(
                    "{} declares no port for its primary service; pass --port",
                    ws.project.dir_name()
                )
            })?
        }
    };

    let binding = ws
        .router()
        .bind(&hostname, port, tls, ws.project.path())
        .with_context(|| format!("Failed to bind {}", hostname))?;
    output::success(format!("{} -> {}", binding.url(), binding.port), verbosity);
    Ok(())
}

pub fn unbind(ctx: &Context, hostname: &str) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let hostname = Hostname::new(hostname).context("Invalid hostname")?;
    match ws
        .router()
        .unbind(&hostname)
        .with_context(|| format!("Failed to unbind {}", hostname))?
    {
        Some(_) => output::success(format!("Unbound {}", hostname), verbosity),
        None => output::print(format!("{} was not bound", hostname), verbosity),
    }
    Ok(())
}

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let bindings = ws.router().list().context("Failed to read bindings")?;
    if json {
        output::json(&bindings)?;
    } else if bindings.is_empty() {
        output::print("No hostnames bound.", ctx.verbosity());
    } else {
        output::print(format_bindings(&bindings), Verbosity::Normal);
    }
    Ok(())
}

/// Rebuild `domains.json` from the proxy route files.
pub fn reconcile(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let report = ws.router().reconcile().context("Failed to reconcile bindings")?;
    output::print(format_report(&report), verbosity);
    Ok(())
}

fn format_bindings(bindings: &[DomainBinding]) -> String {
    let rows: Vec<Vec<String>> = bindings
        .iter()
        .map(|b| {
            vec![
                b.hostname.to_string(),
                b.port.to_string(),
                if b.tls_enabled { "yes" } else { "no" }.to_string(),
                b.project_path.display().to_string(),
            ]
        })
        .collect();
    output::format_table(&["HOSTNAME", "PORT", "TLS", "PROJECT"], &rows)
}

fn format_report(report: &ReconcileReport) -> String {
    if report.is_clean() {
        return "Bindings already match the proxy configuration.".to_string();
    }
    let mut lines = Vec::new();
    for (label, hosts) in [
        ("added", &report.added),
        ("updated", &report.updated),
        ("removed", &report.removed),
    ] {
        for host in hosts {
            lines.push(format!("{:<8} {}", label, host));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_each_change() {
        let report = ReconcileReport {
            added: vec![Hostname::new("new.test").unwrap()],
            updated: vec![],
            removed: vec![Hostname::new("old.test").unwrap()],
        };
        assert_eq!(format_report(&report), "added    new.test\nremoved  old.test");
        assert!(format_report(&ReconcileReport::default()).contains("already match"));
    }
}
