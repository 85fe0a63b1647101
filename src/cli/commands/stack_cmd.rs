//! stack commands - start, stop, restart, status, logs, open

use anyhow::{anyhow, Context as _, Result};

use crate::cli::context::{Context, Workspace};
use crate::core::config::Config;
use crate::core::types::Hostname;
use crate::stack::role::ContainerRole;
use crate::stack::{PortChange, PrereqScope, StackDescriptor, StackOperation, StackStatus};
use crate::ui::output::{self, Verbosity};

/// Start the stack, optionally routing a hostname to it.
pub fn start(ctx: &Context, domain: Option<&str>, tls: bool, init: bool) -> Result<()> {
    let verbosity = ctx.verbosity();
    let mut ws = Workspace::open(ctx)?;

    // A --domain given here wins over the project config for this run and
    // is saved once the stack is up.
    let requested = domain
        .map(|d| Hostname::new(d).context("Invalid --domain"))
        .transpose()?;
    if let Some(hostname) = &requested {
        let project = ws.config.project.get_or_insert_with(Default::default);
        project.domain = Some(hostname.to_string());
        project.tls = Some(tls);
    }

    let scope = if init {
        PrereqScope::Init
    } else {
        PrereqScope::Operate
    };
    let controller = ws.controller(scope)?;
    let changes = controller
        .apply(StackOperation::Start, &mut |line: &str| output::debug(line, verbosity))
        .with_context(|| format!("Failed to start {}", ws.project))?;
    report_port_changes(&changes, verbosity);

    let descriptor = controller.status().context("Failed to read stack status")?;
    let router = ws.router();
    if let Some(domain) = ws.config.project_domain() {
        let hostname = Hostname::new(domain).context("Invalid project domain")?;
        let port = descriptor
            .primary_port()
            .ok_or_else(|| anyhow!("No primary port to route {} to", hostname))?;
        router
            .bind(&hostname, port, ws.config.project_tls(), ws.project.path())
            .with_context(|| format!("Failed to route {}", hostname))?;
    }

    if requested.is_some() {
        if let Some(project) = &ws.config.project {
            Config::write_project(ws.project.path(), project)
                .context("Failed to save the project domain")?;
        }
    }

    match controller.primary_url(&descriptor, &router)? {
        Some(url) => output::success(format!("{} is running at {}", ws.project.dir_name(), url), verbosity),
        None => output::success(format!("{} is running", ws.project.dir_name()), verbosity),
    }
    Ok(())
}

/// Stop the stack. Hostname routes are kept.
pub fn stop(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let controller = ws.controller(PrereqScope::Operate)?;
    controller
        .apply(StackOperation::Stop, &mut |line: &str| output::debug(line, verbosity))
        .with_context(|| format!("Failed to stop {}", ws.project))?;
    output::success(format!("{} stopped", ws.project.dir_name()), verbosity);
    Ok(())
}

pub fn restart(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let controller = ws.controller(PrereqScope::Operate)?;
    let changes = controller
        .apply(StackOperation::Restart, &mut |line: &str| output::debug(line, verbosity))
        .with_context(|| format!("Failed to restart {}", ws.project))?;
    report_port_changes(&changes, verbosity);
    output::success(format!("{} restarted", ws.project.dir_name()), verbosity);
    Ok(())
}

pub fn status(ctx: &Context, json: bool) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let controller = ws.controller(PrereqScope::Operate)?;
    let descriptor = controller.status().context("Failed to read stack status")?;

    if json {
        output::json(&descriptor)?;
        return Ok(());
    }

    if let Some(reason) = &descriptor.engine_error {
        output::warn(format!("cannot read containers: {}", reason), verbosity);
    }
    let router = ws.router();
    output::print(format_status(&descriptor), Verbosity::Normal);
    if descriptor.status == StackStatus::Running {
        if let Some(url) = controller.primary_url(&descriptor, &router)? {
            output::print(format!("URL:      {}", url), Verbosity::Normal);
        }
    }
    if !descriptor.containers.is_empty() {
        output::print("", verbosity);
        output::print(format_containers(&descriptor), verbosity);
    }
    Ok(())
}

pub fn logs(ctx: &Context, follow: bool, service: Option<&str>) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let controller = ws.controller(PrereqScope::Operate)?;
    controller
        .logs(follow, service, &mut |line: &str| println!("{}", line))
        .context("Failed to read logs")?;
    Ok(())
}

/// Open the site's URL in the default browser.
pub fn open(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let controller = ws.controller(PrereqScope::Operate)?;
    let descriptor = controller.status().context("Failed to read stack status")?;
    if descriptor.status != StackStatus::Running {
        return Err(anyhow!(
            "{} is {}; start it with 'wp-spin start'",
            ws.project.dir_name(),
            descriptor.status
        ));
    }

    let router = ws.router();
    let url = controller
        .primary_url(&descriptor, &router)?
        .ok_or_else(|| anyhow!("{} publishes no port to open", ws.project.dir_name()))?;
    output::print(format!("Opening {}", url), verbosity);
    open::that(&url).with_context(|| format!("Failed to open {}", url))?;
    Ok(())
}

fn report_port_changes(changes: &[PortChange], verbosity: Verbosity) {
    for change in changes {
        output::warn(
            format!(
                "port {} for {} was taken; using {} (compose file updated)",
                change.from, change.service, change.to
            ),
            verbosity,
        );
    }
}

fn format_status(descriptor: &StackDescriptor) -> String {
    let mut lines = vec![
        format!(
            "Project:  {} ({})",
            descriptor.project_name,
            descriptor.project_root.display()
        ),
        format!("Status:   {}", descriptor.status),
    ];
    for (role, ports) in &descriptor.published_ports {
        if ports.is_empty() {
            continue;
        }
        let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
        lines.push(format!("{:<9} {}", format!("{}:", role.label()), ports.join(", ")));
    }
    lines.join("\n")
}

fn format_containers(descriptor: &StackDescriptor) -> String {
    let rows: Vec<Vec<String>> = descriptor
        .containers
        .iter()
        .map(|c| {
            let ports: Vec<String> = c.host_ports.iter().map(u16::to_string).collect();
            vec![
                c.name.clone(),
                ContainerRole::classify(&c.service).label().to_string(),
                c.status.clone(),
                ports.join(","),
            ]
        })
        .collect();
    output::format_table(&["CONTAINER", "ROLE", "STATUS", "PORTS"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ContainerInfo;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn descriptor() -> StackDescriptor {
        let mut published_ports = BTreeMap::new();
        published_ports.insert(ContainerRole::Primary, vec![8080]);
        published_ports.insert(ContainerRole::AdminUi, vec![8081]);
        StackDescriptor {
            project_root: PathBuf::from("/sites/blog"),
            project_name: "blog".into(),
            service_names: vec!["wordpress".into(), "phpmyadmin".into()],
            declared_ports: BTreeMap::new(),
            containers: vec![
                ContainerInfo {
                    name: "blog-wordpress-1".into(),
                    service: "wordpress".into(),
                    status: "Up 2 minutes".into(),
                    host_ports: vec![8080],
                },
                ContainerInfo {
                    name: "blog-phpmyadmin-1".into(),
                    service: "phpmyadmin".into(),
                    status: "Up 2 minutes".into(),
                    host_ports: vec![8081],
                },
            ],
            published_ports,
            primary_service: Some("wordpress".into()),
            status: StackStatus::Running,
            engine_error: None,
        }
    }

    #[test]
    fn status_lists_ports_by_role() {
        let text = format_status(&descriptor());
        assert!(text.contains("Status:   running"));
        assert!(text.contains("app:      8080"));
        assert!(text.contains("admin:    8081"));
    }

    #[test]
    fn container_table_shows_roles() {
        let table = format_containers(&descriptor());
        assert!(table.lines().nth(1).unwrap().contains("app"));
        assert!(table.lines().nth(2).unwrap().contains("admin"));
    }
}
