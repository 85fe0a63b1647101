//! stack::engine
//!
//! The container engine and compose tool, driven through their CLIs.
//!
//! # Contract
//!
//! Only argument shape and exit codes are relied on. Output is streamed to
//! the caller untouched, with one exception: the container listing is
//! filtered by compose's project label and requested in a fixed
//! tab-separated format (`name\tstatus\tports\tproject\tservice`), then
//! parsed by [`parse_container_listing`].

use std::cell::OnceCell;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::errors::SpinError;
use crate::core::process::{self, ProcessError, ProcessOutput};

use super::role::service_of_container;

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

/// One container as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    /// Compose service the container runs.
    pub service: String,
    /// Raw status text, e.g. `Up 3 minutes` or `Exited (0) 2 hours ago`.
    pub status: String,
    /// Published host ports, deduplicated, ascending.
    pub host_ports: Vec<u16>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status.starts_with("Up")
    }
}

/// Operations the stack controller needs from the engine.
pub trait ContainerEngine {
    /// Engine binary is installed.
    fn check_binary(&self) -> Result<(), SpinError>;

    /// Engine daemon answers.
    fn check_daemon(&self) -> Result<(), SpinError>;

    /// A compose implementation is installed.
    fn check_compose(&self) -> Result<(), SpinError>;

    /// Run `compose -p <project> -f <file> <args>` in `project_dir`,
    /// streaming each output line to `sink`.
    fn compose(
        &self,
        project_dir: &Path,
        project_name: &str,
        compose_file: &Path,
        args: &[&str],
        sink: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, SpinError>;

    /// Containers belonging to a compose project, running or not.
    fn list_containers(&self, project_name: &str) -> Result<Vec<ContainerInfo>, SpinError>;
}

/// Engine driven through the `docker` CLI (or a compatible binary).
#[derive(Debug)]
pub struct DockerCli {
    binary: String,
    compose_override: Option<Vec<String>>,
    compose_command: OnceCell<Vec<String>>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, compose_override: Option<Vec<String>>) -> Self {
        Self {
            binary: binary.into(),
            compose_override,
            compose_command: OnceCell::new(),
        }
    }

    fn missing(&self, what: &str) -> SpinError {
        SpinError::PrerequisiteMissing {
            what: what.to_string(),
            hint: "install Docker Desktop or Docker Engine from https://docs.docker.com/get-docker/"
                .into(),
        }
    }

    /// Resolve the compose command: the configured override, the engine's
    /// `compose` plugin, then standalone `docker-compose`.
    fn resolve_compose(&self) -> Result<Vec<String>, SpinError> {
        if let Some(cmd) = self.compose_command.get() {
            return Ok(cmd.clone());
        }

        let candidates: Vec<Vec<String>> = match &self.compose_override {
            Some(cmd) => vec![cmd.clone()],
            None => vec![
                vec![self.binary.clone(), "compose".into()],
                vec!["docker-compose".into()],
            ],
        };

        for candidate in candidates {
            let Some((program, prefix)) = candidate.split_first() else {
                continue;
            };
            let mut args: Vec<&str> = prefix.iter().map(String::as_str).collect();
            args.push("version");
            match process::run(program, &args, None) {
                Ok(out) if out.success() => {
                    debug!(command = ?candidate, "using compose command");
                    let _ = self.compose_command.set(candidate.clone());
                    return Ok(candidate);
                }
                Ok(_) | Err(ProcessError::NotFound(_)) => continue,
                Err(e) => return Err(spawn_error(program, e)),
            }
        }

        Err(SpinError::PrerequisiteMissing {
            what: "docker compose".into(),
            hint: "install the Docker Compose plugin or docker-compose".into(),
        })
    }
}

impl ContainerEngine for DockerCli {
    fn check_binary(&self) -> Result<(), SpinError> {
        match process::run(&self.binary, &["--version"], None) {
            Ok(out) if out.success() => Ok(()),
            Ok(_) | Err(ProcessError::NotFound(_)) => Err(self.missing(&self.binary)),
            Err(e) => Err(spawn_error(&self.binary, e)),
        }
    }

    fn check_daemon(&self) -> Result<(), SpinError> {
        match process::run(&self.binary, &["info"], None) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => {
                debug!(output = %out.combined(), "engine info failed");
                Err(SpinError::PrerequisiteNotRunning {
                    what: format!("{} daemon", self.binary),
                    hint: "start Docker Desktop or the docker service and try again".into(),
                })
            }
            Err(ProcessError::NotFound(_)) => Err(self.missing(&self.binary)),
            Err(e) => Err(spawn_error(&self.binary, e)),
        }
    }

    fn check_compose(&self) -> Result<(), SpinError> {
        self.resolve_compose().map(|_| ())
    }

    fn compose(
        &self,
        project_dir: &Path,
        project_name: &str,
        compose_file: &Path,
        args: &[&str],
        sink: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, SpinError> {
        let command = self.resolve_compose()?;
        let Some((program, prefix)) = command.split_first() else {
            return Err(self.missing("docker compose"));
        };

        let file = compose_file.to_string_lossy().into_owned();
        let mut full: Vec<&str> = prefix.iter().map(String::as_str).collect();
        full.extend(["-p", project_name, "-f", file.as_str()]);
        full.extend_from_slice(args);

        info!(project = project_name, args = ?args, "running compose");
        process::run_streaming(program, &full, Some(project_dir), sink)
            .map_err(|e| spawn_error(program, e))
    }

    fn list_containers(&self, project_name: &str) -> Result<Vec<ContainerInfo>, SpinError> {
        let filter = format!("label={}={}", PROJECT_LABEL, project_name);
        let format = format!(
            "{{{{.Names}}}}\t{{{{.Status}}}}\t{{{{.Ports}}}}\t{{{{.Label \"{}\"}}}}\t{{{{.Label \"{}\"}}}}",
            PROJECT_LABEL, SERVICE_LABEL
        );
        let out = process::run(
            &self.binary,
            &["ps", "-a", "--filter", &filter, "--format", &format],
            None,
        )
        .map_err(|e| match e {
            ProcessError::NotFound(_) => self.missing(&self.binary),
            other => spawn_error(&self.binary, other),
        })?;

        if !out.success() {
            return Err(SpinError::PrerequisiteNotRunning {
                what: format!("{} daemon", self.binary),
                hint: out.combined(),
            });
        }
        Ok(parse_container_listing(&out.stdout, project_name))
    }
}

fn spawn_error(program: &str, err: ProcessError) -> SpinError {
    match err {
        ProcessError::Io { source, .. } => SpinError::io(program, source),
        other => SpinError::io(program, std::io::Error::other(other.to_string())),
    }
}

/// Parse `name\tstatus\tports\tproject\tservice` lines, keeping
/// containers whose compose project label is exactly `project_name`.
///
/// Name prefixes are not trusted: project `blog` must not pick up
/// `blog-shop-wordpress-1`. An empty service label falls back to the
/// container name.
pub fn parse_container_listing(output: &str, project_name: &str) -> Vec<ContainerInfo> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut cols = line.splitn(5, '\t');
            let name = cols.next()?.trim().to_string();
            let status = cols.next().unwrap_or("").trim().to_string();
            let ports = cols.next().unwrap_or("");
            let project = cols.next().unwrap_or("").trim();
            let service = cols.next().unwrap_or("").trim();
            if project != project_name {
                return None;
            }
            let service = if service.is_empty() {
                service_of_container(project_name, &name).to_string()
            } else {
                service.to_string()
            };
            Some(ContainerInfo {
                name,
                service,
                status,
                host_ports: parse_published_ports(ports),
            })
        })
        .collect()
}

/// Host ports from a ports column such as
/// `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 3306/tcp`.
pub fn parse_published_ports(ports: &str) -> Vec<u16> {
    let mut host_ports: Vec<u16> = ports
        .split(',')
        .filter_map(|entry| {
            let (host, _) = entry.trim().split_once("->")?;
            let (_, port) = host.rsplit_once(':')?;
            port.parse().ok()
        })
        .collect();
    host_ports.sort_unstable();
    host_ports.dedup();
    host_ports
}

/// Port named in an engine bind-failure message, if the output is one.
///
/// Recognizes `port is already allocated`, `address already in use` and
/// `Bind for <ip>:<port> failed`.
pub fn detect_bind_conflict(output: &str) -> Option<u16> {
    output.lines().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let is_conflict = lower.contains("port is already allocated")
            || lower.contains("address already in use")
            || (lower.contains("bind for") && lower.contains("failed"));
        if !is_conflict {
            return None;
        }
        line.split_whitespace().find_map(|token| {
            let token = token.trim_end_matches(&[':', ',', ')', ';'][..]);
            let (host, port) = token.rsplit_once(':')?;
            let host_like = host
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_digit() || c == ']' || c == '*' || c == ':');
            host_like.then(|| port.parse::<u16>().ok()).flatten()
        })
    })
}
