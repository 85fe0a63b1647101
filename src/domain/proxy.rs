//! domain::proxy
//!
//! Reverse-proxy route files and the reload signal.
//!
//! # Route files
//!
//! One nginx `server` block per hostname in `<root>/proxy/conf.d/`. The
//! first line is a machine-readable header so the binding store can be
//! re-derived from the directory:
//!
//! ```text
//! # wp-spin-route host=blog.test port=8080 tls=false project=/sites/blog
//! ```
//!
//! `project` is always last and runs to the end of the line, so paths with
//! spaces survive. Files without the header are not ours and are ignored.
//!
//! The proxy container is expected to mount `<root>/proxy/conf.d` at
//! `/etc/nginx/conf.d` and `<root>/certs` at [`CONTAINER_CERT_DIR`].

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::errors::SpinError;
use crate::core::process::{self, ProcessError};
use crate::core::types::Hostname;

/// Header marker on the first line of every generated route.
pub const ROUTE_HEADER: &str = "# wp-spin-route";

/// Where the proxy container sees `<root>/certs`.
pub const CONTAINER_CERT_DIR: &str = "/etc/nginx/certs";

/// The facts a route file encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub hostname: Hostname,
    pub port: u16,
    pub tls: bool,
    pub project: PathBuf,
}

impl RouteSpec {
    /// Render the full nginx config for this route.
    pub fn render(&self, upstream_host: &str) -> String {
        let host = self.hostname.as_str();
        let upstream = format!("http://{}:{}", upstream_host, self.port);
        let mut out = String::new();

        out.push_str(&format!(
            "{} host={} port={} tls={} project={}\n",
            ROUTE_HEADER,
            host,
            self.port,
            self.tls,
            self.project.display()
        ));
        out.push_str("# Generated by wp-spin; rewritten on every bind.\n\n");

        if self.tls {
            out.push_str(&format!(
                "server {{\n    listen 80;\n    server_name {host};\n    return 301 https://$host$request_uri;\n}}\n\n"
            ));
            out.push_str(&format!(
                "server {{\n    listen 443 ssl;\n    server_name {host};\n\n    \
                 ssl_certificate {dir}/{host}.pem;\n    \
                 ssl_certificate_key {dir}/{host}-key.pem;\n\n",
                dir = CONTAINER_CERT_DIR
            ));
        } else {
            out.push_str(&format!(
                "server {{\n    listen 80;\n    server_name {host};\n\n"
            ));
        }

        out.push_str(&format!(
            "    location / {{\n        \
             proxy_pass {upstream};\n        \
             proxy_set_header Host $host;\n        \
             proxy_set_header X-Real-IP $remote_addr;\n        \
             proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n        \
             proxy_set_header X-Forwarded-Proto $scheme;\n    \
             }}\n}}\n"
        ));
        out
    }

    /// Parse the header line of a route file.
    ///
    /// Returns `None` when the file was not generated by wp-spin or the
    /// header is malformed.
    pub fn parse(content: &str) -> Option<Self> {
        let first = content.lines().next()?;
        let rest = first.strip_prefix(ROUTE_HEADER)?.trim_start();
        let (fields, project) = rest.split_once("project=")?;

        let mut host = None;
        let mut port = None;
        let mut tls = None;
        for field in fields.split_whitespace() {
            match field.split_once('=')? {
                ("host", v) => host = Hostname::new(v).ok(),
                ("port", v) => port = v.parse::<u16>().ok(),
                ("tls", v) => tls = v.parse::<bool>().ok(),
                _ => {}
            }
        }

        Some(Self {
            hostname: host?,
            port: port?,
            tls: tls?,
            project: PathBuf::from(project.trim_end()),
        })
    }
}

/// Every route with a valid header under `dir`, sorted by hostname.
///
/// A missing directory reads as empty.
pub fn read_routes(dir: &Path) -> Result<Vec<RouteSpec>, SpinError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SpinError::io(dir, e)),
    };

    let mut routes = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SpinError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("conf") {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|e| SpinError::io(&path, e))?;
        match RouteSpec::parse(&content) {
            Some(spec) => routes.push(spec),
            None => debug!(file = %path.display(), "ignoring route without wp-spin header"),
        }
    }
    routes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Ok(routes)
}

/// Errors from signalling the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error("reload exited with code {code:?}: {output}")]
    Rejected { code: Option<i32>, output: String },
}

/// Makes the running proxy re-read its route files.
pub trait ProxyController {
    fn reload(&self) -> Result<(), ProxyError>;
}

/// Runs a configured reload command, by default
/// `docker exec wp-spin-proxy nginx -s reload`.
#[derive(Debug, Clone)]
pub struct CommandProxy {
    command: Vec<String>,
}

impl CommandProxy {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl ProxyController for CommandProxy {
    fn reload(&self) -> Result<(), ProxyError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ProxyError::Rejected {
                code: None,
                output: "no reload command configured".into(),
            });
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = process::run(program, &args, None)?;
        if out.success() {
            debug!("proxy reloaded");
            Ok(())
        } else {
            warn!(code = ?out.code, "proxy reload rejected");
            Err(ProxyError::Rejected {
                code: out.code,
                output: out.combined(),
            })
        }
    }
}
