//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$WP_SPIN_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/wp-spin/config.toml`
//! 3. `<storage root>/config.toml` (canonical write location)
//!
//! # Project Config
//!
//! Located at `<project>/.wp-spin/config.toml`.
//!
//! # Validation
//!
//! Config values are validated after parsing (e.g. the domain must be a
//! valid hostname, the scan window must be non-zero).

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::Hostname;

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// [engine]
/// binary = "docker"
///
/// [ports]
/// scan_window = 1000
/// bind_retries = 3
///
/// [proxy]
/// reload_command = ["docker", "exec", "wp-spin-proxy", "nginx", "-s", "reload"]
///
/// [tls]
/// issuer = "mkcert"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Container engine settings
    pub engine: Option<EngineConfig>,

    /// Port allocation settings
    pub ports: Option<PortsConfig>,

    /// Reverse proxy settings
    pub proxy: Option<ProxyConfig>,

    /// TLS issuance settings
    pub tls: Option<TlsConfig>,

    /// Host resource thresholds for new projects
    pub resources: Option<ResourcesConfig>,

    /// Public tunnel settings
    pub tunnel: Option<TunnelConfig>,

    /// Store lock settings
    pub locks: Option<LocksConfig>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(engine) = &self.engine {
            if engine.binary.as_deref().is_some_and(|b| b.trim().is_empty()) {
                return Err(ConfigError::InvalidValue(
                    "engine.binary cannot be empty".into(),
                ));
            }
            if engine.compose.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(ConfigError::InvalidValue(
                    "engine.compose must name a command".into(),
                ));
            }
        }

        if let Some(ports) = &self.ports {
            if ports.scan_window == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "ports.scan_window must be at least 1".into(),
                ));
            }
        }

        if let Some(proxy) = &self.proxy {
            if proxy.reload_command.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(ConfigError::InvalidValue(
                    "proxy.reload_command must name a command".into(),
                ));
            }
        }

        if let Some(tunnel) = &self.tunnel {
            if let Some(url) = &tunnel.api_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue(format!(
                        "tunnel.api_url must be an http(s) URL, got '{}'",
                        url
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Container engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine binary (default: "docker")
    pub binary: Option<String>,

    /// Compose command override, e.g. `["docker-compose"]`
    pub compose: Option<Vec<String>>,
}

/// Port allocation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PortsConfig {
    /// Number of candidates scanned per allocation (default: 1000)
    pub scan_window: Option<u32>,

    /// Retries after the engine rejects a chosen port (default: 3)
    pub bind_retries: Option<u32>,
}

/// Reverse proxy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Command that makes the proxy re-read its configuration
    pub reload_command: Option<Vec<String>>,

    /// Host the proxy uses to reach published ports
    pub upstream_host: Option<String>,
}

/// TLS issuance settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// Certificate issuer binary (default: "mkcert")
    pub issuer: Option<String>,
}

/// Host resource thresholds, checked when a project is first created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesConfig {
    /// Minimum free disk under the project root, in MB (default: 2048)
    pub min_disk_mb: Option<u64>,

    /// Minimum available memory, in MB (default: 1024)
    pub min_memory_mb: Option<u64>,
}

/// Public tunnel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelConfig {
    /// Tunnel agent binary (default: "ngrok")
    pub binary: Option<String>,

    /// Agent inspection API (default: "http://127.0.0.1:4040")
    pub api_url: Option<String>,

    /// Seconds to wait for a public URL (default: 15)
    pub timeout_secs: Option<u64>,
}

/// Store lock settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LocksConfig {
    /// Seconds to wait for a store lock (default: 10)
    pub timeout_secs: Option<u64>,
}

/// Project configuration.
///
/// # Example
///
/// ```toml
/// domain = "blog.test"
/// tls = true
/// compose_file = "docker-compose.yml"
/// primary_service = "wordpress"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Custom hostname for this project
    pub domain: Option<String>,

    /// Serve the custom hostname over TLS
    pub tls: Option<bool>,

    /// Compose file name relative to the project root
    pub compose_file: Option<String>,

    /// Service considered the primary app when classification is ambiguous
    pub primary_service: Option<String>,
}

impl ProjectConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(domain) = &self.domain {
            Hostname::new(domain.as_str())
                .map_err(|e| ConfigError::InvalidValue(format!("invalid domain: {}", e)))?;
        }

        if let Some(file) = &self.compose_file {
            if file.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "compose_file cannot be empty".into(),
                ));
            }
        }

        Ok(())
    }
}
