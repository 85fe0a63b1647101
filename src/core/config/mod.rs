//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! wp-spin has two configuration scopes:
//! - **Global**: User-level settings (engine, ports, proxy, TLS, tunnel)
//! - **Project**: Per-project overrides (domain, TLS, compose file)
//!
//! # Precedence
//!
//! 1. Default values
//! 2. Global config file
//! 3. Project config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$WP_SPIN_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/wp-spin/config.toml`
//! 3. `<storage root>/config.toml` (canonical write location)
//!
//! # Example
//!
//! ```no_run
//! use wpspin::core::config::Config;
//! use wpspin::core::paths::SpinPaths;
//! use std::path::Path;
//!
//! let paths = SpinPaths::discover().unwrap();
//! let config = Config::load(&paths, Some(Path::new("/sites/blog"))).unwrap();
//! assert!(config.scan_window() > 0);
//! ```

pub mod schema;

pub use schema::{GlobalConfig, ProjectConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::errors::SpinError;
use super::paths::SpinPaths;
use super::store::write_atomic;

/// Environment variable pointing at an explicit global config file.
pub const CONFIG_ENV: &str = "WP_SPIN_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {message}")]
    WriteError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("unknown config key '{0}'")]
    UnknownKey(String),
}

impl From<ConfigError> for SpinError {
    fn from(err: ConfigError) -> Self {
        SpinError::Config(err.to_string())
    }
}

/// Merged configuration from all sources.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,
    /// Project configuration (if a project was given and has one)
    pub project: Option<ProjectConfig>,
    /// Path the global config was loaded from
    global_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration for an optional project.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// fails validation. Missing files are not an error.
    pub fn load(paths: &SpinPaths, project_root: Option<&Path>) -> Result<Self, ConfigError> {
        let (global, global_path) = match Self::locate_global(paths) {
            Some(path) => (read_toml::<GlobalConfig>(&path)?, Some(path)),
            None => (GlobalConfig::default(), None),
        };
        global.validate()?;

        let project = match project_root {
            Some(root) => {
                let path = Self::project_config_path(root);
                if path.exists() {
                    let project: ProjectConfig = read_toml(&path)?;
                    project.validate()?;
                    Some(project)
                } else {
                    None
                }
            }
            None => None,
        };

        Ok(Config {
            global,
            project,
            global_path,
        })
    }

    fn locate_global(paths: &SpinPaths) -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("wp-spin/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        let canonical = paths.config_path();
        canonical.exists().then_some(canonical)
    }

    /// Project config location: `<project>/.wp-spin/config.toml`.
    pub fn project_config_path(project_root: &Path) -> PathBuf {
        project_root.join(".wp-spin").join("config.toml")
    }

    /// Path the global config was loaded from, if any.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Write a project config atomically.
    pub fn write_project(project_root: &Path, config: &ProjectConfig) -> Result<PathBuf, ConfigError> {
        config.validate()?;
        let path = Self::project_config_path(project_root);
        write_toml(&path, config)?;
        Ok(path)
    }

    // =========================================================================
    // Dotted-key access for `wp-spin config`
    // =========================================================================

    /// Read a dotted key (e.g. `ports.scan_window`) from the global file at `path`.
    pub fn get_key(path: &Path, key: &str) -> Result<Option<toml::Value>, ConfigError> {
        let table = read_table(path)?;
        let mut current = &toml::Value::Table(table);
        for part in key.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    /// Set a dotted key in the global file at `path`, validating the result.
    ///
    /// The raw value is parsed as a TOML value when possible (numbers,
    /// booleans, arrays) and stored as a string otherwise.
    pub fn set_key(path: &Path, key: &str, raw: &str) -> Result<(), ConfigError> {
        let mut table = read_table(path)?;
        let value = parse_value(raw);

        let parts: Vec<&str> = key.split('.').collect();
        let (last, sections) = parts
            .split_last()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        let mut current = &mut table;
        for section in sections {
            let entry = current
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            current = entry
                .as_table_mut()
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }
        current.insert(last.to_string(), value);

        let candidate: GlobalConfig = toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| {
                if e.to_string().contains("unknown field") {
                    ConfigError::UnknownKey(key.to_string())
                } else {
                    ConfigError::InvalidValue(e.to_string())
                }
            })?;
        candidate.validate()?;

        write_toml(path, &candidate)
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Container engine binary. Defaults to `docker`.
    pub fn engine_binary(&self) -> &str {
        self.global
            .engine
            .as_ref()
            .and_then(|e| e.binary.as_deref())
            .unwrap_or("docker")
    }

    /// Explicit compose command, if configured.
    pub fn compose_override(&self) -> Option<&[String]> {
        self.global
            .engine
            .as_ref()
            .and_then(|e| e.compose.as_deref())
    }

    /// Candidates scanned per allocation. Defaults to 1000.
    pub fn scan_window(&self) -> u32 {
        self.global
            .ports
            .as_ref()
            .and_then(|p| p.scan_window)
            .unwrap_or(1000)
    }

    /// Retries after an engine bind failure. Defaults to 3.
    pub fn bind_retries(&self) -> u32 {
        self.global
            .ports
            .as_ref()
            .and_then(|p| p.bind_retries)
            .unwrap_or(3)
    }

    /// Proxy reload command.
    pub fn proxy_reload_command(&self) -> Vec<String> {
        self.global
            .proxy
            .as_ref()
            .and_then(|p| p.reload_command.clone())
            .unwrap_or_else(|| {
                ["docker", "exec", "wp-spin-proxy", "nginx", "-s", "reload"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
    }

    /// Host the proxy uses to reach published ports.
    pub fn proxy_upstream_host(&self) -> &str {
        self.global
            .proxy
            .as_ref()
            .and_then(|p| p.upstream_host.as_deref())
            .unwrap_or("host.docker.internal")
    }

    /// Certificate issuer binary. Defaults to `mkcert`.
    pub fn tls_issuer(&self) -> &str {
        self.global
            .tls
            .as_ref()
            .and_then(|t| t.issuer.as_deref())
            .unwrap_or("mkcert")
    }

    /// Minimum free disk for new projects, in MB.
    pub fn min_disk_mb(&self) -> u64 {
        self.global
            .resources
            .as_ref()
            .and_then(|r| r.min_disk_mb)
            .unwrap_or(2048)
    }

    /// Minimum available memory for new projects, in MB.
    pub fn min_memory_mb(&self) -> u64 {
        self.global
            .resources
            .as_ref()
            .and_then(|r| r.min_memory_mb)
            .unwrap_or(1024)
    }

    /// Tunnel agent binary. Defaults to `ngrok`.
    pub fn tunnel_binary(&self) -> &str {
        self.global
            .tunnel
            .as_ref()
            .and_then(|t| t.binary.as_deref())
            .unwrap_or("ngrok")
    }

    /// Tunnel agent inspection API base URL.
    pub fn tunnel_api_url(&self) -> &str {
        self.global
            .tunnel
            .as_ref()
            .and_then(|t| t.api_url.as_deref())
            .unwrap_or("http://127.0.0.1:4040")
    }

    /// How long to wait for a tunnel's public URL.
    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(
            self.global
                .tunnel
                .as_ref()
                .and_then(|t| t.timeout_secs)
                .unwrap_or(15),
        )
    }

    /// How long to wait for a store lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(
            self.global
                .locks
                .as_ref()
                .and_then(|l| l.timeout_secs)
                .unwrap_or(10),
        )
    }

    /// Project's custom hostname, if configured.
    pub fn project_domain(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.domain.as_deref())
    }

    /// Whether the project's hostname is served over TLS.
    pub fn project_tls(&self) -> bool {
        self.project.as_ref().and_then(|p| p.tls).unwrap_or(false)
    }

    /// Compose file name. Defaults to `docker-compose.yml`.
    pub fn compose_file(&self) -> &str {
        self.project
            .as_ref()
            .and_then(|p| p.compose_file.as_deref())
            .unwrap_or("docker-compose.yml")
    }

    /// Explicit primary service name, if configured.
    pub fn primary_service(&self) -> Option<&str> {
        self.project
            .as_ref()
            .and_then(|p| p.primary_service.as_deref())
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read_table(path: &Path) -> Result<toml::map::Map<String, toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(toml::map::Map::new());
    }
    read_toml(path)
}

fn write_toml<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let write_err = |message: String| ConfigError::WriteError {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let contents = toml::to_string_pretty(value).map_err(|e| write_err(e.to_string()))?;
    write_atomic(path, contents.as_bytes()).map_err(|e| write_err(e.to_string()))
}

fn parse_value(raw: &str) -> toml::Value {
    let wrapped = format!("v = {}", raw);
    match toml::from_str::<toml::map::Map<String, toml::Value>>(&wrapped) {
        Ok(mut table) => table
            .remove("v")
            .unwrap_or_else(|| toml::Value::String(raw.to_string())),
        Err(_) => toml::Value::String(raw.to_string()),
    }
}
