//! core::paths
//!
//! Centralized path routing for wp-spin storage locations.
//!
//! # Storage Layout
//!
//! All state lives under one root (`$WP_SPIN_HOME`, else `~/.wp-spin/`):
//! - `config.toml` - Global configuration
//! - `ports.json` (+ `.lock`) - Port registry
//! - `domains.json` (+ `.lock`) - Domain bindings
//! - `sites.json` (+ `.lock`) - Site aliases
//! - `proxy/conf.d/<hostname>.conf` - Generated reverse-proxy routes
//! - `certs/<hostname>.pem`, `certs/<hostname>-key.pem` - TLS material
//!
//! Per-project state lives inside the project at `.wp-spin/state.json`.
//!
//! **Hard rule:** no code outside this module joins file names onto the
//! storage root.
//!
//! # Example
//!
//! ```
//! use wpspin::core::paths::SpinPaths;
//! use std::path::PathBuf;
//!
//! let paths = SpinPaths::new(PathBuf::from("/home/me/.wp-spin"));
//! assert_eq!(paths.ports_path(), PathBuf::from("/home/me/.wp-spin/ports.json"));
//! assert_eq!(
//!     paths.proxy_route_path("blog.test"),
//!     PathBuf::from("/home/me/.wp-spin/proxy/conf.d/blog.test.conf")
//! );
//! ```

use std::path::{Path, PathBuf};

use super::errors::SpinError;

/// Environment variable overriding the storage root.
pub const HOME_ENV: &str = "WP_SPIN_HOME";

/// Name of the per-project state directory.
const PROJECT_STATE_DIR: &str = ".wp-spin";

/// Centralized path routing for wp-spin storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinPaths {
    root: PathBuf,
}

impl SpinPaths {
    /// Create paths rooted at an explicit directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve the storage root from the environment.
    ///
    /// `$WP_SPIN_HOME` wins; otherwise `~/.wp-spin`.
    ///
    /// # Errors
    ///
    /// Returns [`SpinError::Config`] if no home directory can be determined.
    pub fn discover() -> Result<Self, SpinError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            if !root.trim().is_empty() {
                return Ok(Self::new(PathBuf::from(root)));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| SpinError::Config("home directory not found".into()))?;
        Ok(Self::new(home.join(".wp-spin")))
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Global configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Port registry file.
    pub fn ports_path(&self) -> PathBuf {
        self.root.join("ports.json")
    }

    /// Domain bindings file.
    pub fn domains_path(&self) -> PathBuf {
        self.root.join("domains.json")
    }

    /// Site alias file.
    pub fn sites_path(&self) -> PathBuf {
        self.root.join("sites.json")
    }

    /// Directory holding one generated proxy route per hostname.
    pub fn proxy_routes_dir(&self) -> PathBuf {
        self.root.join("proxy").join("conf.d")
    }

    /// Generated proxy route for a hostname.
    pub fn proxy_route_path(&self, hostname: &str) -> PathBuf {
        self.proxy_routes_dir().join(format!("{}.conf", hostname))
    }

    /// Directory holding TLS material.
    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    /// Certificate for a hostname (derived, never stored in the bindings file).
    pub fn cert_path(&self, hostname: &str) -> PathBuf {
        self.certs_dir().join(format!("{}.pem", hostname))
    }

    /// Private key for a hostname.
    pub fn cert_key_path(&self, hostname: &str) -> PathBuf {
        self.certs_dir().join(format!("{}-key.pem", hostname))
    }

    /// Per-project state marker.
    pub fn project_state_path(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_STATE_DIR).join("state.json")
    }
}

/// Lock file guarding a store file: `<file>.lock`.
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    sibling_with_suffix(store_path, "lock")
}

/// Quarantine marker written when a store is found corrupt: `<file>.quarantine`.
pub fn quarantine_path_for(store_path: &Path) -> PathBuf {
    sibling_with_suffix(store_path, "quarantine")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_siblings() {
        let store = PathBuf::from("/x/ports.json");
        assert_eq!(lock_path_for(&store), PathBuf::from("/x/ports.json.lock"));
        assert_eq!(
            quarantine_path_for(&store),
            PathBuf::from("/x/ports.json.quarantine")
        );
    }

    #[test]
    fn cert_paths_derive_from_hostname() {
        let paths = SpinPaths::new(PathBuf::from("/r"));
        assert_eq!(paths.cert_path("a.test"), PathBuf::from("/r/certs/a.test.pem"));
        assert_eq!(
            paths.cert_key_path("a.test"),
            PathBuf::from("/r/certs/a.test-key.pem")
        );
    }

    #[test]
    fn project_state_lives_in_project() {
        assert_eq!(
            SpinPaths::project_state_path(Path::new("/sites/blog")),
            PathBuf::from("/sites/blog/.wp-spin/state.json")
        );
    }
}
