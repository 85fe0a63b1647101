//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Hostname`] - Validated DNS hostname used for domain bindings
//! - [`AllocationKey`] - Identifier under which a port is reserved
//! - [`ProjectRoot`] - Canonical path of a project directory
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so the registries never persist a malformed key.
//!
//! # Examples
//!
//! ```
//! use wpspin::core::types::{AllocationKey, Hostname};
//!
//! let host = Hostname::new("MySite.test").unwrap();
//! assert_eq!(host.as_str(), "mysite.test");
//!
//! let key = AllocationKey::for_hostname(&host);
//! assert_eq!(key.as_str(), "mysite.test");
//!
//! assert!(Hostname::new("localhost").is_err());
//! assert!(Hostname::new("bad_name.test").is_err());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::SpinError;

/// Maximum length of a full hostname.
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// A validated, lowercased hostname.
///
/// Rules:
/// - At least two labels (`site.test`), at most 253 characters
/// - Labels are 1-63 characters of `a-z`, `0-9` and `-`
/// - Labels cannot start or end with `-`
/// - The top-level label cannot be all digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hostname(String);

impl Hostname {
    /// Create a new validated hostname. Input is lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`SpinError::InvalidHostname`] if the name violates the rules.
    pub fn new(name: impl Into<String>) -> Result<Self, SpinError> {
        let name = name.into().trim().trim_end_matches('.').to_ascii_lowercase();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), SpinError> {
        let invalid = |reason: &str| SpinError::InvalidHostname {
            hostname: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("hostname cannot be empty"));
        }
        if name.len() > MAX_HOSTNAME_LEN {
            return Err(invalid("hostname is longer than 253 characters"));
        }

        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 2 {
            return Err(invalid("hostname needs at least two labels, e.g. 'site.test'"));
        }

        for label in &labels {
            if label.is_empty() {
                return Err(invalid("hostname contains an empty label"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(invalid("label is longer than 63 characters"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("labels cannot start or end with '-'"));
            }
            if !label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(invalid("only letters, digits and '-' are allowed"));
            }
        }

        if let Some(tld) = labels.last() {
            if tld.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("top-level label cannot be numeric"));
            }
        }

        Ok(())
    }

    /// Get the hostname as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Hostname {
    type Error = SpinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Hostname> for String {
    fn from(value: Hostname) -> Self {
        value.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical path of a project directory.
///
/// Canonicalization resolves symlinks so the same project reached through
/// different paths maps to one allocation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectRoot(PathBuf);

impl ProjectRoot {
    /// Canonicalize an existing project directory.
    ///
    /// # Errors
    ///
    /// Returns [`SpinError::Io`] if the path does not exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SpinError> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|e| SpinError::io(path, e))?;
        Ok(Self(canonical))
    }

    /// Wrap an already-canonical path without touching the filesystem.
    pub fn from_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    /// Get the underlying path.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Directory name, used to derive the compose project name.
    pub fn dir_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "site".to_string())
    }

    /// Compose project name: the directory name reduced to `[a-z0-9_-]`.
    ///
    /// # Example
    ///
    /// ```
    /// use wpspin::core::types::ProjectRoot;
    /// use std::path::PathBuf;
    ///
    /// let root = ProjectRoot::from_canonical(PathBuf::from("/sites/My Blog"));
    /// assert_eq!(root.compose_project_name(), "myblog");
    /// ```
    pub fn compose_project_name(&self) -> String {
        let name: String = self
            .dir_name()
            .chars()
            .filter_map(|c| {
                let c = c.to_ascii_lowercase();
                (c.is_ascii_alphanumeric() || c == '-' || c == '_').then_some(c)
            })
            .collect();
        if name.is_empty() {
            "site".to_string()
        } else {
            name
        }
    }
}

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identifier under which a port is reserved in the port registry.
///
/// Either a hostname, a canonical project path, or a project path with a
/// `#service` suffix for secondary services of the same project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationKey(String);

impl AllocationKey {
    /// Key for a custom hostname.
    pub fn for_hostname(host: &Hostname) -> Self {
        Self(host.as_str().to_string())
    }

    /// Key for a project's primary service.
    pub fn for_project(root: &ProjectRoot) -> Self {
        Self(root.path().to_string_lossy().into_owned())
    }

    /// Key for a secondary service of a project.
    ///
    /// # Example
    ///
    /// ```
    /// use wpspin::core::types::{AllocationKey, ProjectRoot};
    /// use std::path::PathBuf;
    ///
    /// let root = ProjectRoot::from_canonical(PathBuf::from("/sites/blog"));
    /// let key = AllocationKey::for_service(&root, "phpmyadmin");
    /// assert_eq!(key.as_str(), "/sites/blog#phpmyadmin");
    /// ```
    pub fn for_service(root: &ProjectRoot, service: &str) -> Self {
        Self(format!("{}#{}", root.path().to_string_lossy(), service))
    }

    /// Wrap a raw key read from disk or the command line.
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_accepts_common_dev_domains() {
        for name in ["site.test", "my-blog.local", "a.b.c.localhost", "shop1.dev"] {
            assert!(Hostname::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn hostname_normalizes_case_and_trailing_dot() {
        let host = Hostname::new("Blog.Test.").unwrap();
        assert_eq!(host.as_str(), "blog.test");
    }

    #[test]
    fn hostname_rejects_bad_syntax() {
        for name in [
            "",
            "single",
            "-lead.test",
            "trail-.test",
            "a..b",
            "under_score.test",
            "space here.test",
            "site.123",
        ] {
            assert!(Hostname::new(name).is_err(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn hostname_rejects_overlong_label() {
        let label = "a".repeat(64);
        assert!(Hostname::new(format!("{label}.test")).is_err());
    }

    #[test]
    fn hostname_serde_rejects_invalid() {
        let ok: Hostname = serde_json::from_str("\"site.test\"").unwrap();
        assert_eq!(ok.as_str(), "site.test");
        assert!(serde_json::from_str::<Hostname>("\"nope\"").is_err());
    }

    #[test]
    fn compose_project_name_falls_back() {
        let root = ProjectRoot::from_canonical(PathBuf::from("/sites/!!!"));
        assert_eq!(root.compose_project_name(), "site");
    }

    #[test]
    fn project_key_is_path() {
        let root = ProjectRoot::from_canonical(PathBuf::from("/sites/blog"));
        assert_eq!(AllocationKey::for_project(&root).as_str(), "/sites/blog");
    }
}
