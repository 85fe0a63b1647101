//! doctor::issues
//!
//! Problems the doctor knows how to find.
//!
//! Each issue has a stable identifier (`kind:subject`) so it can be quoted
//! in bug reports and matched in tests, and a severity:
//!
//! - `Blocking`: commands will fail until it is fixed
//! - `Warning`: state has drifted; `--repair` fixes it
//! - `Info`: harmless leftovers

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// How much an issue matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocking,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Blocking => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        })
    }
}

/// A diagnosed problem.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum KnownIssue {
    /// The container engine or compose tool is unusable.
    #[error("{message}")]
    PrerequisiteFailed { check: String, message: String },

    /// A store was quarantined and refuses writes.
    #[error("{} is corrupt (original kept at {})", store.display(), aside.display())]
    CorruptStore { store: PathBuf, aside: PathBuf },

    /// A port is still reserved for a project directory that is gone.
    #[error("port {port} is reserved for '{key}' but {} no longer exists", project.display())]
    StaleAllocation {
        key: String,
        port: u16,
        project: PathBuf,
    },

    /// The bindings file disagrees with the route files.
    #[error("binding for {hostname} {detail}")]
    BindingDrift { hostname: String, detail: String },

    /// A hostname still routes to a project directory that is gone.
    #[error("{hostname} routes to {} which no longer exists", project.display())]
    OrphanedBinding { hostname: String, project: PathBuf },

    /// A site alias points at a missing directory.
    #[error("site '{name}' points at missing {}", path.display())]
    DanglingSite { name: String, path: PathBuf },
}

impl KnownIssue {
    /// Stable identifier.
    pub fn issue_id(&self) -> String {
        match self {
            KnownIssue::PrerequisiteFailed { check, .. } => format!("prerequisite:{}", check),
            KnownIssue::CorruptStore { store, .. } => format!(
                "corrupt-store:{}",
                store
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
            KnownIssue::StaleAllocation { key, .. } => format!("stale-allocation:{}", key),
            KnownIssue::BindingDrift { hostname, .. } => format!("binding-drift:{}", hostname),
            KnownIssue::OrphanedBinding { hostname, .. } => {
                format!("orphaned-binding:{}", hostname)
            }
            KnownIssue::DanglingSite { name, .. } => format!("dangling-site:{}", name),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            KnownIssue::PrerequisiteFailed { .. } | KnownIssue::CorruptStore { .. } => {
                Severity::Blocking
            }
            KnownIssue::StaleAllocation { .. }
            | KnownIssue::BindingDrift { .. }
            | KnownIssue::OrphanedBinding { .. } => Severity::Warning,
            KnownIssue::DanglingSite { .. } => Severity::Info,
        }
    }

    /// What fixes it, for display.
    pub fn remedy(&self) -> &'static str {
        match self {
            KnownIssue::PrerequisiteFailed { .. } => "install or start Docker, then re-run doctor",
            KnownIssue::CorruptStore { .. } => "wp-spin doctor --acknowledge-corrupt",
            KnownIssue::StaleAllocation { .. }
            | KnownIssue::BindingDrift { .. }
            | KnownIssue::OrphanedBinding { .. }
            | KnownIssue::DanglingSite { .. } => "wp-spin doctor --repair",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_and_severities() {
        let corrupt = KnownIssue::CorruptStore {
            store: "/home/u/.wp-spin/ports.json".into(),
            aside: "/home/u/.wp-spin/ports.json.corrupt-1".into(),
        };
        assert_eq!(corrupt.issue_id(), "corrupt-store:ports.json");
        assert_eq!(corrupt.severity(), Severity::Blocking);

        let stale = KnownIssue::StaleAllocation {
            key: "/sites/gone".into(),
            port: 8080,
            project: "/sites/gone".into(),
        };
        assert_eq!(stale.issue_id(), "stale-allocation:/sites/gone");
        assert_eq!(stale.severity(), Severity::Warning);
        assert!(stale.to_string().contains("8080"));

        let site = KnownIssue::DanglingSite {
            name: "old".into(),
            path: "/sites/old".into(),
        };
        assert_eq!(site.severity(), Severity::Info);
    }

    #[test]
    fn severities_order_worst_first() {
        assert!(Severity::Blocking < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
    }
}
