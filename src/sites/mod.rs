//! sites
//!
//! Named aliases for project directories.
//!
//! # Architecture
//!
//! `sites.json` holds `{ "sites": [{ name, path, createdAt }] }` and uses
//! the same store discipline as the registries: locked read-modify-write,
//! atomic replace, quarantine on corruption. Commands resolve a `--site`
//! argument through [`SiteDirectory::resolve`]; nothing else in the core
//! depends on aliases.
//!
//! # Example
//!
//! ```
//! use wpspin::sites::SiteDirectory;
//!
//! let home = tempfile::tempdir().unwrap();
//! let project = tempfile::tempdir().unwrap();
//! let sites = SiteDirectory::at(home.path().join("sites.json"));
//!
//! sites.add("blog", project.path()).unwrap();
//! let resolved = sites.resolve("blog").unwrap();
//! assert_eq!(resolved.path(), project.path().canonicalize().unwrap());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::errors::SpinError;
use crate::core::paths::SpinPaths;
use crate::core::store::JsonStore;
use crate::core::types::ProjectRoot;

/// Longest accepted alias.
const MAX_NAME_LEN: usize = 64;

/// Errors from alias management.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("invalid site name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("site '{name}' already points at {}", path.display())]
    Duplicate { name: String, path: PathBuf },

    #[error("no site named '{0}' and no such directory")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] SpinError),
}

/// A named alias for a project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAlias {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SiteAlias {
    /// True if the aliased directory still exists.
    pub fn is_live(&self) -> bool {
        self.path.is_dir()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SitesDoc {
    #[serde(default)]
    sites: Vec<SiteAlias>,
}

/// The persisted alias directory.
#[derive(Debug, Clone)]
pub struct SiteDirectory {
    store: JsonStore<SitesDoc>,
}

impl SiteDirectory {
    pub fn open(paths: &SpinPaths) -> Self {
        Self::at(paths.sites_path())
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.store = JsonStore::with_timeout(self.store.path().to_path_buf(), timeout);
        self
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Resolve an alias name, falling back to treating the argument as a
    /// directory path.
    ///
    /// # Errors
    ///
    /// [`SiteError::NotFound`] if neither an alias nor an existing
    /// directory matches.
    pub fn resolve(&self, name_or_path: &str) -> Result<ProjectRoot, SiteError> {
        let doc = self.store.load()?;
        if let Some(alias) = doc.sites.iter().find(|s| s.name == name_or_path) {
            return ProjectRoot::new(&alias.path)
                .map_err(|_| SiteError::NotFound(name_or_path.into()));
        }

        let candidate = Path::new(name_or_path);
        if candidate.is_dir() {
            return Ok(ProjectRoot::new(candidate)?);
        }
        Err(SiteError::NotFound(name_or_path.into()))
    }

    /// Register `name` for `path`. Re-adding the same name for the same
    /// directory is a no-op.
    ///
    /// # Errors
    ///
    /// - [`SiteError::InvalidName`] for names outside `[A-Za-z0-9_-]`
    /// - [`SiteError::Duplicate`] if the name points elsewhere
    /// - [`SiteError::Store`] if `path` does not exist
    pub fn add(&self, name: &str, path: &Path) -> Result<SiteAlias, SiteError> {
        validate_name(name)?;
        let root = ProjectRoot::new(path)?;

        self.store
            .update(|doc| {
                if let Some(existing) = doc.sites.iter().find(|s| s.name == name) {
                    if existing.path == root.path() {
                        return Ok(Ok(existing.clone()));
                    }
                    return Ok(Err(SiteError::Duplicate {
                        name: name.to_string(),
                        path: existing.path.clone(),
                    }));
                }
                let alias = SiteAlias {
                    name: name.to_string(),
                    path: root.path().to_path_buf(),
                    created_at: Utc::now(),
                };
                doc.sites.push(alias.clone());
                doc.sites.sort_by(|a, b| a.name.cmp(&b.name));
                info!(name, path = %root, "added site alias");
                Ok(Ok(alias))
            })?
    }

    /// Remove an alias. Removing an unknown name is a no-op.
    pub fn remove(&self, name: &str) -> Result<Option<SiteAlias>, SiteError> {
        if !self.store.load()?.sites.iter().any(|s| s.name == name) {
            return Ok(None);
        }
        Ok(self.store.update(|doc| {
            let position = doc.sites.iter().position(|s| s.name == name);
            Ok(position.map(|i| doc.sites.remove(i)))
        })?)
    }

    /// All aliases, ordered by name.
    pub fn list(&self) -> Result<Vec<SiteAlias>, SiteError> {
        let mut sites = self.store.load()?.sites;
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    /// Aliases whose directory no longer exists.
    pub fn dangling(&self) -> Result<Vec<SiteAlias>, SiteError> {
        Ok(self.list()?.into_iter().filter(|s| !s.is_live()).collect())
    }

    /// Drop aliases whose directory is gone. Returns what was dropped.
    pub fn prune(&self) -> Result<Vec<SiteAlias>, SiteError> {
        if self.dangling()?.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.update(|doc| {
            let (live, gone): (Vec<_>, Vec<_>) =
                doc.sites.drain(..).partition(SiteAlias::is_live);
            doc.sites = live;
            for alias in &gone {
                info!(name = %alias.name, path = %alias.path.display(), "pruned site alias");
            }
            Ok(gone)
        })?)
    }

    /// Quarantined copy of a corrupt `sites.json`, if writes are refused.
    pub fn quarantined(&self) -> Option<PathBuf> {
        self.store.quarantined()
    }

    /// Resume writes after a corruption.
    pub fn acknowledge_corruption(&self) -> Result<bool, SpinError> {
        self.store.acknowledge_corruption()
    }
}

fn validate_name(name: &str) -> Result<(), SiteError> {
    let invalid = |reason: &str| SiteError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only letters, digits, '-' and '_' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn directory(home: &TempDir) -> SiteDirectory {
        SiteDirectory::at(home.path().join("sites.json"))
    }

    #[test]
    fn add_resolve_remove() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let sites = directory(&home);

        let alias = sites.add("blog", project.path()).unwrap();
        assert_eq!(alias.path, project.path().canonicalize().unwrap());
        assert_eq!(sites.resolve("blog").unwrap().path(), alias.path);

        assert!(sites.remove("blog").unwrap().is_some());
        assert!(sites.remove("blog").unwrap().is_none());
        assert!(matches!(sites.resolve("blog"), Err(SiteError::NotFound(_))));
    }

    #[test]
    fn resolve_falls_back_to_directory() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let sites = directory(&home);
        let arg = project.path().to_string_lossy().into_owned();
        assert_eq!(
            sites.resolve(&arg).unwrap().path(),
            project.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn names_are_unique() {
        let home = TempDir::new().unwrap();
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let sites = directory(&home);

        sites.add("blog", a.path()).unwrap();
        sites.add("blog", a.path()).unwrap();
        assert!(matches!(
            sites.add("blog", b.path()),
            Err(SiteError::Duplicate { .. })
        ));
        assert_eq!(sites.list().unwrap().len(), 1);
    }

    #[test]
    fn rejects_bad_names_and_missing_paths() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let sites = directory(&home);

        assert!(matches!(
            sites.add("../etc", project.path()),
            Err(SiteError::InvalidName { .. })
        ));
        assert!(matches!(
            sites.add("gone", &project.path().join("missing")),
            Err(SiteError::Store(_))
        ));
    }

    #[test]
    fn prune_drops_dangling_aliases() {
        let home = TempDir::new().unwrap();
        let keep = TempDir::new().unwrap();
        let doomed = TempDir::new().unwrap();
        let doomed_path = doomed.path().to_path_buf();
        let sites = directory(&home);

        sites.add("keep", keep.path()).unwrap();
        sites.add("doomed", &doomed_path).unwrap();
        drop(doomed);

        let pruned = sites.prune().unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].name, "doomed");
        assert_eq!(sites.list().unwrap().len(), 1);
        assert!(sites.prune().unwrap().is_empty());
    }

    #[test]
    fn reads_entries_without_timestamps() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let path = home.path().join("sites.json");
        fs::write(
            &path,
            format!(
                r#"{{"sites":[{{"name":"old","path":{}}}]}}"#,
                serde_json::to_string(&project.path()).unwrap()
            ),
        )
        .unwrap();
        let sites = SiteDirectory::at(path);
        assert_eq!(sites.list().unwrap()[0].name, "old");
    }
}
