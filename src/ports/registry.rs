//! ports::registry
//!
//! Persisted mapping from allocation key to host port.
//!
//! # Storage
//!
//! `<root>/ports.json`, an object keyed by allocation key:
//!
//! ```json
//! {
//!   "/sites/shop": { "port": 8080, "projectPath": "/sites/shop", "createdAt": "2026-01-01T00:00:00Z" },
//!   "blog.test":   { "port": 8081, "projectPath": "/sites/blog" }
//! }
//! ```
//!
//! Unknown fields are ignored and `createdAt` is optional on read.
//!
//! # Allocation policy
//!
//! Candidates are scanned in ascending order from the preferred port over a
//! bounded window, and the lowest acceptable port wins. There is no
//! wrap-around below the preferred port. A candidate is acceptable when no
//! other live key holds it and the prober reports it free. Records whose
//! project directory no longer exists are stale; their port is reclaimed in
//! the same write that hands it out, so the file never holds two entries
//! with one port.
//!
//! # Concurrency
//!
//! Every mutation is one [`JsonStore::update`] call, i.e. one
//! load-lock-modify-save-unlock cycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::prober::PortProber;
use crate::core::errors::SpinError;
use crate::core::paths::SpinPaths;
use crate::core::store::JsonStore;
use crate::core::types::AllocationKey;

/// Default number of candidates scanned per allocation.
pub const DEFAULT_SCAN_WINDOW: u32 = 1000;

/// One persisted record in `ports.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortRecord {
    port: u16,
    project_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl PortRecord {
    fn is_live(&self) -> bool {
        self.project_path.exists()
    }
}

type RegistryDoc = BTreeMap<AllocationKey, PortRecord>;

/// A port reserved under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub key: AllocationKey,
    pub port: u16,
    pub project_path: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
}

impl PortAllocation {
    fn from_record(key: &AllocationKey, record: &PortRecord) -> Self {
        Self {
            key: key.clone(),
            port: record.port,
            project_path: record.project_path.clone(),
            created_at: record.created_at,
        }
    }

    /// True when the owning project directory still exists.
    pub fn is_live(&self) -> bool {
        self.project_path.exists()
    }
}

/// The port registry repository.
pub struct PortRegistry {
    store: JsonStore<RegistryDoc>,
    prober: Box<dyn PortProber>,
    window: u32,
}

impl PortRegistry {
    /// Open the registry under the storage root.
    pub fn open(paths: &SpinPaths, prober: Box<dyn PortProber>) -> Self {
        Self::at(paths.ports_path(), prober)
    }

    /// Open a registry at an explicit file path.
    pub fn at(path: PathBuf, prober: Box<dyn PortProber>) -> Self {
        Self {
            store: JsonStore::new(path),
            prober,
            window: DEFAULT_SCAN_WINDOW,
        }
    }

    /// Override the scan window (minimum 1).
    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window.max(1);
        self
    }

    /// Override the store lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.store = JsonStore::with_timeout(self.store.path().to_path_buf(), timeout);
        self
    }

    /// Path of `ports.json`.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Number of candidates scanned per allocation.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// The prober used for candidate checks.
    pub fn prober(&self) -> &dyn PortProber {
        self.prober.as_ref()
    }

    /// Quarantined copy of a corrupt `ports.json`, if writes are refused.
    pub fn quarantined(&self) -> Option<PathBuf> {
        self.store.quarantined()
    }

    /// Resume writes after a corruption.
    pub fn acknowledge_corruption(&self) -> Result<bool, SpinError> {
        self.store.acknowledge_corruption()
    }

    /// Reserve a port for `key`, preferring `preferred`.
    ///
    /// Returns the existing port unchanged if `key` is already allocated.
    ///
    /// # Errors
    ///
    /// [`SpinError::NoPortAvailable`] when the scan window is exhausted.
    #[instrument(level = "debug", skip(self, project), fields(key = %key))]
    pub fn allocate(
        &self,
        key: &AllocationKey,
        preferred: u16,
        project: &Path,
    ) -> Result<u16, SpinError> {
        if let Some(existing) = self.store.load()?.get(key) {
            return Ok(existing.port);
        }

        self.store.update(|doc| {
            if let Some(existing) = doc.get(key) {
                return Ok(existing.port);
            }
            let port = self.scan(doc, key, preferred, &[])?;
            doc.insert(key.clone(), new_record(port, project));
            info!(key = %key, port, "allocated port");
            Ok(port)
        })
    }

    /// Move `key` to a new port, never choosing one in `excluded`.
    ///
    /// Used for conflict resolution after a port turned out to be taken.
    #[instrument(level = "debug", skip(self, project), fields(key = %key))]
    pub fn reallocate(
        &self,
        key: &AllocationKey,
        preferred: u16,
        project: &Path,
        excluded: &[u16],
    ) -> Result<u16, SpinError> {
        self.store.update(|doc| {
            let port = self.scan(doc, key, preferred, excluded)?;
            let previous = doc.insert(key.clone(), new_record(port, project));
            info!(
                key = %key,
                from = ?previous.map(|r| r.port),
                to = port,
                "reallocated port"
            );
            Ok(port)
        })
    }

    /// Claim a specific port for `key`.
    ///
    /// A port held by another key of the same project is transferred to
    /// `key` (e.g. the primary service port moving under a custom hostname).
    ///
    /// # Errors
    ///
    /// [`SpinError::PortBindConflict`] if a key of another live project
    /// holds the port.
    #[instrument(level = "debug", skip(self, project), fields(key = %key))]
    pub fn record(&self, key: &AllocationKey, port: u16, project: &Path) -> Result<(), SpinError> {
        self.store.update(|doc| {
            if let Some((holder, _)) = doc
                .iter()
                .find(|(k, r)| *k != key && r.port == port && r.is_live() && r.project_path != project)
            {
                return Err(SpinError::PortBindConflict {
                    port,
                    detail: format!("reserved for {}", holder),
                });
            }
            reclaim_stale(doc, key, port);
            doc.retain(|k, r| {
                let transferred = k != key && r.port == port && r.project_path == project;
                if transferred {
                    debug!(from = %k, to = %key, port, "transferred port within project");
                }
                !transferred
            });

            let created_at = doc
                .get(key)
                .filter(|r| r.port == port)
                .and_then(|r| r.created_at)
                .or_else(|| Some(Utc::now()));
            doc.insert(
                key.clone(),
                PortRecord {
                    port,
                    project_path: project.to_path_buf(),
                    created_at,
                },
            );
            debug!(key = %key, port, "recorded port");
            Ok(())
        })
    }

    /// Remove the allocation for `key`. Releasing an absent key is a no-op.
    pub fn release(&self, key: &AllocationKey) -> Result<Option<PortAllocation>, SpinError> {
        if !self.store.load()?.contains_key(key) {
            return Ok(None);
        }
        self.store.update(|doc| {
            let removed = doc
                .remove(key)
                .map(|record| PortAllocation::from_record(key, &record));
            if let Some(alloc) = &removed {
                info!(key = %key, port = alloc.port, "released port");
            }
            Ok(removed)
        })
    }

    /// Port reserved for `key`, if any.
    pub fn lookup(&self, key: &AllocationKey) -> Result<Option<u16>, SpinError> {
        Ok(self.store.load()?.get(key).map(|r| r.port))
    }

    /// All allocations, ordered by key.
    pub fn list(&self) -> Result<Vec<PortAllocation>, SpinError> {
        Ok(self
            .store
            .load()?
            .iter()
            .map(|(key, record)| PortAllocation::from_record(key, record))
            .collect())
    }

    /// Key holding `port`. Live holders win over stale ones.
    pub fn holder_of(&self, port: u16) -> Result<Option<AllocationKey>, SpinError> {
        Ok(self.allocation_for_port(port)?.map(|a| a.key))
    }

    /// Allocation holding `port`. Live holders win over stale ones.
    pub fn allocation_for_port(&self, port: u16) -> Result<Option<PortAllocation>, SpinError> {
        let doc = self.store.load()?;
        let mut holders: Vec<(&AllocationKey, &PortRecord)> =
            doc.iter().filter(|(_, r)| r.port == port).collect();
        holders.sort_by_key(|(_, r)| !r.is_live());
        Ok(holders
            .first()
            .map(|(key, record)| PortAllocation::from_record(key, record)))
    }

    /// Release every allocation whose project directory no longer exists.
    ///
    /// Returns the released allocations.
    pub fn garbage_collect(&self) -> Result<Vec<PortAllocation>, SpinError> {
        let has_stale = self.store.load()?.values().any(|r| !r.is_live());
        if !has_stale {
            return Ok(Vec::new());
        }

        self.store.update(|doc| {
            let stale: Vec<AllocationKey> = doc
                .iter()
                .filter(|(_, r)| !r.is_live())
                .map(|(k, _)| k.clone())
                .collect();

            let mut released = Vec::with_capacity(stale.len());
            for key in stale {
                if let Some(record) = doc.remove(&key) {
                    info!(key = %key, port = record.port, "collected stale allocation");
                    released.push(PortAllocation::from_record(&key, &record));
                }
            }
            Ok(released)
        })
    }

    /// Find the lowest acceptable port in the window. Mutates `doc` only to
    /// drop stale records for the chosen port.
    fn scan(
        &self,
        doc: &mut RegistryDoc,
        key: &AllocationKey,
        preferred: u16,
        excluded: &[u16],
    ) -> Result<u16, SpinError> {
        let start = u32::from(preferred.max(1));
        let end = start
            .saturating_add(self.window - 1)
            .min(u32::from(u16::MAX));
        let mut unprobeable = 0u32;

        for candidate in start..=end {
            let port = candidate as u16;
            if excluded.contains(&port) {
                continue;
            }
            if live_holder(doc, key, port).is_some() {
                continue;
            }
            match self.prober.is_in_use(port) {
                Ok(false) => {
                    reclaim_stale(doc, key, port);
                    return Ok(port);
                }
                Ok(true) => continue,
                Err(SpinError::ProbeUnavailable { reason, .. }) => {
                    debug!(port, %reason, "skipping unprobeable candidate");
                    unprobeable += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SpinError::NoPortAvailable {
            key: key.to_string(),
            preferred,
            window: self.window,
            unprobeable,
        })
    }
}

fn new_record(port: u16, project: &Path) -> PortRecord {
    PortRecord {
        port,
        project_path: project.to_path_buf(),
        created_at: Some(Utc::now()),
    }
}

/// Another key with a live project holding `port`.
fn live_holder<'a>(doc: &'a RegistryDoc, key: &AllocationKey, port: u16) -> Option<&'a AllocationKey> {
    doc.iter()
        .find(|(k, r)| *k != key && r.port == port && r.is_live())
        .map(|(k, _)| k)
}

/// Drop stale records of other keys holding `port`.
fn reclaim_stale(doc: &mut RegistryDoc, key: &AllocationKey, port: u16) {
    doc.retain(|k, r| {
        let stale = k != key && r.port == port && !r.is_live();
        if stale {
            info!(key = %k, port, "reclaimed stale allocation");
        }
        !stale
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MockProber;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        prober: MockProber,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                prober: MockProber::new(),
            }
        }

        fn registry(&self) -> PortRegistry {
            PortRegistry::at(
                self.temp.path().join("ports.json"),
                Box::new(self.prober.clone()),
            )
        }

        fn project(&self, name: &str) -> PathBuf {
            let dir = self.temp.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            dir
        }
    }

    fn key(s: &str) -> AllocationKey {
        AllocationKey::raw(s)
    }

    #[test]
    fn fresh_allocation_gets_preferred() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();

        assert_eq!(registry.allocate(&key("site-a"), 8080, &project).unwrap(), 8080);
        assert_eq!(registry.lookup(&key("site-a")).unwrap(), Some(8080));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(raw["site-a"]["port"], 8080);
        assert!(raw["site-a"]["projectPath"].is_string());
    }

    #[test]
    fn allocation_is_idempotent() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();

        let first = registry.allocate(&key("site-a"), 8080, &project).unwrap();
        fx.prober.set_busy(8080);
        let second = registry.allocate(&key("site-a"), 9000, &project).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn registry_collision_moves_to_next_port() {
        let fx = Fixture::new();
        let a = fx.project("site-a");
        let b = fx.project("site-b");
        let registry = fx.registry();

        registry.allocate(&key("site-b"), 8080, &b).unwrap();
        assert_eq!(registry.allocate(&key("site-a"), 8080, &a).unwrap(), 8081);
    }

    #[test]
    fn busy_preferred_port_is_never_returned() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        fx.prober.set_busy(8080);

        let port = fx.registry().allocate(&key("site-a"), 8080, &project).unwrap();
        assert_eq!(port, 8081);
    }

    #[test]
    fn unprobeable_candidates_are_skipped() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let prober = fx.prober.clone().with_unavailable([8080, 8081]);
        let registry = PortRegistry::at(fx.temp.path().join("ports.json"), Box::new(prober));

        assert_eq!(registry.allocate(&key("site-a"), 8080, &project).unwrap(), 8082);
    }

    #[test]
    fn exhausted_window_reports_counts() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let prober = fx.prober.clone().with_busy([8080, 8081]).with_unavailable([8082]);
        let registry = PortRegistry::at(fx.temp.path().join("ports.json"), Box::new(prober))
            .with_window(3);

        let err = registry.allocate(&key("site-a"), 8080, &project).unwrap_err();
        match err {
            SpinError::NoPortAvailable {
                preferred,
                window,
                unprobeable,
                ..
            } => {
                assert_eq!(preferred, 8080);
                assert_eq!(window, 3);
                assert_eq!(unprobeable, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.lookup(&key("site-a")).unwrap(), None);
    }

    #[test]
    fn scan_stops_at_highest_port() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let prober = fx.prober.clone().with_busy([65534, 65535]);
        let registry = PortRegistry::at(fx.temp.path().join("ports.json"), Box::new(prober));

        assert!(matches!(
            registry.allocate(&key("site-a"), 65534, &project),
            Err(SpinError::NoPortAvailable { .. })
        ));
        assert_eq!(fx.prober.probes(), vec![65534, 65535]);
    }

    #[test]
    fn stale_record_is_reclaimed_on_allocation() {
        let fx = Fixture::new();
        let gone = fx.project("gone");
        let live = fx.project("live");
        let registry = fx.registry();

        registry.allocate(&key("gone"), 8080, &gone).unwrap();
        fs::remove_dir_all(&gone).unwrap();

        assert_eq!(registry.allocate(&key("live"), 8080, &live).unwrap(), 8080);
        assert_eq!(registry.lookup(&key("gone")).unwrap(), None);
    }

    #[test]
    fn reallocate_honours_exclusions() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();

        registry.allocate(&key("site-a"), 8080, &project).unwrap();
        let port = registry
            .reallocate(&key("site-a"), 8080, &project, &[8080, 8081])
            .unwrap();
        assert_eq!(port, 8082);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn record_conflicts_with_live_holder() {
        let fx = Fixture::new();
        let a = fx.project("a");
        let b = fx.project("b");
        let registry = fx.registry();

        registry.record(&key("a"), 8080, &a).unwrap();
        let err = registry.record(&key("b"), 8080, &b).unwrap_err();
        assert!(matches!(err, SpinError::PortBindConflict { port: 8080, .. }));

        // Same key re-recording its own port is fine.
        registry.record(&key("a"), 8080, &a).unwrap();
    }

    #[test]
    fn record_transfers_port_within_project() {
        let fx = Fixture::new();
        let project = fx.project("blog");
        let registry = fx.registry();

        registry.record(&key("/sites/blog"), 8080, &project).unwrap();
        registry.record(&key("blog.test"), 8080, &project).unwrap();

        assert_eq!(registry.holder_of(8080).unwrap(), Some(key("blog.test")));
        assert_eq!(registry.lookup(&key("/sites/blog")).unwrap(), None);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();

        registry.allocate(&key("site-a"), 8080, &project).unwrap();
        let removed = registry.release(&key("site-a")).unwrap().unwrap();
        assert_eq!(removed.port, 8080);
        assert!(registry.release(&key("site-a")).unwrap().is_none());
    }

    #[test]
    fn holder_of_prefers_live_key() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();

        registry.record(&key("site-a"), 8080, &project).unwrap();
        assert_eq!(registry.holder_of(8080).unwrap(), Some(key("site-a")));
        assert_eq!(registry.holder_of(9090).unwrap(), None);
    }

    #[test]
    fn garbage_collect_releases_only_stale() {
        let fx = Fixture::new();
        let a = fx.project("a");
        let b = fx.project("b");
        let registry = fx.registry();

        registry.allocate(&key("a"), 8080, &a).unwrap();
        registry.allocate(&key("b"), 8080, &b).unwrap();
        fs::remove_dir_all(&a).unwrap();

        let released = registry.garbage_collect().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].key, key("a"));
        assert_eq!(registry.lookup(&key("b")).unwrap(), Some(8081));
        assert!(registry.garbage_collect().unwrap().is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let fx = Fixture::new();
        let project = fx.project("site-a");
        let registry = fx.registry();
        fs::write(
            registry.path(),
            format!(
                r#"{{"site-a": {{"port": 8080, "projectPath": {:?}, "owner": "someone"}}}}"#,
                project
            ),
        )
        .unwrap();

        assert_eq!(registry.lookup(&key("site-a")).unwrap(), Some(8080));
    }
}
