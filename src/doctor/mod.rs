//! doctor
//!
//! Diagnosis and explicit repair of persisted state.
//!
//! # Architecture
//!
//! [`Doctor::diagnose`] only reads. It checks, in order:
//!
//! 1. Engine prerequisites (blocking)
//! 2. Quarantined stores (blocking for writes)
//! 3. Port allocations of removed projects (warning)
//! 4. Drift between route files and the bindings file (warning)
//! 5. Hostnames routed to removed projects (warning)
//! 6. Site aliases pointing at missing directories (info)
//!
//! Nothing is changed unless the user asks: [`Doctor::repair`] backs
//! `--repair`, [`Doctor::acknowledge_corrupt`] backs
//! `--acknowledge-corrupt`.
//!
//! # Repair order
//!
//! Bindings are reconciled from the route files first, so the unbind of
//! orphaned hostnames sees the true set. Allocations are collected after
//! that because unbinding releases hostname allocations itself.

mod issues;

pub use issues::{KnownIssue, Severity};

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::core::errors::SpinError;
use crate::domain::{DomainBinding, DomainRouter, ReconcileReport};
use crate::ports::{PortAllocation, PortRegistry};
use crate::sites::{SiteAlias, SiteDirectory, SiteError};
use crate::stack::ContainerEngine;

/// Errors from doctor operations.
#[derive(Debug, Error)]
pub enum DoctorError {
    #[error(transparent)]
    Spin(#[from] SpinError),

    #[error(transparent)]
    Sites(#[from] SiteError),
}

/// Counts per severity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosisSummary {
    pub blocking_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

/// Result of a diagnosis.
#[derive(Debug, Default)]
pub struct DiagnosisReport {
    /// Issues, worst first.
    pub issues: Vec<KnownIssue>,
    pub summary: DiagnosisSummary,
}

impl DiagnosisReport {
    fn new(mut issues: Vec<KnownIssue>) -> Self {
        issues.sort_by_key(KnownIssue::severity);
        let count = |s: Severity| issues.iter().filter(|i| i.severity() == s).count();
        let summary = DiagnosisSummary {
            blocking_count: count(Severity::Blocking),
            warning_count: count(Severity::Warning),
            info_count: count(Severity::Info),
        };
        Self { issues, summary }
    }

    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.summary.blocking_count > 0
    }

    /// True if `--repair` would change anything.
    pub fn has_repairable_issues(&self) -> bool {
        self.issues.iter().any(|i| {
            !matches!(
                i,
                KnownIssue::PrerequisiteFailed { .. } | KnownIssue::CorruptStore { .. }
            )
        })
    }

    /// Human-readable report.
    pub fn format(&self) -> String {
        if self.is_healthy() {
            return "Everything looks good - no issues found.".to_string();
        }

        let mut lines = vec![
            format!(
                "Found {} issue(s): {} blocking, {} warnings, {} info",
                self.issues.len(),
                self.summary.blocking_count,
                self.summary.warning_count,
                self.summary.info_count
            ),
            String::new(),
        ];
        for issue in &self.issues {
            lines.push(format!("[{}] {} ({})", issue.severity(), issue, issue.issue_id()));
            lines.push(format!("  fix: {}", issue.remedy()));
        }
        lines.join("\n")
    }
}

/// What a repair changed.
#[derive(Debug, Default)]
pub struct RepairOutcome {
    pub reconciled: ReconcileReport,
    pub unbound: Vec<DomainBinding>,
    pub released: Vec<PortAllocation>,
    pub pruned: Vec<SiteAlias>,
}

impl RepairOutcome {
    pub fn is_noop(&self) -> bool {
        self.reconciled.is_clean()
            && self.unbound.is_empty()
            && self.released.is_empty()
            && self.pruned.is_empty()
    }
}

/// Diagnoses and repairs the shared stores.
pub struct Doctor<'a> {
    engine: &'a dyn ContainerEngine,
    registry: &'a PortRegistry,
    router: &'a DomainRouter<'a>,
    sites: &'a SiteDirectory,
}

impl<'a> Doctor<'a> {
    pub fn new(
        engine: &'a dyn ContainerEngine,
        registry: &'a PortRegistry,
        router: &'a DomainRouter<'a>,
        sites: &'a SiteDirectory,
    ) -> Self {
        Self {
            engine,
            registry,
            router,
            sites,
        }
    }

    /// Inspect the host and the stores without changing anything.
    pub fn diagnose(&self) -> Result<DiagnosisReport, DoctorError> {
        let mut issues = Vec::new();

        let prerequisites = self
            .engine
            .check_binary()
            .map_err(|e| ("engine", e))
            .and_then(|()| self.engine.check_daemon().map_err(|e| ("daemon", e)))
            .and_then(|()| self.engine.check_compose().map_err(|e| ("compose", e)));
        if let Err((check, e)) = prerequisites {
            issues.push(KnownIssue::PrerequisiteFailed {
                check: check.to_string(),
                message: e.to_string(),
            });
        }

        for (store, aside) in self.quarantined_stores() {
            issues.push(KnownIssue::CorruptStore { store, aside });
        }

        for alloc in self.registry.list()? {
            if !alloc.is_live() {
                issues.push(KnownIssue::StaleAllocation {
                    key: alloc.key.to_string(),
                    port: alloc.port,
                    project: alloc.project_path,
                });
            }
        }

        let drift = self.router.drift()?;
        let described = [
            (&drift.added, "has a route file but no binding record"),
            (&drift.updated, "differs from its route file"),
            (&drift.removed, "has no route file"),
        ];
        for (hosts, detail) in described {
            for host in hosts {
                issues.push(KnownIssue::BindingDrift {
                    hostname: host.to_string(),
                    detail: detail.to_string(),
                });
            }
        }

        for binding in self.router.list()? {
            if !binding.project_path.exists() {
                issues.push(KnownIssue::OrphanedBinding {
                    hostname: binding.hostname.to_string(),
                    project: binding.project_path,
                });
            }
        }

        for alias in self.sites.dangling()? {
            issues.push(KnownIssue::DanglingSite {
                name: alias.name,
                path: alias.path,
            });
        }

        Ok(DiagnosisReport::new(issues))
    }

    /// Fix everything `--repair` covers.
    ///
    /// Quarantined stores still refuse writes; acknowledge them first.
    pub fn repair(&self) -> Result<RepairOutcome, DoctorError> {
        let reconciled = self.router.reconcile()?;

        let mut unbound = Vec::new();
        for binding in self.router.list()? {
            if !binding.project_path.exists() {
                if let Some(removed) = self.router.unbind(&binding.hostname)? {
                    unbound.push(removed);
                }
            }
        }

        let released = self.registry.garbage_collect()?;
        let pruned = self.sites.prune()?;

        let outcome = RepairOutcome {
            reconciled,
            unbound,
            released,
            pruned,
        };
        info!(
            unbound = outcome.unbound.len(),
            released = outcome.released.len(),
            pruned = outcome.pruned.len(),
            "repair complete"
        );
        Ok(outcome)
    }

    /// Lift write refusal on every quarantined store. Returns the stores
    /// that were unlocked; the aside copies are kept.
    pub fn acknowledge_corrupt(&self) -> Result<Vec<PathBuf>, DoctorError> {
        let mut lifted = Vec::new();
        if self.registry.acknowledge_corruption()? {
            lifted.push(self.registry.path().to_path_buf());
        }
        if self.router.acknowledge_corruption()? {
            lifted.push(self.router.bindings_path().to_path_buf());
        }
        if self.sites.acknowledge_corruption()? {
            lifted.push(self.sites.path().to_path_buf());
        }
        Ok(lifted)
    }

    fn quarantined_stores(&self) -> Vec<(PathBuf, PathBuf)> {
        [
            (self.registry.path().to_path_buf(), self.registry.quarantined()),
            (self.router.bindings_path().to_path_buf(), self.router.quarantined()),
            (self.sites.path().to_path_buf(), self.sites.quarantined()),
        ]
        .into_iter()
        .filter_map(|(store, aside)| aside.map(|aside| (store, aside)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paths::SpinPaths;
    use crate::core::types::{AllocationKey, Hostname};
    use crate::domain::mock::{MockIssuer, MockProxy};
    use crate::ports::mock::MockProber;
    use crate::stack::mock::MockEngine;
    use std::fs;
    use tempfile::TempDir;

    struct Env {
        home: TempDir,
        paths: SpinPaths,
        registry: PortRegistry,
        sites: SiteDirectory,
    }

    fn env() -> Env {
        let home = TempDir::new().unwrap();
        let paths = SpinPaths::new(home.path().to_path_buf());
        let registry = PortRegistry::open(&paths, Box::new(MockProber::new()));
        let sites = SiteDirectory::open(&paths);
        Env {
            home,
            paths,
            registry,
            sites,
        }
    }

    fn router<'a>(env: &'a Env) -> DomainRouter<'a> {
        DomainRouter::new(
            &env.paths,
            &env.registry,
            Box::new(MockProxy::new()),
            Box::new(MockIssuer::new()),
        )
    }

    #[test]
    fn clean_state_is_healthy() {
        let env = env();
        let engine = MockEngine::new();
        let router = router(&env);
        let report = Doctor::new(&engine, &env.registry, &router, &env.sites)
            .diagnose()
            .unwrap();
        assert!(report.is_healthy(), "{}", report.format());
    }

    #[test]
    fn reports_engine_and_stale_state() {
        let env = env();
        let engine = MockEngine::new().with_daemon_running(false);
        let router = router(&env);

        let gone = TempDir::new().unwrap();
        let gone_path = gone.path().to_path_buf();
        env.registry
            .record(&AllocationKey::raw("gone.test"), 8080, &gone_path)
            .unwrap();
        env.sites.add("gone", &gone_path).unwrap();
        drop(gone);

        let report = Doctor::new(&engine, &env.registry, &router, &env.sites)
            .diagnose()
            .unwrap();
        assert_eq!(report.summary.blocking_count, 1);
        assert_eq!(report.issues[0].issue_id(), "prerequisite:daemon");
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_id() == "stale-allocation:gone.test"));
        assert!(report.issues.iter().any(|i| i.issue_id() == "dangling-site:gone"));
        assert!(report.has_repairable_issues());
    }

    #[test]
    fn repair_reconciles_and_collects() {
        let env = env();
        let engine = MockEngine::new();
        let router = router(&env);

        let project = TempDir::new().unwrap();
        let host = Hostname::new("blog.test").unwrap();
        router.bind(&host, 8080, false, project.path()).unwrap();

        // Binding record lost; route file survives.
        fs::remove_file(env.paths.domains_path()).unwrap();

        let gone = TempDir::new().unwrap();
        let gone_path = gone.path().to_path_buf();
        env.registry
            .record(&AllocationKey::raw("/sites/gone"), 9000, &gone_path)
            .unwrap();
        drop(gone);

        let doctor = Doctor::new(&engine, &env.registry, &router, &env.sites);
        let before = doctor.diagnose().unwrap();
        assert!(before
            .issues
            .iter()
            .any(|i| i.issue_id() == "binding-drift:blog.test"));

        let outcome = doctor.repair().unwrap();
        assert_eq!(outcome.reconciled.added, vec![host.clone()]);
        assert_eq!(outcome.released.len(), 1);
        assert_eq!(router.route_for(&host).unwrap(), Some(8080));
        assert!(doctor.diagnose().unwrap().is_healthy());
        assert!(doctor.repair().unwrap().is_noop());
    }

    #[test]
    fn repair_unbinds_removed_projects() {
        let env = env();
        let engine = MockEngine::new();
        let router = router(&env);

        let gone = TempDir::new().unwrap();
        let host = Hostname::new("old.test").unwrap();
        router.bind(&host, 8081, false, gone.path()).unwrap();
        drop(gone);

        let doctor = Doctor::new(&engine, &env.registry, &router, &env.sites);
        let outcome = doctor.repair().unwrap();
        assert_eq!(outcome.unbound.len(), 1);
        assert!(router.list().unwrap().is_empty());
        assert!(!env.paths.proxy_route_path("old.test").exists());
    }

    #[test]
    fn corrupt_store_is_blocking_until_acknowledged() {
        let env = env();
        let engine = MockEngine::new();
        let router = router(&env);
        fs::create_dir_all(env.home.path()).unwrap();
        fs::write(env.paths.ports_path(), "{ not json").unwrap();
        // Reading quarantines the file.
        assert!(env.registry.list().unwrap().is_empty());

        let doctor = Doctor::new(&engine, &env.registry, &router, &env.sites);
        let report = doctor.diagnose().unwrap();
        assert!(report.has_blocking_issues());
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_id() == "corrupt-store:ports.json"));

        let lifted = doctor.acknowledge_corrupt().unwrap();
        assert_eq!(lifted, vec![env.paths.ports_path()]);
        assert!(doctor.diagnose().unwrap().is_healthy());
    }
}
