//! stack::controller
//!
//! Lifecycle of one project's container stack.
//!
//! # Architecture
//!
//! Every mutating operation follows the same pipeline:
//!
//! 1. Take the project operation lock (`.wp-spin/state.json.lock`)
//! 2. Verify prerequisites, fail fast, before any side effect
//! 3. Write the in-flight marker (`Starting` / `Stopping`)
//! 4. Reconcile declared host ports against the registry and the host
//! 5. Run compose, retrying `up` on engine bind conflicts
//! 6. Write the settled marker, or `Degraded` on failure
//!
//! The operation lock doubles as the in-flight signal: a marker left in a
//! transient state while the lock is free belongs to an interrupted run.
//!
//! # Example
//!
//! ```
//! use wpspin::core::types::ProjectRoot;
//! use wpspin::ports::{mock::MockProber, PortRegistry};
//! use wpspin::stack::controller::{StackController, StackSettings};
//! use wpspin::stack::mock::MockEngine;
//!
//! let temp = tempfile::tempdir().unwrap();
//! let registry = PortRegistry::at(temp.path().join("ports.json"), Box::new(MockProber::new()));
//! let engine = MockEngine::new();
//! let project = ProjectRoot::new(temp.path()).unwrap();
//! let controller = StackController::new(project, &engine, &registry, StackSettings::default());
//! assert!(controller.status().unwrap().containers.is_empty());
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::compose::{ComposeFile, DeclaredPort};
use super::engine::{detect_bind_conflict, ContainerEngine, ContainerInfo};
use super::host::{HostResources, SystemResources};
use super::role::ContainerRole;
use super::state::{StackMarker, StackOperation, StackStatus};
use crate::core::config::Config;
use crate::core::errors::SpinError;
use crate::core::paths::SpinPaths;
use crate::core::process::ProcessOutput;
use crate::core::store::lock::{LockError, StoreLock};
use crate::core::types::{AllocationKey, Hostname, ProjectRoot};
use crate::domain::DomainRouter;
use crate::ports::PortRegistry;

/// Which prerequisite checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrereqScope {
    /// Engine, daemon and compose.
    Operate,
    /// Everything in `Operate` plus disk and memory headroom.
    Init,
}

/// Knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct StackSettings {
    pub compose_file: String,
    pub bind_retries: u32,
    pub min_disk_mb: u64,
    pub min_memory_mb: u64,
    /// Service users browse to. Guessed from service names when unset.
    pub primary_service: Option<String>,
    /// Custom hostname; the primary port is then reserved under it.
    pub hostname: Option<Hostname>,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            compose_file: "docker-compose.yml".into(),
            bind_retries: 3,
            min_disk_mb: 2048,
            min_memory_mb: 1024,
            primary_service: None,
            hostname: None,
        }
    }
}

impl StackSettings {
    /// Settings from merged global and project configuration.
    pub fn from_config(config: &Config) -> Result<Self, SpinError> {
        let hostname = config.project_domain().map(Hostname::new).transpose()?;
        Ok(Self {
            compose_file: config.compose_file().to_string(),
            bind_retries: config.bind_retries(),
            min_disk_mb: config.min_disk_mb(),
            min_memory_mb: config.min_memory_mb(),
            primary_service: config.primary_service().map(str::to_string),
            hostname,
        })
    }
}

/// A declared host port that had to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortChange {
    pub service: String,
    pub key: AllocationKey,
    pub from: u16,
    pub to: u16,
}

/// Snapshot of a stack, recomputed from the engine on every call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDescriptor {
    pub project_root: PathBuf,
    pub project_name: String,
    pub service_names: Vec<String>,
    /// Host ports each service declares in the compose file.
    pub declared_ports: BTreeMap<String, Vec<u16>>,
    pub containers: Vec<ContainerInfo>,
    /// Published host ports of the listed containers, by role.
    pub published_ports: BTreeMap<ContainerRole, Vec<u16>>,
    pub primary_service: Option<String>,
    pub status: StackStatus,
    /// Why the engine could not be read, when `status` is `Unknown`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_error: Option<String>,
}

impl StackDescriptor {
    /// Port the primary service is reachable on: the published port if the
    /// stack runs, else the declared one.
    pub fn primary_port(&self) -> Option<u16> {
        if let Some(port) = self
            .published_ports
            .get(&ContainerRole::Primary)
            .and_then(|ports| ports.first())
        {
            return Some(*port);
        }
        self.primary_service
            .as_ref()
            .and_then(|service| self.declared_ports.get(service))
            .and_then(|ports| ports.first())
            .copied()
    }
}

/// Drives one project's stack through the engine.
pub struct StackController<'a> {
    project: ProjectRoot,
    project_name: String,
    compose_path: PathBuf,
    engine: &'a dyn ContainerEngine,
    registry: &'a PortRegistry,
    resources: Box<dyn HostResources + 'a>,
    settings: StackSettings,
    scope: PrereqScope,
}

impl<'a> StackController<'a> {
    pub fn new(
        project: ProjectRoot,
        engine: &'a dyn ContainerEngine,
        registry: &'a PortRegistry,
        settings: StackSettings,
    ) -> Self {
        let project_name = project.compose_project_name();
        let compose_path = project.path().join(&settings.compose_file);
        Self {
            project,
            project_name,
            compose_path,
            engine,
            registry,
            resources: Box::new(SystemResources),
            settings,
            scope: PrereqScope::Operate,
        }
    }

    /// Replace the host resource source.
    pub fn with_resources(mut self, resources: Box<dyn HostResources + 'a>) -> Self {
        self.resources = resources;
        self
    }

    /// Run `Init` prerequisites (disk, memory) on start.
    pub fn with_scope(mut self, scope: PrereqScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn project(&self) -> &ProjectRoot {
        &self.project
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    /// Check the host can run the stack. Checks run in a fixed order and
    /// the first failure is returned.
    ///
    /// # Errors
    ///
    /// - [`SpinError::PrerequisiteMissing`] for a missing engine or compose
    /// - [`SpinError::PrerequisiteNotRunning`] if the daemon does not answer
    /// - [`SpinError::ResourceInsufficient`] for `Init` below the minimums
    pub fn verify_prerequisites(&self, scope: PrereqScope) -> Result<(), SpinError> {
        self.engine.check_binary()?;
        self.engine.check_daemon()?;
        self.engine.check_compose()?;

        if scope == PrereqScope::Init {
            match self.resources.free_disk_mb(self.project.path()) {
                Some(available) if available < self.settings.min_disk_mb => {
                    return Err(SpinError::ResourceInsufficient {
                        resource: "disk space".into(),
                        available_mb: available,
                        required_mb: self.settings.min_disk_mb,
                    });
                }
                Some(_) => {}
                None => warn!("cannot determine free disk space; skipping check"),
            }
            match self.resources.available_memory_mb() {
                Some(available) if available < self.settings.min_memory_mb => {
                    return Err(SpinError::ResourceInsufficient {
                        resource: "memory".into(),
                        available_mb: available,
                        required_mb: self.settings.min_memory_mb,
                    });
                }
                Some(_) => {}
                None => warn!("cannot determine available memory; skipping check"),
            }
        }
        Ok(())
    }

    /// Make sure every declared host port is free for this project.
    ///
    /// A port is occupied when another live project or another service of
    /// this stack holds it in the registry, when the host reports it in use,
    /// or when the host cannot be asked. Free ports are recorded for their service; occupied ones are
    /// moved to the next free port and the compose file is rewritten.
    /// Ports already published by this stack's own running containers count
    /// as free.
    #[instrument(level = "debug", skip(self, compose), fields(project = %self.project_name))]
    pub fn reconcile_ports(&self, compose: &mut ComposeFile) -> Result<Vec<PortChange>, SpinError> {
        let own_ports: Vec<u16> = self
            .engine
            .list_containers(&self.project_name)?
            .iter()
            .filter(|c| c.is_running())
            .flat_map(|c| c.host_ports.iter().copied())
            .collect();

        let declared = compose.declared_ports();
        let primary = self.primary_service(compose);
        let keys: Vec<AllocationKey> = declared
            .iter()
            .map(|port| self.key_for(port, &declared, primary.as_deref()))
            .collect();
        let declared_host_ports: Vec<u16> = declared.iter().map(|d| d.host_port).collect();
        let mut changes = Vec::new();

        for (port, key) in declared.iter().zip(keys.iter().cloned()) {
            let free = own_ports.contains(&port.host_port)
                || !self.is_occupied(&key, port.host_port, &keys)?;
            if free {
                self.registry.record(&key, port.host_port, self.project.path())?;
                continue;
            }

            let moved = self.registry.reallocate(
                &key,
                port.host_port.saturating_add(1),
                self.project.path(),
                &declared_host_ports,
            )?;
            compose.rewrite_host_port(&port.service, port.host_port, moved)?;
            info!(service = %port.service, from = port.host_port, to = moved, "moved occupied port");
            changes.push(PortChange {
                service: port.service.clone(),
                key,
                from: port.host_port,
                to: moved,
            });
        }
        Ok(changes)
    }

    /// Run a lifecycle operation, streaming engine output to `sink`.
    ///
    /// Returns the ports that had to move on the way up.
    ///
    /// # Errors
    ///
    /// - prerequisite errors, with no side effects
    /// - [`SpinError::StackOperationFailed`] if compose fails or another
    ///   invocation is operating on the project
    /// - [`SpinError::NoPortAvailable`] once bind-conflict retries run out
    #[instrument(skip(self, sink), fields(project = %self.project_name))]
    pub fn apply(
        &self,
        op: StackOperation,
        sink: &mut dyn FnMut(&str),
    ) -> Result<Vec<PortChange>, SpinError> {
        let _guard = self.operation_lock(op)?;

        let current = StackMarker::load(self.project.path())
            .map(|marker| marker.effective_state(false))
            .unwrap_or(StackStatus::Unknown);
        let in_flight = current
            .begin(op)
            .map_err(|reason| self.failure(op, None, reason))?;

        self.verify_prerequisites(self.scope)?;

        StackMarker::save(self.project.path(), in_flight, None)?;
        debug!(from = %current, to = %in_flight, "stack transition");

        let result = match op {
            StackOperation::Start => self.up(sink),
            StackOperation::Stop => self.down(sink).map(|()| Vec::new()),
            StackOperation::Restart => self.down(sink).and_then(|()| self.up(sink)),
        };

        match result {
            Ok(changes) => {
                StackMarker::save(self.project.path(), StackStatus::settled(op), None)?;
                info!(operation = %op, "stack operation complete");
                Ok(changes)
            }
            Err(err) => {
                if let Err(marker_err) =
                    StackMarker::save(self.project.path(), StackStatus::Degraded, Some(err.to_string()))
                {
                    warn!(error = %marker_err, "could not record degraded state");
                }
                Err(err)
            }
        }
    }

    /// Describe the stack as the engine currently sees it.
    ///
    /// An unreachable engine is not an error: the descriptor carries
    /// `Unknown` and the reason.
    pub fn status(&self) -> Result<StackDescriptor, SpinError> {
        let compose = if self.compose_path.exists() {
            Some(ComposeFile::load(&self.compose_path)?)
        } else {
            None
        };

        let mut declared_ports: BTreeMap<String, Vec<u16>> = BTreeMap::new();
        let mut service_names = Vec::new();
        let mut primary_service = None;
        if let Some(compose) = &compose {
            service_names = compose.service_names();
            for port in compose.declared_ports() {
                declared_ports
                    .entry(port.service)
                    .or_default()
                    .push(port.host_port);
            }
            primary_service = self.primary_service(compose);
        }

        let (containers, engine_error) = match self.engine.list_containers(&self.project_name) {
            Ok(containers) => (containers, None),
            Err(e) => {
                debug!(error = %e, "engine unreadable");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let mut published_ports: BTreeMap<ContainerRole, Vec<u16>> = BTreeMap::new();
        for container in &containers {
            published_ports
                .entry(ContainerRole::classify(&container.service))
                .or_default()
                .extend(container.host_ports.iter().copied());
        }
        for ports in published_ports.values_mut() {
            ports.sort_unstable();
            ports.dedup();
        }

        let observed = if engine_error.is_some() {
            StackStatus::Unknown
        } else if containers.is_empty() {
            StackStatus::Stopped
        } else if containers.iter().all(ContainerInfo::is_running) {
            StackStatus::Running
        } else {
            StackStatus::Degraded
        };

        Ok(StackDescriptor {
            project_root: self.project.path().to_path_buf(),
            project_name: self.project_name.clone(),
            service_names,
            declared_ports,
            containers,
            published_ports,
            primary_service,
            status: self.apply_marker(observed)?,
            engine_error,
        })
    }

    /// Stream compose logs for the stack or one service.
    pub fn logs(
        &self,
        follow: bool,
        service: Option<&str>,
        sink: &mut dyn FnMut(&str),
    ) -> Result<(), SpinError> {
        self.engine.check_daemon()?;
        let mut args = vec!["logs"];
        if follow {
            args.push("-f");
        }
        if let Some(service) = service {
            args.push(service);
        }
        let out = self.engine.compose(
            self.project.path(),
            &self.project_name,
            &self.compose_path,
            &args,
            sink,
        )?;
        if !out.success() {
            return Err(SpinError::StackOperationFailed {
                operation: "logs".into(),
                project: self.project.path().to_path_buf(),
                exit_code: out.code,
                output: out.combined(),
            });
        }
        Ok(())
    }

    /// URL to show the user: a bound hostname if the project has one,
    /// otherwise `http://localhost:<primary port>`.
    pub fn primary_url(
        &self,
        descriptor: &StackDescriptor,
        router: &DomainRouter<'_>,
    ) -> Result<Option<String>, SpinError> {
        let bindings = router.bindings_for(self.project.path())?;
        let preferred = self
            .settings
            .hostname
            .as_ref()
            .and_then(|host| bindings.iter().find(|b| &b.hostname == host))
            .or_else(|| bindings.first());
        if let Some(binding) = preferred {
            return Ok(Some(binding.url()));
        }
        Ok(descriptor
            .primary_port()
            .map(|port| format!("http://localhost:{}", port)))
    }

    fn up(&self, sink: &mut dyn FnMut(&str)) -> Result<Vec<PortChange>, SpinError> {
        let mut compose = ComposeFile::load(&self.compose_path)?;
        let mut changes = if self.is_running()? {
            debug!("stack already running; leaving ports alone");
            Vec::new()
        } else {
            self.reconcile_ports(&mut compose)?
        };

        let mut conflicted: Vec<u16> = Vec::new();
        loop {
            let out = self.compose(&["up", "-d"], sink)?;
            if out.success() {
                return Ok(changes);
            }

            let output = out.combined();
            let Some(port) = detect_bind_conflict(&output) else {
                return Err(self.failure(StackOperation::Start, out.code, output));
            };
            if conflicted.len() as u32 >= self.settings.bind_retries {
                return Err(SpinError::NoPortAvailable {
                    key: self.conflict_key(&compose, port),
                    preferred: port,
                    window: self.registry.window(),
                    unprobeable: 0,
                });
            }

            warn!(port, attempt = conflicted.len() + 1, "engine reported bind conflict");
            conflicted.push(port);
            changes.push(self.resolve_bind_conflict(&mut compose, port, &conflicted)?);
        }
    }

    fn down(&self, sink: &mut dyn FnMut(&str)) -> Result<(), SpinError> {
        let out = self.compose(&["down"], sink)?;
        if out.success() {
            Ok(())
        } else {
            Err(self.failure(StackOperation::Stop, out.code, out.combined()))
        }
    }

    fn compose(
        &self,
        args: &[&str],
        sink: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, SpinError> {
        self.engine.compose(
            self.project.path(),
            &self.project_name,
            &self.compose_path,
            args,
            sink,
        )
    }

    fn resolve_bind_conflict(
        &self,
        compose: &mut ComposeFile,
        port: u16,
        excluded: &[u16],
    ) -> Result<PortChange, SpinError> {
        let declared = compose.declared_ports();
        let primary = self.primary_service(compose);
        let Some(entry) = declared.iter().find(|d| d.host_port == port) else {
            return Err(SpinError::PortBindConflict {
                port,
                detail: format!("not published by {}", self.compose_path.display()),
            });
        };

        let key = self.key_for(entry, &declared, primary.as_deref());
        let mut avoid: Vec<u16> = declared.iter().map(|d| d.host_port).collect();
        avoid.extend_from_slice(excluded);
        let moved = self.registry.reallocate(
            &key,
            port.saturating_add(1),
            self.project.path(),
            &avoid,
        )?;
        compose.rewrite_host_port(&entry.service, port, moved)?;
        info!(service = %entry.service, from = port, to = moved, "retrying with new port");
        Ok(PortChange {
            service: entry.service.clone(),
            key,
            from: port,
            to: moved,
        })
    }

    fn conflict_key(&self, compose: &ComposeFile, port: u16) -> String {
        let declared = compose.declared_ports();
        let primary = self.primary_service(compose);
        declared
            .iter()
            .find(|d| d.host_port == port)
            .map(|d| self.key_for(d, &declared, primary.as_deref()).to_string())
            .unwrap_or_else(|| self.project_name.clone())
    }

    fn is_running(&self) -> Result<bool, SpinError> {
        let containers = self.engine.list_containers(&self.project_name)?;
        Ok(!containers.is_empty() && containers.iter().all(ContainerInfo::is_running))
    }

    /// `siblings` are the keys of every mapping the compose file declares.
    /// Another key of this project that is not among them (the primary port
    /// keyed by project before a hostname was bound, or a removed service)
    /// does not block: `record` transfers its port.
    fn is_occupied(
        &self,
        key: &AllocationKey,
        port: u16,
        siblings: &[AllocationKey],
    ) -> Result<bool, SpinError> {
        if let Some(holder) = self.registry.allocation_for_port(port)? {
            if &holder.key != key && holder.is_live() {
                if holder.project_path != self.project.path() {
                    debug!(port, holder = %holder.key, "port reserved by another project");
                    return Ok(true);
                }
                if siblings.contains(&holder.key) {
                    debug!(port, holder = %holder.key, "port reserved by another service");
                    return Ok(true);
                }
            }
        }
        match self.registry.prober().is_in_use(port) {
            Ok(in_use) => Ok(in_use),
            Err(SpinError::ProbeUnavailable { reason, .. }) => {
                debug!(port, reason = %reason, "cannot probe; treating as occupied");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// The configured primary service, else the first service that looks
    /// like an application server, else the first service publishing ports.
    fn primary_service(&self, compose: &ComposeFile) -> Option<String> {
        if let Some(service) = &self.settings.primary_service {
            return Some(service.clone());
        }
        let declared = compose.declared_ports();
        declared
            .iter()
            .find(|d| ContainerRole::classify(&d.service) == ContainerRole::Primary)
            .or_else(|| declared.first())
            .map(|d| d.service.clone())
    }

    /// Registry key for a declared port. The primary service's first port is
    /// keyed by hostname or project; other ports get per-service keys.
    fn key_for(
        &self,
        port: &DeclaredPort,
        declared: &[DeclaredPort],
        primary: Option<&str>,
    ) -> AllocationKey {
        let siblings: Vec<&DeclaredPort> =
            declared.iter().filter(|d| d.service == port.service).collect();
        let first_of_service = siblings.first().is_some_and(|first| *first == port);

        if primary == Some(port.service.as_str()) && first_of_service {
            return match &self.settings.hostname {
                Some(host) => AllocationKey::for_hostname(host),
                None => AllocationKey::for_project(&self.project),
            };
        }
        if siblings.len() > 1 {
            AllocationKey::for_service(
                &self.project,
                &format!("{}:{}", port.service, port.container_port),
            )
        } else {
            AllocationKey::for_service(&self.project, &port.service)
        }
    }

    fn operation_lock(&self, op: StackOperation) -> Result<StoreLock, SpinError> {
        let state_path = SpinPaths::project_state_path(self.project.path());
        match StoreLock::try_acquire(&state_path) {
            Ok(Some(lock)) => Ok(lock),
            Ok(None) => Err(self.failure(
                op,
                None,
                "another wp-spin invocation is operating on this project".into(),
            )),
            Err(LockError::Timeout(path)) => Err(SpinError::StoreLocked { path }),
            Err(e) => Err(SpinError::io(&state_path, std::io::Error::other(e.to_string()))),
        }
    }

    /// Fold the persisted marker into an observed status.
    fn apply_marker(&self, observed: StackStatus) -> Result<StackStatus, SpinError> {
        let Some(marker) = StackMarker::load(self.project.path()) else {
            return Ok(observed);
        };
        match marker.state {
            StackStatus::Degraded => Ok(StackStatus::Degraded),
            state if state.is_transient() => {
                let state_path = SpinPaths::project_state_path(self.project.path());
                let in_flight = matches!(StoreLock::try_acquire(&state_path), Ok(None));
                Ok(marker.effective_state(in_flight))
            }
            _ => Ok(observed),
        }
    }

    fn failure(&self, op: StackOperation, exit_code: Option<i32>, output: String) -> SpinError {
        SpinError::StackOperationFailed {
            operation: op.to_string(),
            project: self.project.path().to_path_buf(),
            exit_code,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use crate::ports::mock::MockProber;
    use crate::stack::mock::{MockEngine, MockResources};
    use std::fs;
    use tempfile::TempDir;

    const COMPOSE: &str = "\
services:
  wordpress:
    image: wordpress:latest
    ports:
      - \"8080:80\"
  db:
    image: mariadb:10
  phpmyadmin:
    image: phpmyadmin
    ports:
      - \"8081:80\"
";

    struct Fixture {
        home: TempDir,
        project_dir: TempDir,
        registry: PortRegistry,
        prober: MockProber,
        engine: MockEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let home = TempDir::new().unwrap();
            let project_dir = TempDir::new().unwrap();
            fs::write(project_dir.path().join("docker-compose.yml"), COMPOSE).unwrap();
            let prober = MockProber::new();
            let registry =
                PortRegistry::at(home.path().join("ports.json"), Box::new(prober.clone()));
            Self {
                home,
                project_dir,
                registry,
                prober,
                engine: MockEngine::new(),
            }
        }

        fn project(&self) -> ProjectRoot {
            ProjectRoot::new(self.project_dir.path()).unwrap()
        }

        fn controller(&self) -> StackController<'_> {
            StackController::new(
                self.project(),
                &self.engine,
                &self.registry,
                StackSettings::default(),
            )
            .with_resources(Box::new(MockResources::ample()))
        }

        fn compose_text(&self) -> String {
            fs::read_to_string(self.project_dir.path().join("docker-compose.yml")).unwrap()
        }
    }

    fn discard(_: &str) {}

    #[test]
    fn prerequisites_fail_in_order() {
        let fx = Fixture::new();
        let engine = MockEngine::new()
            .with_daemon_running(false)
            .with_compose_present(false);
        let controller =
            StackController::new(fx.project(), &engine, &fx.registry, StackSettings::default());
        let err = controller.verify_prerequisites(PrereqScope::Operate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrerequisiteNotRunning);
    }

    #[test]
    fn init_scope_checks_resources() {
        let fx = Fixture::new();
        let controller = fx.controller().with_resources(Box::new(MockResources {
            disk_mb: Some(100),
            memory_mb: Some(16_000),
        }));
        assert!(controller.verify_prerequisites(PrereqScope::Operate).is_ok());
        let err = controller.verify_prerequisites(PrereqScope::Init).unwrap_err();
        assert!(matches!(
            err,
            SpinError::ResourceInsufficient { available_mb: 100, required_mb: 2048, .. }
        ));
    }

    #[test]
    fn unknown_resources_are_skipped() {
        let fx = Fixture::new();
        let controller = fx.controller().with_resources(Box::new(MockResources::default()));
        assert!(controller.verify_prerequisites(PrereqScope::Init).is_ok());
    }

    #[test]
    fn free_ports_are_recorded() {
        let fx = Fixture::new();
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert!(changes.is_empty());
        let project = fx.project();
        assert_eq!(
            fx.registry.lookup(&AllocationKey::for_project(&project)).unwrap(),
            Some(8080)
        );
        assert_eq!(
            fx.registry
                .lookup(&AllocationKey::for_service(&project, "phpmyadmin"))
                .unwrap(),
            Some(8081)
        );
    }

    #[test]
    fn occupied_port_moves_and_rewrites_compose() {
        let fx = Fixture::new();
        fx.prober.set_busy(8080);
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        // 8081 is phpmyadmin's own declared port, so the primary lands on 8082.
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].service, "wordpress");
        assert_eq!((changes[0].from, changes[0].to), (8080, 8082));
        assert!(fx.compose_text().contains("\"8082:80\""));
        assert!(fx.compose_text().contains("\"8081:80\""));
    }

    fn write_compose(fx: &Fixture, content: &str) {
        fs::write(fx.project_dir.path().join("docker-compose.yml"), content).unwrap();
    }

    #[test]
    fn moved_port_skips_ports_declared_by_later_services() {
        let fx = Fixture::new();
        write_compose(
            &fx,
            "services:\n  app:\n    image: wordpress\n    ports:\n      - \"8080:80\"\n  pma:\n    image: phpmyadmin\n    ports:\n      - \"8081:80\"\n",
        );
        fx.prober.set_busy(8080);
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].service, "app");
        assert_eq!(changes[0].to, 8082);

        let reloaded = ComposeFile::load(controller.compose_path()).unwrap();
        let ports: Vec<u16> = reloaded.declared_ports().iter().map(|d| d.host_port).collect();
        assert_eq!(ports, vec![8082, 8081]);

        let project = fx.project();
        assert_eq!(
            fx.registry.lookup(&AllocationKey::for_project(&project)).unwrap(),
            Some(8082)
        );
        assert_eq!(
            fx.registry
                .lookup(&AllocationKey::for_service(&project, "pma"))
                .unwrap(),
            Some(8081)
        );
    }

    #[test]
    fn occupied_long_syntax_port_is_rewritten() {
        let fx = Fixture::new();
        write_compose(
            &fx,
            "services:\n  wordpress:\n    image: wordpress\n    ports:\n      - published: 8080\n        target: 80\n",
        );
        fx.prober.set_busy(8080);
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!((changes[0].from, changes[0].to), (8080, 8081));
        assert!(fx.compose_text().contains("- published: 8081\n"));
    }

    #[test]
    fn port_held_by_sibling_service_is_occupied() {
        let fx = Fixture::new();
        write_compose(
            &fx,
            "services:\n  app:\n    image: wordpress\n    ports:\n      - \"8080:80\"\n  pma:\n    image: phpmyadmin\n    ports:\n      - \"8080:80\"\n",
        );
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].service, "pma");
        assert_eq!((changes[0].from, changes[0].to), (8080, 8081));
        let project = fx.project();
        assert_eq!(
            fx.registry.lookup(&AllocationKey::for_project(&project)).unwrap(),
            Some(8080)
        );
    }

    #[test]
    fn unprobeable_port_counts_as_occupied() {
        let fx = Fixture::new();
        let prober = MockProber::new().with_unavailable([8081]);
        let registry = PortRegistry::at(fx.home.path().join("other.json"), Box::new(prober));
        let controller =
            StackController::new(fx.project(), &fx.engine, &registry, StackSettings::default());
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].service, "phpmyadmin");
        assert_ne!(changes[0].to, 8081);
    }

    #[test]
    fn port_of_another_live_project_is_occupied() {
        let fx = Fixture::new();
        let other = TempDir::new().unwrap();
        fx.registry
            .record(&AllocationKey::raw("other.test"), 8080, other.path())
            .unwrap();
        let controller = fx.controller();
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();

        let changes = controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!(changes[0].from, 8080);
        assert_eq!(
            fx.registry.holder_of(8080).unwrap(),
            Some(AllocationKey::raw("other.test"))
        );
    }

    #[test]
    fn start_runs_up_and_marks_running() {
        let fx = Fixture::new();
        let controller = fx.controller();
        controller.apply(StackOperation::Start, &mut discard).unwrap();

        assert_eq!(fx.engine.compose_calls(), vec![vec!["up", "-d"]]);
        let marker = StackMarker::load(fx.project_dir.path()).unwrap();
        assert_eq!(marker.state, StackStatus::Running);
    }

    #[test]
    fn unreachable_daemon_has_no_side_effects() {
        let fx = Fixture::new();
        let engine = MockEngine::new().with_daemon_running(false);
        let controller =
            StackController::new(fx.project(), &engine, &fx.registry, StackSettings::default());

        let err = controller.apply(StackOperation::Start, &mut discard).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrerequisiteNotRunning);
        assert!(fx.registry.list().unwrap().is_empty());
        assert!(engine.compose_calls().is_empty());
        assert!(StackMarker::load(fx.project_dir.path()).is_none());
    }

    #[test]
    fn compose_failure_marks_degraded() {
        let fx = Fixture::new();
        fx.engine.push_compose_result(1, "Error: no such image: wordpress:99");
        let controller = fx.controller();

        let err = controller.apply(StackOperation::Start, &mut discard).unwrap_err();
        assert!(matches!(
            err,
            SpinError::StackOperationFailed { exit_code: Some(1), .. }
        ));
        let marker = StackMarker::load(fx.project_dir.path()).unwrap();
        assert_eq!(marker.state, StackStatus::Degraded);
        assert!(marker.last_error.unwrap().contains("no such image"));
    }

    #[test]
    fn bind_conflict_is_retried_with_new_port() {
        let fx = Fixture::new();
        fx.engine.push_compose_result(
            1,
            "Error response from daemon: Bind for 0.0.0.0:8080 failed: port is already allocated",
        );
        let controller = fx.controller();

        let changes = controller.apply(StackOperation::Start, &mut discard).unwrap();
        assert_eq!(fx.engine.compose_calls().len(), 2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, 8080);
        assert!(fx.compose_text().contains(&format!("\"{}:80\"", changes[0].to)));
    }

    #[test]
    fn bind_conflict_retries_are_bounded() {
        let fx = Fixture::new();
        for port in [8080, 8082, 8083, 8084] {
            fx.engine.push_compose_result(
                1,
                &format!("Bind for 0.0.0.0:{} failed: port is already allocated", port),
            );
        }
        let controller = fx.controller();

        let err = controller.apply(StackOperation::Start, &mut discard).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPortAvailable);
        assert_eq!(fx.engine.compose_calls().len(), 4);
        assert_eq!(
            StackMarker::load(fx.project_dir.path()).unwrap().state,
            StackStatus::Degraded
        );
    }

    #[test]
    fn restart_is_down_then_up() {
        let fx = Fixture::new();
        let controller = fx.controller();
        controller.apply(StackOperation::Restart, &mut discard).unwrap();
        assert_eq!(
            fx.engine.compose_calls(),
            vec![vec!["down".to_string()], vec!["up".to_string(), "-d".to_string()]]
        );
    }

    #[test]
    fn concurrent_operation_is_rejected() {
        let fx = Fixture::new();
        let state_path = SpinPaths::project_state_path(fx.project_dir.path());
        let _held = StoreLock::try_acquire(&state_path).unwrap().unwrap();

        let err = fx
            .controller()
            .apply(StackOperation::Stop, &mut discard)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackOperationFailed);
        assert!(fx.engine.compose_calls().is_empty());
    }

    #[test]
    fn status_aggregates_ports_by_role() {
        let fx = Fixture::new();
        let controller = fx.controller();
        let name = controller.project_name().to_string();
        fx.engine.set_containers(vec![
            MockEngine::container(&name, "wordpress", true, &[8080]),
            MockEngine::container(&name, "db", true, &[]),
            MockEngine::container(&name, "phpmyadmin", true, &[8081]),
        ]);

        let status = controller.status().unwrap();
        assert_eq!(status.status, StackStatus::Running);
        assert_eq!(status.published_ports[&ContainerRole::Primary], vec![8080]);
        assert_eq!(status.published_ports[&ContainerRole::AdminUi], vec![8081]);
        assert_eq!(status.primary_port(), Some(8080));
        assert_eq!(status.service_names, vec!["db", "phpmyadmin", "wordpress"]);
    }

    #[test]
    fn status_derivation() {
        let fx = Fixture::new();
        let controller = fx.controller();
        let name = controller.project_name().to_string();
        assert_eq!(controller.status().unwrap().status, StackStatus::Stopped);

        fx.engine.set_containers(vec![
            MockEngine::container(&name, "wordpress", true, &[8080]),
            MockEngine::container(&name, "db", false, &[]),
        ]);
        assert_eq!(controller.status().unwrap().status, StackStatus::Degraded);
    }

    #[test]
    fn degraded_marker_overrides_running_containers() {
        let fx = Fixture::new();
        let controller = fx.controller();
        let name = controller.project_name().to_string();
        fx.engine
            .set_containers(vec![MockEngine::container(&name, "wordpress", true, &[8080])]);
        StackMarker::save(fx.project_dir.path(), StackStatus::Starting, None).unwrap();
        assert_eq!(controller.status().unwrap().status, StackStatus::Degraded);
    }

    #[test]
    fn unreadable_engine_reports_unknown() {
        let fx = Fixture::new();
        let engine = MockEngine::new().with_daemon_running(false);
        let controller =
            StackController::new(fx.project(), &engine, &fx.registry, StackSettings::default());
        let status = controller.status().unwrap();
        assert_eq!(status.status, StackStatus::Unknown);
        assert!(status.engine_error.is_some());
        assert_eq!(status.primary_port(), Some(8080));
    }

    #[test]
    fn successful_stop_clears_degraded() {
        let fx = Fixture::new();
        StackMarker::save(fx.project_dir.path(), StackStatus::Degraded, Some("boom".into()))
            .unwrap();
        fx.controller().apply(StackOperation::Stop, &mut discard).unwrap();
        let marker = StackMarker::load(fx.project_dir.path()).unwrap();
        assert_eq!(marker.state, StackStatus::Stopped);
        assert!(marker.last_error.is_none());
    }

    #[test]
    fn hostname_keys_the_primary_port() {
        let fx = Fixture::new();
        let settings = StackSettings {
            hostname: Some(Hostname::new("blog.test").unwrap()),
            ..StackSettings::default()
        };
        let controller = StackController::new(fx.project(), &fx.engine, &fx.registry, settings);
        let mut compose = ComposeFile::load(controller.compose_path()).unwrap();
        controller.reconcile_ports(&mut compose).unwrap();
        assert_eq!(
            fx.registry.holder_of(8080).unwrap(),
            Some(AllocationKey::raw("blog.test"))
        );
    }

    #[test]
    fn binding_a_hostname_takes_over_the_project_key() {
        let fx = Fixture::new();
        let mut compose = ComposeFile::load(fx.controller().compose_path()).unwrap();
        fx.controller().reconcile_ports(&mut compose).unwrap();

        let settings = StackSettings {
            hostname: Some(Hostname::new("blog.test").unwrap()),
            ..StackSettings::default()
        };
        let controller = StackController::new(fx.project(), &fx.engine, &fx.registry, settings);
        let changes = controller.reconcile_ports(&mut compose).unwrap();

        assert!(changes.is_empty());
        assert_eq!(
            fx.registry.holder_of(8080).unwrap(),
            Some(AllocationKey::raw("blog.test"))
        );
        assert_eq!(
            fx.registry
                .lookup(&AllocationKey::for_project(&fx.project()))
                .unwrap(),
            None
        );
    }
}
