//! End-to-end scenarios across the registry, router and stack controller.
//!
//! Everything external (port probing, proxy reload, certificate issuance,
//! the container engine) is replaced by the crate's mocks; the stores are
//! real files in a temporary storage root.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use wpspin::core::errors::ErrorKind;
use wpspin::core::paths::SpinPaths;
use wpspin::core::types::{AllocationKey, Hostname, ProjectRoot};
use wpspin::domain::mock::{MockIssuer, MockProxy};
use wpspin::domain::DomainRouter;
use wpspin::ports::mock::MockProber;
use wpspin::ports::PortRegistry;
use wpspin::stack::mock::{MockEngine, MockResources};
use wpspin::stack::{StackController, StackMarker, StackOperation, StackSettings, StackStatus};

const COMPOSE: &str = "\
services:
  wordpress:
    image: wordpress:latest
    ports:
      - \"8080:80\"
  db:
    image: mariadb:10
";

struct Host {
    home: TempDir,
    paths: SpinPaths,
    prober: MockProber,
    proxy: MockProxy,
    registry: PortRegistry,
}

impl Host {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let paths = SpinPaths::new(home.path().to_path_buf());
        let prober = MockProber::new();
        let registry = PortRegistry::open(&paths, Box::new(prober.clone()));
        Self {
            home,
            paths,
            prober,
            proxy: MockProxy::new(),
            registry,
        }
    }

    fn router(&self) -> DomainRouter<'_> {
        DomainRouter::new(
            &self.paths,
            &self.registry,
            Box::new(self.proxy.clone()),
            Box::new(MockIssuer::new()),
        )
    }

    fn route_files(&self) -> Vec<String> {
        let dir = self.paths.proxy_routes_dir();
        if !dir.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn project_with_compose() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("docker-compose.yml"), COMPOSE).unwrap();
    dir
}

fn controller<'a>(
    dir: &Path,
    engine: &'a MockEngine,
    registry: &'a PortRegistry,
) -> StackController<'a> {
    StackController::new(
        ProjectRoot::new(dir).unwrap(),
        engine,
        registry,
        StackSettings::default(),
    )
    .with_resources(Box::new(MockResources::ample()))
}

#[test]
fn fresh_allocation_gets_preferred_port() {
    let host = Host::new();
    let site = TempDir::new().unwrap();
    let key = AllocationKey::raw("site-a");

    let port = host.registry.allocate(&key, 8080, site.path()).unwrap();
    assert_eq!(port, 8080);

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(host.paths.ports_path()).unwrap()).unwrap();
    assert_eq!(raw["site-a"]["port"], 8080);
}

#[test]
fn collision_moves_to_next_port() {
    let host = Host::new();
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();

    host.registry
        .allocate(&AllocationKey::raw("site-b"), 8080, b.path())
        .unwrap();
    let port = host
        .registry
        .allocate(&AllocationKey::raw("site-a"), 8080, a.path())
        .unwrap();
    assert_eq!(port, 8081);
}

#[test]
fn unreachable_engine_has_no_side_effects() {
    let host = Host::new();
    let project = project_with_compose();
    let engine = MockEngine::new().with_daemon_running(false);

    let err = controller(project.path(), &engine, &host.registry)
        .apply(StackOperation::Start, &mut |_: &str| {})
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PrerequisiteNotRunning);
    assert!(host.registry.list().unwrap().is_empty());
    assert!(host.route_files().is_empty());
    assert_eq!(host.proxy.reload_count(), 0);
    assert!(StackMarker::load(project.path()).is_none());
    assert!(engine.compose_calls().is_empty());
}

#[test]
fn stale_cleanup_then_reuse() {
    let host = Host::new();
    let gone = TempDir::new().unwrap();
    let gone_path = gone.path().to_path_buf();
    host.registry
        .allocate(&AllocationKey::raw("old-site"), 8080, &gone_path)
        .unwrap();
    drop(gone);

    let released = host.registry.garbage_collect().unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].port, 8080);

    let fresh = TempDir::new().unwrap();
    let port = host
        .registry
        .allocate(&AllocationKey::raw("new-site"), 8080, fresh.path())
        .unwrap();
    assert_eq!(port, 8080);
}

#[test]
fn rebinding_a_hostname_leaves_one_route() {
    let host = Host::new();
    let project = TempDir::new().unwrap();
    let root = ProjectRoot::new(project.path()).unwrap();
    let router = host.router();
    let hostname = Hostname::new("blog.test").unwrap();

    router.bind(&hostname, 8080, false, root.path()).unwrap();
    router.bind(&hostname, 8081, false, root.path()).unwrap();

    assert_eq!(host.route_files(), vec!["blog.test.conf".to_string()]);
    assert_eq!(router.route_for(&hostname).unwrap(), Some(8081));
    assert_eq!(router.list().unwrap().len(), 1);
}

#[test]
fn start_moves_port_held_by_another_process() {
    let host = Host::new();
    let project = project_with_compose();
    let engine = MockEngine::new();
    host.prober.set_busy(8080);

    let changes = controller(project.path(), &engine, &host.registry)
        .apply(StackOperation::Start, &mut |_: &str| {})
        .unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!((changes[0].from, changes[0].to), (8080, 8081));
    let compose = fs::read_to_string(project.path().join("docker-compose.yml")).unwrap();
    assert!(compose.contains("\"8081:80\""));
    assert_eq!(
        StackMarker::load(project.path()).unwrap().state,
        StackStatus::Running
    );
}

#[test]
fn two_projects_never_share_a_port() {
    let host = Host::new();
    let first = project_with_compose();
    let second = project_with_compose();
    let engine = MockEngine::new();

    controller(first.path(), &engine, &host.registry)
        .apply(StackOperation::Start, &mut |_: &str| {})
        .unwrap();
    let changes = controller(second.path(), &engine, &host.registry)
        .apply(StackOperation::Start, &mut |_: &str| {})
        .unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to, 8081);
    let mut ports: Vec<u16> = host
        .registry
        .list()
        .unwrap()
        .iter()
        .map(|a| a.port)
        .collect();
    ports.sort_unstable();
    assert_eq!(ports, vec![8080, 8081]);
    assert!(host.home.path().join("ports.json").exists());
}
