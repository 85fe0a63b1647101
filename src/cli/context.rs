//! cli::context
//!
//! Per-invocation state shared by command handlers.
//!
//! # Architecture
//!
//! [`Context`] carries the global flags. [`Workspace`] is built from it by
//! the handlers that touch stores or the engine: it resolves the project
//! (`--site` alias, `--cwd`, or the working directory), loads the merged
//! configuration, and owns the stores. Routers and controllers borrow from
//! the workspace, so nothing outlives one invocation.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::core::config::Config;
use crate::core::paths::SpinPaths;
use crate::core::types::ProjectRoot;
use crate::domain::{CommandProxy, DomainRouter, MkcertIssuer};
use crate::ports::{PortRegistry, SystemProber};
use crate::sites::SiteDirectory;
use crate::stack::{DockerCli, PrereqScope, StackController, StackSettings};
use crate::ui::output::Verbosity;

/// Global flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Working directory override.
    pub cwd: Option<PathBuf>,
    /// Site alias or project path.
    pub site: Option<String>,
    /// Debug logging enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
}

impl Context {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }

    /// `--cwd` or the process working directory.
    pub fn working_dir(&self) -> Result<PathBuf> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to read the working directory"),
        }
    }
}

/// Stores, engine and configuration for one invocation.
pub struct Workspace {
    pub paths: SpinPaths,
    pub config: Config,
    pub project: ProjectRoot,
    pub registry: PortRegistry,
    pub engine: DockerCli,
    pub sites: SiteDirectory,
}

impl Workspace {
    /// Resolve the project and load everything it needs.
    pub fn open(ctx: &Context) -> Result<Self> {
        let paths = SpinPaths::discover().context("Failed to locate the wp-spin storage root")?;
        let sites = SiteDirectory::open(&paths);

        let project = match &ctx.site {
            Some(site) => sites
                .resolve(site)
                .with_context(|| format!("Failed to resolve site '{}'", site))?,
            None => {
                let dir = ctx.working_dir()?;
                ProjectRoot::new(&dir)
                    .with_context(|| format!("Failed to open project {}", dir.display()))?
            }
        };
        debug!(project = %project, root = %paths.root().display(), "opened workspace");

        let config = Config::load(&paths, Some(project.path())).context("Failed to load config")?;
        let sites = sites.with_lock_timeout(config.lock_timeout());
        let registry = PortRegistry::open(&paths, Box::new(SystemProber::new()))
            .with_window(config.scan_window())
            .with_lock_timeout(config.lock_timeout());
        let engine = DockerCli::new(
            config.engine_binary(),
            config.compose_override().map(<[String]>::to_vec),
        );

        Ok(Self {
            paths,
            config,
            project,
            registry,
            engine,
            sites,
        })
    }

    /// Domain router over this workspace's registry.
    pub fn router(&self) -> DomainRouter<'_> {
        DomainRouter::new(
            &self.paths,
            &self.registry,
            Box::new(CommandProxy::new(self.config.proxy_reload_command())),
            Box::new(MkcertIssuer::new(self.config.tls_issuer())),
        )
        .with_upstream_host(self.config.proxy_upstream_host())
        .with_lock_timeout(self.config.lock_timeout())
    }

    /// Stack controller for the resolved project.
    pub fn controller(&self, scope: PrereqScope) -> Result<StackController<'_>> {
        let settings = StackSettings::from_config(&self.config).context("Invalid project settings")?;
        Ok(
            StackController::new(self.project.clone(), &self.engine, &self.registry, settings)
                .with_scope(scope),
        )
    }

    /// Where `config set` writes.
    pub fn global_config_path(&self) -> PathBuf {
        self.config
            .global_config_loaded_from()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.config_path())
    }
}
