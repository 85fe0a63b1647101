//! domain::router
//!
//! Hostname to port routing, kept consistent across the proxy config,
//! the bindings file and the port registry.
//!
//! # Ordering
//!
//! A bind or unbind is one logical transaction over two artifacts:
//!
//! 1. The route file (written atomically, then the proxy is reloaded)
//! 2. The binding record in `domains.json`
//!
//! The route file always changes first. If the reload fails the previous
//! route file is restored and the record is left alone. If the process dies
//! between the two steps, the route file is authoritative and
//! [`DomainRouter::reconcile`] re-derives the records from it.
//!
//! A bind claims the port in the registry before touching the route file,
//! so a port taken by another project fails the bind with nothing written.
//! The claim is rolled back when the reload fails.
//!
//! # Locking
//!
//! All mutation happens under the bindings lock. When the port registry is
//! touched as well it is locked second; the registry never takes the
//! bindings lock, so the two cannot deadlock.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::proxy::{read_routes, ProxyController, RouteSpec};
use super::tls::CertificateIssuer;
use crate::core::errors::SpinError;
use crate::core::paths::SpinPaths;
use crate::core::store::{write_atomic, JsonStore};
use crate::core::types::{AllocationKey, Hostname};
use crate::ports::PortRegistry;

/// Upstream host the proxy container uses to reach published ports.
pub const DEFAULT_UPSTREAM_HOST: &str = "host.docker.internal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingRecord {
    port: u16,
    project_path: PathBuf,
    #[serde(default)]
    tls: bool,
}

type BindingDoc = BTreeMap<Hostname, BindingRecord>;

/// A hostname routed to a local port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainBinding {
    pub hostname: Hostname,
    pub port: u16,
    pub tls_enabled: bool,
    pub certificate_ref: Option<PathBuf>,
    pub project_path: PathBuf,
}

impl DomainBinding {
    /// URL a browser should open.
    pub fn url(&self) -> String {
        let scheme = if self.tls_enabled { "https" } else { "http" };
        format!("{}://{}", scheme, self.hostname)
    }
}

/// Outcome of re-deriving bindings from the route files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<Hostname>,
    pub updated: Vec<Hostname>,
    pub removed: Vec<Hostname>,
}

impl ReconcileReport {
    /// True when the bindings file already matched the route files.
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// The domain router.
pub struct DomainRouter<'a> {
    paths: SpinPaths,
    bindings: JsonStore<BindingDoc>,
    registry: &'a PortRegistry,
    proxy: Box<dyn ProxyController + 'a>,
    issuer: Box<dyn CertificateIssuer + 'a>,
    upstream_host: String,
}

impl<'a> DomainRouter<'a> {
    pub fn new(
        paths: &SpinPaths,
        registry: &'a PortRegistry,
        proxy: Box<dyn ProxyController + 'a>,
        issuer: Box<dyn CertificateIssuer + 'a>,
    ) -> Self {
        Self {
            paths: paths.clone(),
            bindings: JsonStore::new(paths.domains_path()),
            registry,
            proxy,
            issuer,
            upstream_host: DEFAULT_UPSTREAM_HOST.to_string(),
        }
    }

    /// Override the host the proxy forwards to.
    pub fn with_upstream_host(mut self, host: impl Into<String>) -> Self {
        self.upstream_host = host.into();
        self
    }

    /// Override the bindings lock timeout.
    pub fn with_lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.bindings = JsonStore::with_timeout(self.paths.domains_path(), timeout);
        self
    }

    /// Path of `domains.json`.
    pub fn bindings_path(&self) -> &Path {
        self.bindings.path()
    }

    /// Quarantined copy of a corrupt `domains.json`, if writes are refused.
    pub fn quarantined(&self) -> Option<PathBuf> {
        self.bindings.quarantined()
    }

    /// Resume writes after a corruption.
    pub fn acknowledge_corruption(&self) -> Result<bool, SpinError> {
        self.bindings.acknowledge_corruption()
    }

    /// Route `hostname` to `port`, replacing any previous route in place.
    ///
    /// The hostname's allocation, if any, moves to `port` before the route
    /// is written and moves back if the proxy rejects it.
    ///
    /// # Errors
    ///
    /// - [`SpinError::PortBindConflict`] if another project holds `port`
    /// - [`SpinError::RouteActivationFailed`] if `hostname` is bound to
    ///   another existing project, or if issuance or the reload fails; the
    ///   bindings file is unchanged in those cases
    #[instrument(level = "debug", skip(self, project), fields(hostname = %hostname))]
    pub fn bind(
        &self,
        hostname: &Hostname,
        port: u16,
        tls: bool,
        project: &Path,
    ) -> Result<DomainBinding, SpinError> {
        self.bindings.update(|doc| {
            if let Some(existing) = doc.get(hostname) {
                if existing.project_path != project {
                    if existing.project_path.exists() {
                        return Err(SpinError::RouteActivationFailed {
                            hostname: hostname.to_string(),
                            port,
                            reason: format!(
                                "already bound to {}; unbind it first",
                                existing.project_path.display()
                            ),
                        });
                    }
                    warn!(
                        hostname = %hostname,
                        previous = %existing.project_path.display(),
                        "taking over hostname of a removed project"
                    );
                }
            }

            if let Some(holder) = self.registry.allocation_for_port(port)? {
                if holder.is_live() && holder.project_path != project {
                    return Err(SpinError::PortBindConflict {
                        port,
                        detail: format!("reserved for {}", holder.key),
                    });
                }
            }

            if tls {
                self.ensure_certificate(hostname, port)?;
            }
            let moved_from = self.sync_allocation(hostname, port, project)?;

            let spec = RouteSpec {
                hostname: hostname.clone(),
                port,
                tls,
                project: project.to_path_buf(),
            };
            let route_path = self.paths.proxy_route_path(hostname.as_str());
            let activated = read_optional(&route_path).and_then(|previous| {
                write_route(&route_path, &spec.render(&self.upstream_host))?;
                self.reload_or_restore(hostname, port, &route_path, previous)
            });
            if let Err(e) = activated {
                if let Some(previous_port) = moved_from {
                    let key = AllocationKey::for_hostname(hostname);
                    if let Err(restore) = self.registry.record(&key, previous_port, project) {
                        warn!(hostname = %hostname, error = %restore, "could not restore allocation");
                    }
                }
                return Err(e);
            }

            doc.insert(
                hostname.clone(),
                BindingRecord {
                    port,
                    project_path: project.to_path_buf(),
                    tls,
                },
            );

            info!(hostname = %hostname, port, tls, "bound hostname");
            Ok(self.binding(hostname, &doc[hostname]))
        })
    }

    /// Remove the route for `hostname`. Unknown hostnames are a no-op.
    ///
    /// The hostname's port allocation is released unless another binding
    /// still routes to that port.
    #[instrument(level = "debug", skip(self), fields(hostname = %hostname))]
    pub fn unbind(&self, hostname: &Hostname) -> Result<Option<DomainBinding>, SpinError> {
        if !self.bindings.load()?.contains_key(hostname) {
            return Ok(None);
        }

        self.bindings.update(|doc| {
            let Some(record) = doc.get(hostname).cloned() else {
                return Ok(None);
            };

            let route_path = self.paths.proxy_route_path(hostname.as_str());
            let previous = read_optional(&route_path)?;
            if previous.is_some() {
                fs::remove_file(&route_path).map_err(|e| SpinError::io(&route_path, e))?;
            }
            self.reload_or_restore(hostname, record.port, &route_path, previous)?;

            let binding = self.binding(hostname, &record);
            doc.remove(hostname);

            if doc.values().any(|r| r.port == record.port) {
                debug!(port = record.port, "port still routed; keeping allocation");
            } else {
                self.registry
                    .release(&AllocationKey::for_hostname(hostname))?;
            }

            info!(hostname = %hostname, "unbound hostname");
            Ok(Some(binding))
        })
    }

    /// Unbind every hostname owned by `project`.
    pub fn unbind_project(&self, project: &Path) -> Result<Vec<DomainBinding>, SpinError> {
        let mut removed = Vec::new();
        for binding in self.bindings_for(project)? {
            if let Some(b) = self.unbind(&binding.hostname)? {
                removed.push(b);
            }
        }
        Ok(removed)
    }

    /// Port `hostname` routes to, if bound.
    pub fn route_for(&self, hostname: &Hostname) -> Result<Option<u16>, SpinError> {
        Ok(self.bindings.load()?.get(hostname).map(|r| r.port))
    }

    /// All bindings, ordered by hostname.
    pub fn list(&self) -> Result<Vec<DomainBinding>, SpinError> {
        Ok(self
            .bindings
            .load()?
            .iter()
            .map(|(host, record)| self.binding(host, record))
            .collect())
    }

    /// Bindings owned by `project`.
    pub fn bindings_for(&self, project: &Path) -> Result<Vec<DomainBinding>, SpinError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|b| b.project_path == project)
            .collect())
    }

    /// Differences between the route files and the bindings file, without
    /// changing anything.
    pub fn drift(&self) -> Result<ReconcileReport, SpinError> {
        let routes = read_routes(&self.paths.proxy_routes_dir())?;
        Ok(plan_reconcile(&self.bindings.load()?, &routes))
    }

    /// Re-derive the bindings file from the route files. Route files win.
    #[instrument(level = "debug", skip(self))]
    pub fn reconcile(&self) -> Result<ReconcileReport, SpinError> {
        self.bindings.update(|doc| {
            let routes = read_routes(&self.paths.proxy_routes_dir())?;
            let report = plan_reconcile(doc, &routes);

            doc.retain(|host, _| !report.removed.contains(host));
            for spec in &routes {
                doc.insert(
                    spec.hostname.clone(),
                    BindingRecord {
                        port: spec.port,
                        project_path: spec.project.clone(),
                        tls: spec.tls,
                    },
                );
            }

            for spec in routes
                .iter()
                .filter(|s| report.added.contains(&s.hostname) || report.updated.contains(&s.hostname))
            {
                if let Err(e) = self.sync_allocation(&spec.hostname, spec.port, &spec.project) {
                    warn!(hostname = %spec.hostname, error = %e, "could not sync allocation");
                }
            }

            if !report.is_clean() {
                info!(
                    added = report.added.len(),
                    updated = report.updated.len(),
                    removed = report.removed.len(),
                    "reconciled bindings from proxy config"
                );
            }
            Ok(report)
        })
    }

    fn binding(&self, hostname: &Hostname, record: &BindingRecord) -> DomainBinding {
        DomainBinding {
            hostname: hostname.clone(),
            port: record.port,
            tls_enabled: record.tls,
            certificate_ref: record
                .tls
                .then(|| self.paths.cert_path(hostname.as_str())),
            project_path: record.project_path.clone(),
        }
    }

    fn ensure_certificate(&self, hostname: &Hostname, port: u16) -> Result<(), SpinError> {
        let cert = self.paths.cert_path(hostname.as_str());
        let key = self.paths.cert_key_path(hostname.as_str());
        if cert.exists() && key.exists() {
            return Ok(());
        }
        self.issuer
            .issue(hostname, &cert, &key)
            .map_err(|e| SpinError::RouteActivationFailed {
                hostname: hostname.to_string(),
                port,
                reason: format!("certificate issuance failed: {}", e),
            })
    }

    /// Reload the proxy. On failure put `previous` back (or delete the new
    /// file), try to reload once more and report the original failure.
    fn reload_or_restore(
        &self,
        hostname: &Hostname,
        port: u16,
        route_path: &Path,
        previous: Option<Vec<u8>>,
    ) -> Result<(), SpinError> {
        let Err(reload_err) = self.proxy.reload() else {
            return Ok(());
        };

        warn!(hostname = %hostname, error = %reload_err, "proxy reload failed; restoring previous route");
        let restored = match previous {
            Some(content) => write_route(route_path, &content),
            None => match fs::remove_file(route_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(SpinError::io(route_path, e))
                }
                _ => Ok(()),
            },
        };
        if let Err(e) = restored {
            warn!(error = %e, "could not restore route file");
        }
        if let Err(e) = self.proxy.reload() {
            debug!(error = %e, "reload after restore also failed");
        }

        Err(SpinError::RouteActivationFailed {
            hostname: hostname.to_string(),
            port,
            reason: reload_err.to_string(),
        })
    }

    /// Keep the hostname's allocation, if one exists, on the bound port.
    /// Returns the port it moved from.
    fn sync_allocation(
        &self,
        hostname: &Hostname,
        port: u16,
        project: &Path,
    ) -> Result<Option<u16>, SpinError> {
        let key = AllocationKey::for_hostname(hostname);
        match self.registry.lookup(&key)? {
            Some(current) if current != port => {
                debug!(hostname = %hostname, from = current, to = port, "syncing allocation");
                self.registry.record(&key, port, project)?;
                Ok(Some(current))
            }
            _ => Ok(None),
        }
    }
}

fn plan_reconcile(doc: &BindingDoc, routes: &[RouteSpec]) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let routed: BTreeSet<&Hostname> = routes.iter().map(|s| &s.hostname).collect();

    for spec in routes {
        match doc.get(&spec.hostname) {
            None => report.added.push(spec.hostname.clone()),
            Some(r)
                if r.port != spec.port || r.tls != spec.tls || r.project_path != spec.project =>
            {
                report.updated.push(spec.hostname.clone())
            }
            Some(_) => {}
        }
    }
    report.removed = doc
        .keys()
        .filter(|host| !routed.contains(host))
        .cloned()
        .collect();
    report
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SpinError> {
    match fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SpinError::io(path, e)),
    }
}

fn write_route(path: &Path, content: impl AsRef<[u8]>) -> Result<(), SpinError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| SpinError::io(dir, e))?;
    }
    write_atomic(path, content.as_ref())
}
