//! The heart of the daemon: per-request catalog snapshotting, dependency
//! traversal, port resolution, and the supervisor calls that actually start,
//! stop, and restart services.
//!
//! All catalog- and registry-mutating operations are associated functions
//! taking a [`Shared`] handle, so every step that touches the catalog file,
//! the port registry, or the supervisor runs under the same
//! `tokio::sync::Mutex` — one logical actor reached through one shared
//! `Arc`, reproducing a single-threaded event loop's serialization of
//! mutations on top of a multi-threaded Tokio runtime.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::catalog::compose::ComposeLoader;
use crate::catalog::{self, Catalog, PortMode, Project, Service};
use crate::config::DaemonConfig;
use crate::detector;
use crate::error::{AppError, AppResult};
use crate::graph::DependencyGraph;
use crate::ports::{self, EnsureOptions};
use crate::supervisor::{Status, Supervisor};

pub struct Orchestrator<S: Supervisor> {
    pub supervisor: S,
    catalog_path: PathBuf,
    port_registry_path: PathBuf,
    compose_loader: ComposeLoader,
    /// Detected ports for compose-sourced services only; config-sourced
    /// detections are persisted straight into the catalog file.
    detected_ports: HashMap<String, u16>,
    /// `lastStartedAt` for compose-sourced services. Never persisted —
    /// compose files are never written to, so this is runtime-only state,
    /// same as `detected_ports`.
    compose_last_started: HashMap<String, String>,
    detections: JoinSet<()>,
}

pub type Shared<S> = Arc<Mutex<Orchestrator<S>>>;

impl<S: Supervisor> Orchestrator<S> {
    pub fn new(supervisor: S, config: &DaemonConfig) -> Self {
        Self {
            supervisor,
            catalog_path: config.catalog_path.clone(),
            port_registry_path: config.port_registry_path.clone(),
            compose_loader: ComposeLoader::new(),
            detected_ports: HashMap::new(),
            compose_last_started: HashMap::new(),
            detections: JoinSet::new(),
        }
    }

    pub fn into_shared(self) -> Shared<S> {
        Arc::new(Mutex::new(self))
    }

    /// Aborts every in-flight log-detection task. Detection tasks are never
    /// cancelled individually by service name; a fresh start just spawns a
    /// fresh one.
    pub fn abort_detections(&mut self) {
        self.detections.abort_all();
    }

    /// Re-reads the catalog store, reconciles the compose loader against
    /// the stored projects, merges, and overlays any runtime-detected ports
    /// onto compose-sourced services. Prunes both runtime maps against the
    /// merged catalog so a service that's since been removed (or a compose
    /// file that dropped it) doesn't leak its detected port or timestamp
    /// onto a later, unrelated service of the same name.
    fn snapshot(&mut self) -> AppResult<Catalog> {
        let stored = catalog::store::read(&self.catalog_path)?;
        self.compose_loader.sync(&stored.registered_projects);
        let mut merged = catalog::builder::build_snapshot(stored, self.compose_loader.services())?;
        for service in &mut merged.services {
            if service.is_compose_managed() {
                if let Some(&port) = self.detected_ports.get(&service.name) {
                    service.port = Some(port);
                }
                if let Some(ts) = self.compose_last_started.get(&service.name) {
                    service.last_started_at = Some(ts.clone());
                }
            }
        }

        let live: HashSet<&str> = merged.services.iter().map(|s| s.name.as_str()).collect();
        self.detected_ports.retain(|name, _| live.contains(name.as_str()));
        self.compose_last_started.retain(|name, _| live.contains(name.as_str()));

        Ok(merged)
    }

    pub async fn snapshot_shared(handle: &Shared<S>) -> AppResult<Catalog> {
        handle.lock().await.snapshot()
    }

    pub async fn get_status(handle: &Shared<S>, name: &str) -> AppResult<Status> {
        let orch = handle.lock().await;
        orch.supervisor.get_status(name).await
    }

    pub async fn capture_pane(
        handle: &Shared<S>,
        name: &str,
        lines: u32,
        ansi: bool,
    ) -> AppResult<String> {
        let orch = handle.lock().await;
        orch.supervisor.capture_pane(name, lines, ansi).await
    }

    // --- catalog CRUD, serialized through the same lock as start/stop ---

    pub async fn upsert_service(handle: &Shared<S>, service: Service) -> AppResult<Catalog> {
        let mut orch = handle.lock().await;
        let stored = catalog::store::read(&orch.catalog_path)?;
        if let Some(existing) = stored.find(&service.name) {
            if existing.is_compose_managed() {
                return Err(AppError::ConflictWithComposeSource(service.name));
            }
        }
        let next = stored.upsert_service(service);
        catalog::store::write(&orch.catalog_path, &next)?;
        orch.snapshot()
    }

    pub async fn remove_service(handle: &Shared<S>, name: &str) -> AppResult<Catalog> {
        let mut orch = handle.lock().await;
        let stored = catalog::store::read(&orch.catalog_path)?;
        match stored.find(name) {
            None => return Err(AppError::not_found(format!("no such service: '{name}'"))),
            Some(s) if s.is_compose_managed() => {
                return Err(AppError::ConflictWithComposeSource(name.to_string()));
            }
            _ => {}
        }
        let next = stored.remove_service(name);
        catalog::store::write(&orch.catalog_path, &next)?;
        orch.snapshot()
    }

    pub async fn upsert_project(handle: &Shared<S>, project: Project) -> AppResult<Catalog> {
        let mut orch = handle.lock().await;
        let stored = catalog::store::read(&orch.catalog_path)?;
        let next = stored.upsert_project(project);
        catalog::store::write(&orch.catalog_path, &next)?;
        orch.snapshot()
    }

    pub async fn remove_project(handle: &Shared<S>, name: &str) -> AppResult<Catalog> {
        let mut orch = handle.lock().await;
        let stored = catalog::store::read(&orch.catalog_path)?;
        if stored.find_project(name).is_none() {
            return Err(AppError::not_found(format!("no such project: '{name}'")));
        }
        let next = stored.remove_project(name);
        catalog::store::write(&orch.catalog_path, &next)?;
        orch.snapshot()
    }

    // --- start / stop / restart ---

    pub async fn start(handle: &Shared<S>, name: &str) -> AppResult<Catalog> {
        let order = {
            let mut orch = handle.lock().await;
            let catalog = orch.snapshot()?;
            catalog
                .find(name)
                .ok_or_else(|| AppError::not_found(format!("no such service: '{name}'")))?;
            let graph = DependencyGraph::build(&catalog)?;
            graph.topo_sort(&graph.collect_dependencies(name))
        };

        for target in &order {
            Self::start_or_restart_one(handle, target, false).await?;
        }

        Self::snapshot_shared(handle).await
    }

    pub async fn stop(handle: &Shared<S>, name: &str) -> AppResult<()> {
        let order = {
            let mut orch = handle.lock().await;
            let catalog = orch.snapshot()?;
            catalog
                .find(name)
                .ok_or_else(|| AppError::not_found(format!("no such service: '{name}'")))?;
            let graph = DependencyGraph::build(&catalog)?;
            let mut order = graph.topo_sort(&graph.collect_dependents(name));
            order.reverse();
            order
        };

        for target in &order {
            let orch = handle.lock().await;
            if let Err(err) = orch.supervisor.stop(target).await {
                tracing::warn!(service = %target, error = %err, "stop failed, continuing with remaining targets");
            }
        }
        Ok(())
    }

    /// Starts every strict dependency of `name` (not `name` itself) in
    /// deps-first order, then restarts `name`. Dependents are left alone.
    pub async fn restart(handle: &Shared<S>, name: &str) -> AppResult<Catalog> {
        let deps = {
            let mut orch = handle.lock().await;
            let catalog = orch.snapshot()?;
            catalog
                .find(name)
                .ok_or_else(|| AppError::not_found(format!("no such service: '{name}'")))?;
            let graph = DependencyGraph::build(&catalog)?;
            let mut deps = graph.collect_dependencies(name);
            deps.retain(|n| n != name);
            graph.topo_sort(&deps)
        };

        for dep in &deps {
            Self::start_or_restart_one(handle, dep, false).await?;
        }
        Self::start_or_restart_one(handle, name, true).await?;

        Self::snapshot_shared(handle).await
    }

    /// Resolves the port, dispatches the supervisor call, and records the
    /// result — all under one lock acquisition, so a registry allocation
    /// and its supervisor start can never interleave with another
    /// service's. The lock is released between successive targets of a
    /// traversal (see [`Self::start`]/[`Self::stop`]/[`Self::restart`]):
    /// there is no cross-request ordering guarantee beyond that.
    async fn start_or_restart_one(
        handle: &Shared<S>,
        name: &str,
        force_restart: bool,
    ) -> AppResult<bool> {
        let mut orch = handle.lock().await;
        let catalog = orch.snapshot()?;
        let service = catalog
            .find(name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("no such service: '{name}'")))?;

        let other_ports: HashMap<String, u16> = catalog
            .services
            .iter()
            .filter(|s| s.name != service.name)
            .filter_map(|s| s.port.map(|p| (s.name.clone(), p)))
            .collect();

        let resolved_port = match service.port_mode {
            PortMode::Static | PortMode::Detect => service.port,
            PortMode::Registry => {
                let reserved = other_ports.values().copied().collect();
                let opts = EnsureOptions {
                    preferred_port: service.port,
                    base_port: None,
                    reserved,
                };
                Some(ports::ensure_registry_port(
                    &orch.port_registry_path,
                    &service.name,
                    &opts,
                )?)
            }
        };

        let issued = if force_restart {
            orch.supervisor
                .restart(&service, resolved_port, &other_ports)
                .await?
        } else {
            orch.supervisor
                .start(&service, resolved_port, &other_ports)
                .await?
        };

        if issued {
            orch.record_start(handle, &service)?;
        }

        Ok(issued)
    }

    /// Records `lastStartedAt` and, for `detect` mode, schedules a
    /// background detection task. Registry- and static-mode ports are not
    /// touched here: the registry file and the declared `port` already hold
    /// the service's effective port. Called with the orchestrator lock
    /// already held.
    fn record_start(&mut self, handle: &Shared<S>, service: &Service) -> AppResult<()> {
        let now = jiff::Timestamp::now().to_string();

        if service.is_compose_managed() {
            self.compose_last_started.insert(service.name.clone(), now);
        } else {
            let stored = catalog::store::read(&self.catalog_path)?;
            if let Some(mut updated) = stored.find(&service.name).cloned() {
                updated.last_started_at = Some(now);
                let next = stored.upsert_service(updated);
                catalog::store::write(&self.catalog_path, &next)?;
            }
        }

        if service.port_mode == PortMode::Detect {
            let supervisor = self.supervisor.clone();
            let handle = handle.clone();
            let name = service.name.clone();
            self.detections.spawn(async move {
                if let Some(port) = detector::detect_port(&supervisor, &name).await {
                    Self::record_detected_port(&handle, &name, port).await;
                }
            });
        }

        Ok(())
    }

    async fn record_detected_port(handle: &Shared<S>, name: &str, port: u16) {
        let mut orch = handle.lock().await;
        let is_compose = orch.snapshot().ok().and_then(|c| {
            c.find(name).map(|s| s.is_compose_managed())
        });

        match is_compose {
            Some(false) => {
                let Ok(stored) = catalog::store::read(&orch.catalog_path) else {
                    return;
                };
                if let Some(mut service) = stored.find(name).cloned() {
                    service.port = Some(port);
                    let next = stored.upsert_service(service);
                    if let Err(err) = catalog::store::write(&orch.catalog_path, &next) {
                        tracing::error!(%name, error = %err, "failed to persist detected port");
                    }
                }
            }
            _ => {
                orch.detected_ports.insert(name.to_string(), port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use indexmap::IndexMap;

    use super::*;
    use crate::catalog::Source;
    use crate::supervisor::fake::FakeSupervisor;

    fn svc(name: &str, depends_on: &[&str]) -> Service {
        Service {
            name: name.into(),
            cwd: PathBuf::from("/tmp"),
            command: "echo hi".into(),
            env: IndexMap::new(),
            port: None,
            port_mode: PortMode::Static,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            last_started_at: None,
            source: Source::Config,
            compose: None,
            raw: serde_json::Value::Null,
        }
    }

    async fn orchestrator_with(services: Vec<Service>) -> (Shared<FakeSupervisor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("devservers.json");
        let mut catalog = Catalog::default();
        for s in services {
            catalog = catalog.upsert_service(s);
        }
        catalog::store::write(&catalog_path, &catalog).unwrap();

        let config = DaemonConfig {
            catalog_path,
            port_registry_path: dir.path().join("port-registry.json"),
            bind_port: 4141,
            ui_dir: None,
            log_filter: "info".into(),
        };
        let orch = Orchestrator::new(FakeSupervisor::new(), &config).into_shared();
        (orch, dir)
    }

    #[tokio::test]
    async fn start_traverses_dependencies_first() {
        let (handle, _dir) = orchestrator_with(vec![
            svc("db", &[]),
            svc("api", &["db"]),
            svc("web", &["api"]),
        ])
        .await;

        Orchestrator::start(&handle, "web").await.unwrap();

        let orch = handle.lock().await;
        assert_eq!(orch.supervisor.get_status("db").await.unwrap(), Status::Running);
        assert_eq!(orch.supervisor.get_status("api").await.unwrap(), Status::Running);
        assert_eq!(orch.supervisor.get_status("web").await.unwrap(), Status::Running);
    }

    #[tokio::test]
    async fn stop_stops_dependents_before_the_target() {
        let (handle, _dir) = orchestrator_with(vec![
            svc("db", &[]),
            svc("api", &["db"]),
            svc("web", &["api"]),
        ])
        .await;

        Orchestrator::start(&handle, "web").await.unwrap();
        Orchestrator::stop(&handle, "db").await.unwrap();

        let orch = handle.lock().await;
        assert_eq!(orch.supervisor.get_status("web").await.unwrap(), Status::Stopped);
        assert_eq!(orch.supervisor.get_status("api").await.unwrap(), Status::Stopped);
        assert_eq!(orch.supervisor.get_status("db").await.unwrap(), Status::Stopped);
    }

    #[tokio::test]
    async fn restart_leaves_dependents_untouched() {
        let (handle, _dir) = orchestrator_with(vec![
            svc("db", &[]),
            svc("api", &["db"]),
            svc("web", &["api"]),
        ])
        .await;

        Orchestrator::start(&handle, "web").await.unwrap();
        Orchestrator::restart(&handle, "api").await.unwrap();

        let orch = handle.lock().await;
        assert_eq!(orch.supervisor.get_status("db").await.unwrap(), Status::Running);
        assert_eq!(orch.supervisor.get_status("api").await.unwrap(), Status::Running);
        assert_eq!(orch.supervisor.get_status("web").await.unwrap(), Status::Running);
    }

    #[tokio::test]
    async fn start_records_last_started_at() {
        let (handle, _dir) = orchestrator_with(vec![svc("web", &[])]).await;
        let catalog = Orchestrator::start(&handle, "web").await.unwrap();
        assert!(catalog.find("web").unwrap().last_started_at.is_some());
    }

    #[tokio::test]
    async fn starting_unknown_service_is_not_found() {
        let (handle, _dir) = orchestrator_with(vec![svc("web", &[])]).await;
        let err = Orchestrator::start(&handle, "ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_prunes_runtime_maps_for_names_no_longer_in_the_catalog() {
        let (handle, _dir) = orchestrator_with(vec![svc("web", &[])]).await;
        {
            let mut orch = handle.lock().await;
            orch.detected_ports.insert("ghost".to_string(), 4000);
            orch.compose_last_started
                .insert("ghost".to_string(), "2024-01-01T00:00:00Z".to_string());
        }

        Orchestrator::snapshot_shared(&handle).await.unwrap();

        let orch = handle.lock().await;
        assert!(!orch.detected_ports.contains_key("ghost"));
        assert!(!orch.compose_last_started.contains_key("ghost"));
    }
}
