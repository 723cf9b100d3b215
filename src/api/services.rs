//! `/services` and `/services/:name/...` routes.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::catalog::{Catalog, PortMode, Service, Source};
use crate::error::{AppError, AppResult};
use crate::graph::DependencyGraph;
use crate::orchestrator::Orchestrator;
use crate::ports;
use crate::supervisor::{Status, Supervisor};

use super::AppState;

pub fn routes<S: Supervisor>() -> Router<AppState<S>> {
    Router::new()
        .route("/services", get(list::<S>).post(upsert::<S>))
        .route(
            "/services/{name}",
            put(upsert_named::<S>).delete(remove::<S>),
        )
        .route("/services/{name}/config", get(config::<S>))
        .route("/services/{name}/start", post(start::<S>))
        .route("/services/{name}/stop", post(stop::<S>))
        .route("/services/{name}/restart", post(restart::<S>))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub cwd: PathBuf,
    pub command: String,
    pub env: IndexMap<String, String>,
    pub port: Option<u16>,
    pub port_mode: PortMode,
    pub depends_on: Vec<String>,
    pub last_started_at: Option<String>,
    pub source: Source,
    pub project_name: Option<String>,
    pub status: Status,
}

async fn effective_port<S: Supervisor>(
    state: &AppState<S>,
    service: &Service,
) -> AppResult<Option<u16>> {
    match service.port_mode {
        PortMode::Static | PortMode::Detect => Ok(service.port),
        PortMode::Registry => {
            let registry = ports::registry::read(&state.config.port_registry_path, false)?;
            Ok(registry.services.get(&service.name).copied())
        }
    }
}

async fn to_info<S: Supervisor>(state: &AppState<S>, service: &Service) -> AppResult<ServiceInfo> {
    let port = effective_port(state, service).await?;
    let status = Orchestrator::get_status(&state.orchestrator, &service.name).await?;
    Ok(ServiceInfo {
        name: service.name.clone(),
        cwd: service.cwd.clone(),
        command: service.command.clone(),
        env: service.env.clone(),
        port,
        port_mode: service.port_mode,
        depends_on: service.depends_on.clone(),
        last_started_at: service.last_started_at.clone(),
        source: service.source.clone(),
        project_name: service.compose.as_ref().map(|c| c.project_name.clone()),
        status,
    })
}

async fn list<S: Supervisor>(State(state): State<AppState<S>>) -> AppResult<Json<Value>> {
    let catalog = Orchestrator::snapshot_shared(&state.orchestrator).await?;
    let mut services = Vec::with_capacity(catalog.services.len());
    for service in &catalog.services {
        services.push(to_info(&state, service).await?);
    }
    Ok(Json(json!({ "services": services })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpsertBody {
    pub name: String,
    pub cwd: PathBuf,
    pub command: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub port_mode: PortMode,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl From<ServiceUpsertBody> for Service {
    fn from(body: ServiceUpsertBody) -> Self {
        Service {
            name: body.name,
            cwd: body.cwd,
            command: body.command,
            env: body.env,
            port: body.port,
            port_mode: body.port_mode,
            depends_on: body.depends_on,
            last_started_at: None,
            source: Source::Config,
            compose: None,
            raw: Value::Null,
        }
    }
}

/// Validates the candidate against the rest of the catalog (schema +
/// dependency graph) without persisting anything, so a bad upsert never
/// touches the catalog file.
fn validate_against(catalog: &Catalog, candidate: &Service) -> AppResult<()> {
    candidate.validate()?;
    let projected = catalog.clone().upsert_service(candidate.clone());
    projected.validate()?;
    DependencyGraph::build(&projected)?;
    Ok(())
}

async fn do_upsert<S: Supervisor>(
    state: &AppState<S>,
    service: Service,
) -> AppResult<Json<Value>> {
    let catalog = Orchestrator::snapshot_shared(&state.orchestrator).await?;
    validate_against(&catalog, &service)?;
    Orchestrator::upsert_service(&state.orchestrator, service).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn upsert<S: Supervisor>(
    State(state): State<AppState<S>>,
    Json(body): Json<ServiceUpsertBody>,
) -> AppResult<Json<Value>> {
    do_upsert(&state, body.into()).await
}

async fn upsert_named<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
    Json(body): Json<ServiceUpsertBody>,
) -> AppResult<Json<Value>> {
    if body.name != name {
        return Err(AppError::validation(format!(
            "body name '{}' does not match path name '{name}'",
            body.name
        )));
    }
    do_upsert(&state, body.into()).await
}

async fn remove<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    Orchestrator::remove_service(&state.orchestrator, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceConfigResponse {
    source: Source,
    service_name: String,
    project_name: Option<String>,
    path: PathBuf,
    definition: Value,
}

async fn config<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<ServiceConfigResponse>> {
    let catalog = Orchestrator::snapshot_shared(&state.orchestrator).await?;
    let service = catalog
        .find(&name)
        .ok_or_else(|| AppError::not_found(format!("no such service: '{name}'")))?;

    let path = match &service.compose {
        Some(origin) => origin.compose_path.clone(),
        None => state.config.catalog_path.clone(),
    };

    Ok(Json(ServiceConfigResponse {
        source: service.source.clone(),
        service_name: service.name.clone(),
        project_name: service.compose.as_ref().map(|c| c.project_name.clone()),
        path,
        definition: service.raw.clone(),
    }))
}

async fn start<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    Orchestrator::start(&state.orchestrator, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn stop<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    Orchestrator::stop(&state.orchestrator, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn restart<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    Orchestrator::restart(&state.orchestrator, &name).await?;
    Ok(Json(json!({ "ok": true })))
}
