//! `/projects` routes. `catalog::Project`'s fields are already camelCase-
//! compatible as-is, so it doubles as both the request and response body.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::catalog::Project;
use crate::error::AppResult;
use crate::orchestrator::Orchestrator;
use crate::supervisor::Supervisor;

use super::AppState;

pub fn routes<S: Supervisor>() -> Router<AppState<S>> {
    Router::new()
        .route("/projects", get(list::<S>).post(upsert::<S>))
        .route("/projects/{name}", axum::routing::delete(remove::<S>))
}

async fn list<S: Supervisor>(State(state): State<AppState<S>>) -> AppResult<Json<Value>> {
    let catalog = Orchestrator::snapshot_shared(&state.orchestrator).await?;
    Ok(Json(json!({ "projects": catalog.registered_projects })))
}

async fn upsert<S: Supervisor>(
    State(state): State<AppState<S>>,
    Json(project): Json<Project>,
) -> AppResult<Json<Value>> {
    project.validate()?;
    Orchestrator::upsert_project(&state.orchestrator, project).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn remove<S: Supervisor>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    Orchestrator::remove_project(&state.orchestrator, &name).await?;
    Ok(Json(json!({ "ok": true })))
}
