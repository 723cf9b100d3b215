//! HTTP + WebSocket surface: maps routes onto [`crate::orchestrator::Orchestrator`]
//! calls. Stateless per request — every handler re-reads the catalog through
//! `Orchestrator::snapshot_shared`, which itself re-reads the store and
//! resyncs the compose cache on every call. The server binds loopback only;
//! cross-origin is permitted from loopback origins for the companion UI.

mod logs;
mod projects;
mod services;

use std::net::SocketAddr;

use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::DaemonConfig;
use crate::orchestrator::{Orchestrator, Shared};
use crate::supervisor::Supervisor;
use crate::supervisor::tmux::TmuxSupervisor;

#[derive(Clone)]
pub struct AppState<S: Supervisor> {
    pub orchestrator: Shared<S>,
    pub config: DaemonConfig,
}

/// Builds the real tmux-backed orchestrator and serves until shutdown.
pub async fn serve(config: DaemonConfig) -> eyre::Result<()> {
    let orchestrator = Orchestrator::new(TmuxSupervisor::new(), &config).into_shared();
    serve_with(orchestrator, config).await
}

/// Serves an already-constructed orchestrator handle. Exists as a seam so
/// integration tests (and anything embedding the crate) can drive the full
/// HTTP surface against a [`crate::supervisor::fake::FakeSupervisor`]
/// without a real tmux binary on `PATH`.
pub async fn serve_with<S: Supervisor>(
    orchestrator: Shared<S>,
    config: DaemonConfig,
) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.bind_port));
    let app = router(AppState {
        orchestrator: orchestrator.clone(),
        config,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    Ok(())
}

fn router<S: Supervisor>(state: AppState<S>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .merge(services::routes())
        .merge(projects::routes())
        .route("/services/{name}/logs", get(logs::stream::<S>));

    if let Some(ui_dir) = state.config.ui_dir.clone() {
        router = router
            .route("/", get(|| async { Redirect::permanent("/ui/") }))
            .nest_service("/ui", ServeDir::new(ui_dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(loopback_cors())
        .with_state(state)
}

/// Permits any `http(s)://localhost` or `http(s)://127.0.0.1` origin,
/// regardless of port, and nothing else.
fn loopback_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _parts| {
            origin
                .to_str()
                .map(|s| s.contains("://localhost") || s.contains("://127.0.0.1"))
                .unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

/// Waits for Ctrl-C or SIGTERM, then aborts every in-flight log-detection
/// task before the server finishes draining its in-flight requests.
async fn shutdown_signal<S: Supervisor>(orchestrator: Shared<S>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    orchestrator.lock().await.abort_detections();
}
