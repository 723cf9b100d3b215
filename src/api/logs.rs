//! `/services/:name/logs` WebSocket: streams captured pane snapshots on a
//! fixed tick until the client disconnects or the service vanishes.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::orchestrator::Orchestrator;
use crate::supervisor::Supervisor;

use super::AppState;

const TICK: Duration = Duration::from_secs(1);
const DEFAULT_LINES: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    lines: Option<u32>,
    ansi: Option<u8>,
}

pub async fn stream<S: Supervisor>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let lines = query.lines.unwrap_or(DEFAULT_LINES);
    let ansi = query.ansi.unwrap_or(0) != 0;
    ws.on_upgrade(move |socket| tail(socket, state, name, lines, ansi))
}

async fn tail<S: Supervisor>(
    mut socket: WebSocket,
    state: AppState<S>,
    name: String,
    lines: u32,
    ansi: bool,
) {
    let mut interval = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let payload = match Orchestrator::capture_pane(&state.orchestrator, &name, lines, ansi).await {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(service = %name, error = %err, "capture_pane failed, closing log stream");
                        break;
                    }
                };
                let frame = serde_json::json!({ "type": "logs", "payload": payload });
                let Ok(text) = serde_json::to_string(&frame) else { break };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }
}
