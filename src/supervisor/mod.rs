//! Process supervision: an adapter over a terminal-multiplexer CLI that
//! materializes each service as a window within one shared session. Every
//! other component is written against the [`Supervisor`] trait so tests can
//! swap in [`fake::FakeSupervisor`] instead of shelling out for real.

pub mod tmux;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Service;
use crate::error::AppResult;
use crate::ports::apply_port_template;

pub const SESSION_NAME: &str = "devservers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Stopped,
    Running,
    Error,
}

pub trait Supervisor: Clone + Send + Sync + 'static {
    async fn ensure_session(&self) -> AppResult<()>;

    /// The set of window names; empty on any error.
    async fn list_windows(&self) -> Vec<String>;

    /// Returns `true` when a start was issued, `false` when the service was
    /// already running and nothing was done.
    async fn start(
        &self,
        service: &Service,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> AppResult<bool>;

    /// No-op when the window does not exist.
    async fn stop(&self, name: &str) -> AppResult<()>;

    async fn restart(
        &self,
        service: &Service,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> AppResult<bool> {
        self.stop(&service.name).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.start(service, resolved_port, service_ports).await
    }

    /// Empty string when the window does not exist.
    async fn capture_pane(&self, name: &str, lines: u32, ansi: bool) -> AppResult<String>;

    async fn get_status(&self, name: &str) -> AppResult<Status>;
}

/// The command actually typed into the pane: the service's command string
/// prefixed by `KEY='VALUE'` assignments built from its environment after
/// port-template expansion.
pub fn materialize_command(
    service: &Service,
    resolved_port: Option<u16>,
    service_ports: &HashMap<String, u16>,
) -> String {
    let assignments: Vec<String> = service
        .env
        .iter()
        .map(|(key, value)| {
            let expanded = apply_port_template(value, resolved_port, service_ports);
            format!("{key}='{}'", shell_escape_single_quoted(&expanded))
        })
        .collect();

    if assignments.is_empty() {
        service.command.clone()
    } else {
        format!("{} {}", assignments.join(" "), service.command)
    }
}

fn shell_escape_single_quoted(value: &str) -> String {
    value.replace('\'', r"'\''")
}
