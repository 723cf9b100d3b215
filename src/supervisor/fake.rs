//! In-memory [`Supervisor`] double. Exposed behind the `test-util` feature
//! so the orchestrator and API layers can be exercised without a real tmux
//! binary on `PATH`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::catalog::Service;
use crate::error::AppResult;

use super::{Status, Supervisor, materialize_command};

#[derive(Debug, Clone)]
struct Window {
    running: bool,
    dead: bool,
    command: String,
    pane: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeSupervisor {
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line to a window's pane, as if the process had printed it.
    /// Used to drive log-detection tests without a real terminal.
    pub fn push_log_line(&self, name: &str, line: impl Into<String>) {
        let mut windows = self.windows.lock().unwrap();
        if let Some(window) = windows.get_mut(name) {
            window.pane.push(line.into());
        }
    }

    /// Marks a window's pane dead, as if the underlying process crashed.
    pub fn mark_dead(&self, name: &str) {
        let mut windows = self.windows.lock().unwrap();
        if let Some(window) = windows.get_mut(name) {
            window.dead = true;
        }
    }
}

impl Supervisor for FakeSupervisor {
    async fn ensure_session(&self) -> AppResult<()> {
        Ok(())
    }

    async fn list_windows(&self) -> Vec<String> {
        self.windows.lock().unwrap().keys().cloned().collect()
    }

    async fn start(
        &self,
        service: &Service,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> AppResult<bool> {
        let mut windows = self.windows.lock().unwrap();
        if let Some(existing) = windows.get(&service.name) {
            if existing.running && !existing.dead {
                return Ok(false);
            }
        }
        let command = materialize_command(service, resolved_port, service_ports);
        windows.insert(
            service.name.clone(),
            Window {
                running: true,
                dead: false,
                command: command.clone(),
                pane: vec![command],
            },
        );
        Ok(true)
    }

    async fn stop(&self, name: &str) -> AppResult<()> {
        let mut windows = self.windows.lock().unwrap();
        if let Some(window) = windows.get_mut(name) {
            window.running = false;
        }
        Ok(())
    }

    async fn capture_pane(&self, name: &str, lines: u32, _ansi: bool) -> AppResult<String> {
        let windows = self.windows.lock().unwrap();
        match windows.get(name) {
            Some(window) => {
                let take = lines as usize;
                let start = window.pane.len().saturating_sub(take);
                Ok(window.pane[start..].join("\n"))
            }
            None => Ok(String::new()),
        }
    }

    async fn get_status(&self, name: &str) -> AppResult<Status> {
        let windows = self.windows.lock().unwrap();
        match windows.get(name) {
            None => Ok(Status::Stopped),
            Some(w) if w.dead => Ok(Status::Error),
            Some(w) if !w.running => Ok(Status::Stopped),
            Some(_) => Ok(Status::Running),
        }
    }
}
