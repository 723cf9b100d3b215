//! The real [`Supervisor`] adapter: shells out to a tmux-compatible binary.
//! Carries no in-memory state about services — the multiplexer session
//! itself is the state.

use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;

use crate::catalog::Service;
use crate::error::{AppError, AppResult};

use super::{SESSION_NAME, Status, Supervisor, materialize_command};

#[derive(Debug, Clone)]
pub struct TmuxSupervisor {
    bin: String,
}

impl TmuxSupervisor {
    pub fn new() -> Self {
        Self { bin: "tmux".to_string() }
    }

    /// Points at an alternative tmux-compatible binary, for environments
    /// where it isn't installed as plain `tmux` on `PATH`.
    pub fn with_binary(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn window_target(&self, name: &str) -> String {
        format!("{SESSION_NAME}:{name}")
    }

    async fn run(&self, args: &[&str]) -> AppResult<Output> {
        tokio::process::Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|err| AppError::Supervisor(format!("failed to run {}: {err}", self.bin)))
    }
}

impl Default for TmuxSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_shell(command: &str) -> bool {
    matches!(command, "bash" | "sh" | "zsh" | "fish" | "dash" | "")
}

impl Supervisor for TmuxSupervisor {
    async fn ensure_session(&self) -> AppResult<()> {
        let has = self.run(&["has-session", "-t", SESSION_NAME]).await?;
        if has.status.success() {
            return Ok(());
        }
        let created = self.run(&["new-session", "-d", "-s", SESSION_NAME]).await?;
        if !created.status.success() {
            return Err(AppError::Supervisor(format!(
                "failed to create tmux session '{SESSION_NAME}': {}",
                String::from_utf8_lossy(&created.stderr)
            )));
        }
        Ok(())
    }

    async fn list_windows(&self) -> Vec<String> {
        match self
            .run(&["list-windows", "-t", SESSION_NAME, "-F", "#{window_name}"])
            .await
        {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::to_string)
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn start(
        &self,
        service: &Service,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> AppResult<bool> {
        self.ensure_session().await?;

        if self.get_status(&service.name).await? == Status::Running {
            return Ok(false);
        }

        let target = self.window_target(&service.name);
        // Tolerate "no such window" from a previous stopped/dead window.
        let _ = self.run(&["kill-window", "-t", &target]).await;

        let cwd = service.cwd.display().to_string();
        let create = self
            .run(&[
                "new-window", "-d", "-t", SESSION_NAME, "-n", &service.name, "-c", &cwd,
            ])
            .await?;
        if !create.status.success() {
            return Err(AppError::Supervisor(format!(
                "failed to create window for '{}': {}",
                service.name,
                String::from_utf8_lossy(&create.stderr)
            )));
        }

        let command = materialize_command(service, resolved_port, service_ports);
        self.run(&["send-keys", "-t", &target, &command, "Enter"])
            .await?;
        Ok(true)
    }

    async fn stop(&self, name: &str) -> AppResult<()> {
        if !self.list_windows().await.iter().any(|w| w == name) {
            return Ok(());
        }
        let target = self.window_target(name);
        let _ = self.run(&["send-keys", "-t", &target, "C-c"]).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = self.run(&["kill-window", "-t", &target]).await;
        Ok(())
    }

    async fn capture_pane(&self, name: &str, lines: u32, ansi: bool) -> AppResult<String> {
        if !self.list_windows().await.iter().any(|w| w == name) {
            return Ok(String::new());
        }
        let target = self.window_target(name);
        let start = format!("-{lines}");
        let mut args = vec!["capture-pane", "-p", "-t", target.as_str(), "-S", start.as_str()];
        if ansi {
            args.push("-e");
        }
        let out = self.run(&args).await?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn get_status(&self, name: &str) -> AppResult<Status> {
        if !self.list_windows().await.iter().any(|w| w == name) {
            return Ok(Status::Stopped);
        }
        let target = self.window_target(name);

        let dead = self
            .run(&["display-message", "-p", "-t", &target, "-F", "#{pane_dead}"])
            .await
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "1")
            .unwrap_or(false);
        if dead {
            return Ok(Status::Error);
        }

        let command = self
            .run(&[
                "display-message", "-p", "-t", &target, "-F", "#{pane_current_command}",
            ])
            .await
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap_or_default();

        if is_shell(&command) {
            Ok(Status::Stopped)
        } else {
            Ok(Status::Running)
        }
    }
}
