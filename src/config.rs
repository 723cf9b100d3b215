//! The daemon's own bootstrap configuration: bind port, catalog/registry file
//! paths, log verbosity. Distinct from the [`crate::catalog`] it serves,
//! which is re-read from disk on every request.

use std::path::{Path, PathBuf};

use clap::Parser;
use directories::BaseDirs;
use eyre::eyre;

const APP_NAME_TITLECASE: &str = "Devservers Manager";
const APP_NAME_LOWER: &str = "devservers";
const DEFAULT_BIND_PORT: u16 = 4141;
const DEFAULT_LOG_FILTER: &str = "devserversd=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(version, about = "Local developer-server orchestrator daemon")]
pub struct Cli {
    /// Path to the primary JSON configuration (catalog) file.
    #[arg(long, env = "DEVSERVERS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the port-registry JSON file. Defaults alongside the config file.
    #[arg(long, env = "DEVSERVERS_PORT_REGISTRY")]
    pub port_registry: Option<PathBuf>,

    /// Loopback port the HTTP+WebSocket API binds to.
    #[arg(long, env = "DEVSERVERS_BIND_PORT")]
    pub bind_port: Option<u16>,

    /// Directory of a pre-built UI bundle to serve under `/ui/`.
    #[arg(long)]
    pub ui_dir: Option<PathBuf>,

    /// Tracing filter directive, used when `RUST_LOG` is unset.
    #[arg(long, env = "DEVSERVERS_LOG")]
    pub log: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub catalog_path: PathBuf,
    pub port_registry_path: PathBuf,
    pub bind_port: u16,
    pub ui_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl DaemonConfig {
    /// Resolve the daemon's own configuration: CLI flag, then environment
    /// variable (handled by clap's `env` attribute above), then OS default.
    pub fn load(cli: &Cli) -> eyre::Result<Self> {
        let catalog_path = match &cli.config {
            Some(p) => p.clone(),
            None => default_catalog_path()?,
        };

        let port_registry_path = match &cli.port_registry {
            Some(p) => p.clone(),
            None => default_port_registry_path(&catalog_path),
        };

        let bind_port = cli.bind_port.unwrap_or(DEFAULT_BIND_PORT);
        let log_filter = cli
            .log
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            catalog_path,
            port_registry_path,
            bind_port,
            ui_dir: cli.ui_dir.clone(),
            log_filter,
        })
    }
}

/// `~/Library/Application Support/Devservers Manager/devservers.json` on
/// Darwin, `%APPDATA%/Devservers Manager/devservers.json` on Windows,
/// `$XDG_CONFIG_HOME/devservers/devservers.json` (or
/// `~/.config/devservers/devservers.json`) everywhere else.
fn default_catalog_path() -> eyre::Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| eyre!("could not determine home directory"))?;
    let app_dir = if cfg!(any(target_os = "macos", target_os = "windows")) {
        APP_NAME_TITLECASE
    } else {
        APP_NAME_LOWER
    };
    Ok(base.config_dir().join(app_dir).join("devservers.json"))
}

fn default_port_registry_path(catalog_path: &Path) -> PathBuf {
    catalog_path
        .parent()
        .map(|dir| dir.join("port-registry.json"))
        .unwrap_or_else(|| PathBuf::from("port-registry.json"))
}
