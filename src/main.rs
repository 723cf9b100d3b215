#![forbid(unsafe_code)]

use clap::Parser;
use color_eyre::config::HookBuilder;

use devserversd::api;
use devserversd::config::{Cli, DaemonConfig};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    HookBuilder::default()
        .display_env_section(false)
        .install()?;

    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli)?;

    devserversd::subscriber::init_subscriber(&config.log_filter);

    api::serve(config).await
}
