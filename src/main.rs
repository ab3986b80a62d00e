//! zapbot CLI entry point.

use anyhow::Context as _;
use clap::Parser;

#[derive(Parser)]
#[command(name = "zapbot")]
#[command(about = "WhatsApp relay that answers customers through a hosted assistant")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        zapbot::config::Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        zapbot::config::Config::load().context("failed to load configuration")?
    };

    let _log_guard = zapbot::daemon::init_tracing(&config.log_dir(), cli.debug)?;
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    zapbot::daemon::run(config).await
}
