//! Clarion daemon and command line.

mod app;
mod cli;

use clap::Parser;
use clarion_core::AppConfig;
use cli::{Cli, Command};

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,clarion=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_with_env_from(path)?,
        None => AppConfig::load_with_env()?,
    };

    tracing::info!("Starting Clarion v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => app::serve(config).await,
        Command::Crawl(args) => app::crawl_once(config, args).await,
        Command::Status { job_id } => app::show_status(config, job_id).await,
    }
}
