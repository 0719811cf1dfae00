use std::path::Path;

use anyhow::{Context, Result};
use atlas_server::{AppState, AtlasConfig, Cli, load_env, serve};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    load_env(Path::new(".env"))?;
    setup_logging();

    let config = AtlasConfig::from_cli(Cli::parse())?;
    tracing::info!(
        bind = %config.bind,
        model = %config.orchestrator.model,
        upload_dir = %config.upload_dir.display(),
        "starting atlas"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async move {
        let state = AppState::from_config(&config)?;
        serve(config.bind, state, shutdown_signal()).await
    })
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
