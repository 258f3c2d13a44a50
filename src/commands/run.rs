//! Run command
//!
//! Keeps the process alive so that retention is applied on the schedule in
//! `[rotation]`, until SIGTERM or SIGINT.

use anyhow::Result;
use colored::Colorize;
use fanlog::config::Settings;
use fanlog::rotation_job::start_scheduled_rotation;
use tracing::info;

/// Execute the run command
pub async fn execute(settings: &Settings) -> Result<()> {
    let registry = super::open_registry(settings).await?;
    let rotation = start_scheduled_rotation(&settings.rotation, registry.clone());

    match &rotation {
        Some(_) => println!(
            "{} rotating every {}s; press Ctrl-C to stop",
            "✓ fanlog running,".green(),
            settings.rotation.interval_seconds
        ),
        None => println!(
            "{} scheduled rotation is disabled in [rotation]",
            "⚠ fanlog running,".yellow()
        ),
    }
    info!(loggers = registry.snapshot().len(), "fanlog running");

    wait_for_shutdown().await?;

    if let Some(handle) = rotation {
        handle.abort();
    }
    info!("fanlog stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}
