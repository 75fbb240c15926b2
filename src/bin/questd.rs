//! Standalone host for the task engine.
//!
//! Loads the config (writing defaults on first run), opens the store, runs
//! periodic maintenance and drains queue callbacks until ctrl-c.
//!
//! Usage: `questd [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use questline::config::{EngineConfig, LoggingConfig};
use questline::engine::Engine;
use questline::scheduler::MaintenanceRunner;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// How often queued callbacks are drained.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "questd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn load_config(path: &PathBuf) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        return EngineConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()));
    }
    let config = EngineConfig::default();
    config
        .save_to_file(path)
        .with_context(|| format!("cannot write default config {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(EngineConfig::default_config_path);
    let config = load_config(&config_path)?;
    let _log_guard = init_logging(&config.logging);

    tracing::info!(config = %config_path.display(), "questd starting");

    let engine = Arc::new(
        Engine::open(config.clone())
            .await
            .map_err(|e| anyhow::anyhow!("cannot start engine: {e}"))?,
    );

    let cancel = CancellationToken::new();
    let runner = MaintenanceRunner::new(Arc::clone(&engine), &config.schedule)
        .spawn(cancel.child_token());

    let mut pump_tick = tokio::time::interval(PUMP_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "cannot listen for ctrl-c");
                }
                break;
            }
            _ = pump_tick.tick() => {
                if let Some(pump) = engine.callback_pump() {
                    pump.run_pending();
                }
            }
        }
    }

    tracing::info!("questd shutting down");
    cancel.cancel();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "maintenance runner panicked");
    }

    let closing = Arc::clone(&engine);
    let drained = tokio::task::spawn_blocking(move || closing.shutdown()).await?;
    if let Some(pump) = engine.callback_pump() {
        pump.run_pending();
    }

    tracing::info!(drained, "questd shut down cleanly");
    Ok(())
}
