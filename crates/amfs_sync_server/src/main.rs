//! Standalone sync server binary: loads engine configuration, opens an
//! [`Engine`] against its data directory, and serves the peer sync
//! protocol (§4.7) until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;

use amfs_core::Engine;
use amfs_sync_server::config::Config;

#[derive(Parser)]
#[command(name = "amfs-sync-server", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults applied if absent, §6.5).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading config: {err}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    let engine = match Engine::open(&config) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            log::error!("failed to open engine: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = amfs_sync_server::serve(engine, config, shutdown_signal()).await {
        log::error!("sync server exited with an error: {err}");
        return ExitCode::FAILURE;
    }

    log::info!("sync server shut down gracefully");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("shutdown signal received");
}
