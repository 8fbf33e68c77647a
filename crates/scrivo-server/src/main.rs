#![forbid(unsafe_code)]

//! Scrivo service entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scrivo_server::{AppState, ScrivoConfig, router, run_sweep, spawn_sweeper};

/// Durable speech-to-text jobs over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "SCRIVO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Delete stale uploads once and exit
    Sweep {
        /// Delete files older than this many hours
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Print the resolved configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scrivo=debug".into()),
        )
        .init();

    let config = ScrivoConfig::load(args.config.as_deref()).context("loading configuration")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Sweep { older_than_hours } => {
            let state = AppState::from_config(&config)?;
            let hours = older_than_hours.unwrap_or(config.sweep.older_than_hours);
            let report = run_sweep(state.storage.as_ref(), hours).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn serve(config: ScrivoConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;

    let resumed = state.service.resume_pending().await?;
    if !resumed.is_empty() {
        tracing::info!(count = resumed.len(), "Resumed interrupted transcription jobs");
    }

    let sweeper = spawn_sweeper(state.storage.clone(), &config.sweep);

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(addr = %config.server.bind, "Scrivo listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("Scrivo stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
