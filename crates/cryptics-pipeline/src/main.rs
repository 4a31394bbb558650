//! cryptics-pipeline: Market data pipeline binary
//!
//! Migrates the store, declares a sink connector per enabled model, and
//! runs the producers until SIGTERM or SIGINT.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryptics_metadata::PipelineConfig;
use cryptics_pipeline_lib::{run_server, Pipeline, ServerState};

#[derive(Parser, Debug)]
#[command(name = "cryptics-pipeline")]
#[command(about = "Exchange market data to bus to store pipeline")]
struct Args {
    /// Path to pipeline configuration file
    #[arg(short, long, env = "CRYPTICS_CONFIG")]
    config: PathBuf,

    /// Store connection string, overrides store.url
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Health server bind address, overrides health_addr
    #[arg(long)]
    health_addr: Option<String>,

    /// Publish generated instances of every enabled model
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::read(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(url) = args.database_url {
        config.store.url = Some(url);
    }
    if let Some(addr) = args.health_addr {
        config.health_addr = addr;
    }
    if args.synthetic {
        config.producer.synthetic = true;
    }
    config.validate()?;
    info!(pipeline = %config.name, models = ?config.models, "Loaded pipeline configuration");

    let health_addr: SocketAddr = config
        .health_addr
        .parse()
        .with_context(|| format!("invalid health address {}", config.health_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
            _ = sigint.recv() => info!("SIGINT received, shutting down gracefully"),
        }
        shutdown_tx.send(true).ok();
    });

    let name = config.name.clone();
    let pipeline = Pipeline::from_config(config).await?;

    // Health comes up first so probes see not_ready while migrations run
    let state = ServerState::new(name, pipeline.health());
    let server = tokio::spawn(run_server(health_addr, state, shutdown_rx.clone()));
    info!(addr = %health_addr, "Health server listening");

    let running = match pipeline.start(shutdown_rx).await {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "Pipeline failed to start");
            server.abort();
            return Err(e.into());
        }
    };

    running.join().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
    }
    Ok(())
}
