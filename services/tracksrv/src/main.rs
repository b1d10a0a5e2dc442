//! Tracking Service (`tracksrv`)
//!
//! Binds the GT-06 and Suntech protocol listeners and runs them until
//! interrupted. The in-memory fleet store is seeded from the configured
//! device roster; a deployment embedding this core behind the fleet CRUD
//! layer injects its own [`fleet_model::FleetStore`] implementation instead.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleet_model::{FleetStore, MemoryFleetStore};
use tracksrv::config::AppConfig;
use tracksrv::logging;
use tracksrv::protocols::gt06::Gt06Listener;
use tracksrv::protocols::suntech::SuntechListener;
use tracksrv::registry::ConnectionRegistry;
use tracksrv::Result as TrackResult;

#[derive(Debug, Parser)]
#[command(name = "tracksrv", about = "GPS tracker ingestion and command service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "TRACKSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log to console instead of rolling files
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.service.log_level);
    logging::init_logger(
        &config.service.log_dir,
        &config.service.name,
        level,
        args.console || config.service.console,
    )
    .context("initializing logger")?;

    info!(
        gt06_enabled = config.gt06.enabled,
        suntech_enabled = config.suntech.enabled,
        "starting {}",
        config.service.name
    );

    let store = Arc::new(MemoryFleetStore::new());
    for entry in &config.devices {
        store.add_device(
            entry.hardware_id.clone(),
            entry.vehicle_id,
            entry.title.clone(),
            entry.icon.clone(),
        );
    }
    info!(devices = config.devices.len(), "device roster seeded");

    let store: Arc<dyn FleetStore> = store;
    let registry = Arc::new(ConnectionRegistry::new());
    let shutdown = CancellationToken::new();
    let mut listeners: Vec<(&str, JoinHandle<TrackResult<()>>)> = Vec::new();

    if config.gt06.enabled {
        let socket = bind(&config.gt06.bind, config.gt06.port, "gt06").await?;
        let listener = Gt06Listener::new(
            config.gt06.clone(),
            Arc::clone(&registry),
            Arc::clone(&store),
        );
        listeners.push((
            "gt06",
            tokio::spawn(listener.serve(socket, shutdown.child_token())),
        ));
    }
    if config.suntech.enabled {
        let socket = bind(&config.suntech.bind, config.suntech.port, "suntech").await?;
        let listener = SuntechListener::new(
            config.suntech.clone(),
            Arc::clone(&registry),
            Arc::clone(&store),
        );
        listeners.push((
            "suntech",
            tokio::spawn(listener.serve(socket, shutdown.child_token())),
        ));
    }

    if listeners.is_empty() {
        anyhow::bail!("no protocol listeners enabled");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    for (name, handle) in listeners {
        match handle.await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => error!(listener = name, error = %err, "listener exited with error"),
            Err(err) => error!(listener = name, error = %err, "listener task panicked"),
        }
    }

    info!("tracksrv stopped");
    Ok(())
}

async fn bind(addr: &str, port: u16, name: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind((addr, port))
        .await
        .with_context(|| format!("binding {name} listener on {addr}:{port}"))
}
