//! gridrunners-server - authoritative game server

use anyhow::Result;
use clap::Parser;
use gridrunners::config::{Config, StorageBackend};
use gridrunners::maze::MazeProvider;
use gridrunners::server::{Gateway, ServerListener};
use gridrunners::store;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "gridrunners-server")]
#[command(about = "gridrunners game server")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Listen address override
    #[arg(short, long)]
    bind: Option<String>,

    /// Keep sessions in memory only
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if cli.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    let store = store::open(&config).await?;
    let mazes = MazeProvider::from_config(&config.maze);
    tracing::info!(
        "Maze source: {}",
        if mazes.has_remote() { "remote with local fallback" } else { "local" }
    );

    let gateway = Arc::new(Gateway::new(store, mazes, config.game.clone()));
    gateway.restore().await?;

    let listener = ServerListener::bind(&config.server, gateway).await?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        let _ = shutdown_tx.send(()).await;
    });

    listener.run(shutdown_rx).await?;
    tracing::info!("Server stopped");
    Ok(())
}
