use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

mod config;
mod engine;
mod error;
mod geo;
mod matcher;
mod proxy;
mod request;
mod routing;
mod util;

use config::{ConfigManager, RoutingFile};
use engine::{Engine, EngineEnv};

#[derive(Parser)]
#[command(name = "ruta")]
#[command(about = "A programmable virtual-host router and dispatch proxy")]
struct Args {
    #[arg(short, long, default_value = "config/ruta.toml")]
    config: String,

    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ruta={}", level))
        .init();

    info!("Starting ruta routing engine");

    // Load configuration and build the routing graph
    let conf = RoutingFile::from_file_with_env(&args.config).await?;
    let engine = Arc::new(Engine::new(EngineEnv::default(), &conf)?);

    // Watch the config file and swap the graph on change
    let mut manager = ConfigManager::new(&args.config, engine.clone());
    manager.start_hot_reload()?;

    // Setup graceful shutdown
    let shutdown_signal = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        warn!("Received CTRL+C, shutting down gracefully...");
    };

    tokio::select! {
        result = engine.clone().serve(args.bind) => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    info!("ruta shutdown complete");
    Ok(())
}
