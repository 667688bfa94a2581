//! Greenhouse Hub Server
//!
//! A standalone hub that field nodes and control panels connect to.

use anyhow::{Context, Result};
use clap::Parser;
use greenhouse_hub::{HubConfig, HubServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "greenhouse-hub")]
#[command(about = "Greenhouse Hub Server")]
#[command(version)]
struct Cli {
    /// Control connection listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Sensor data listen address
    #[arg(short, long)]
    data: Option<SocketAddr>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<HubConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => HubConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.tcp_addr = listen.to_string();
    }
    if let Some(data) = cli.data {
        config.udp_addr = data.to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    tracing::info!("Starting Greenhouse Hub");
    tracing::info!("Control: {}, sensor data: {}", config.tcp_addr, config.udp_addr);

    let server = HubServer::new(config);
    let stopper = server.clone();

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            stopper.stop();
        }
    }

    Ok(())
}
