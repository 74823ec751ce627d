//! # Fanout Server
//!
//! Topic-based publish/subscribe broadcaster over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! fanout
//!
//! # Run with custom config
//! fanout --config /path/to/fanout.toml
//!
//! # Run with environment variables
//! FANOUT_PORT=8080 FANOUT_HOST=0.0.0.0 fanout
//!
//! # Publish and subscribe
//! curl -N 'http://127.0.0.1:8080/subscribe?topic=news'
//! curl -d '{"topic":"news","message":"hello"}' http://127.0.0.1:8080/publish
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments. These override the config file and environment.
#[derive(Debug, Parser)]
#[command(name = "fanout", version, about = "Topic-based pub/sub broadcaster")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=info,fanout_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    tracing::info!("Starting Fanout server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
