//! # ridechat
//!
//! Realtime room chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ridechat
//!
//! # Run with custom config
//! ridechat --config /path/to/ridechat.toml
//!
//! # Run with environment variables
//! RIDECHAT_PORT=8080 RIDECHAT_HOST=0.0.0.0 RIDECHAT_JWT_SECRET=... ridechat
//! ```

use anyhow::Result;
use clap::Parser;
use ridechat_server::config::{Config, LogFormat};
use ridechat_server::{handlers, metrics};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "ridechat", version, about = "Realtime room chat server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "RIDECHAT_CONFIG")]
    config: Option<PathBuf>,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ridechat=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize tracing
    init_tracing(config.logging.format);

    tracing::info!("Starting ridechat server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
