//! Streaming quote client - entry point.
//!
//! Connects to the provider, subscribes the configured watchlist, and logs
//! every delivered quote until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Streaming quote client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    tickstream_ws::init_crypto();

    let args = Args::parse();

    tickstream_telemetry::init_logging()?;

    info!("Starting tickstream v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            tickstream_client::AppConfig::from_file(&path)?
        }
        None => tickstream_client::AppConfig::load()?,
    };
    info!(url = %config.stream.url, watchlist = ?config.watchlist, "Configuration loaded");

    let client = tickstream_client::StreamClient::new(&config)?;
    client.start();

    let mut loggers = Vec::new();
    for symbol in config.watchlist_symbols() {
        let mut handle = client.subscribe(symbol);
        loggers.push(tokio::spawn(async move {
            while let Some(quote) = handle.recv().await {
                info!(
                    symbol = %quote.symbol,
                    price = %quote.price,
                    timestamp = %quote.timestamp,
                    volume = ?quote.volume,
                    "Quote"
                );
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    client.shutdown(Duration::from_secs(5)).await;
    for logger in loggers {
        logger.abort();
    }

    Ok(())
}
