//! emdr-relay binary
//!
//! Loads configuration, initializes tracing, and starts the [`RelayApp`].

use std::path::PathBuf;

use clap::Parser;

use emdr_core::config::AppConfig;
use emdr_relay::RelayApp;

/// Deduplicating EMDR relay
#[derive(Parser, Debug)]
#[command(name = "emdr-relay", about = "Deduplicating EMDR market data relay")]
struct Args {
    /// Path to a TOML or JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    emdr_core::logging::init_tracing(config.logging.json && !args.pretty_logs);

    tracing::info!(
        upstream = ?config.upstream.endpoints,
        bind = %config.publisher.bind,
        cache_capacity = config.dedup.cache_capacity,
        store_enabled = config.store.enabled,
        "starting emdr-relay"
    );

    RelayApp::new(config).run().await
}
