//! Blob cache admin - maintenance CLI and housekeeping daemon
//!
//! Builds the cache from environment configuration and runs one of
//! `stats`, `clean`, `clear` or `daemon`.

mod commands;
mod error;
mod types;

use crate::commands::Cache;
use crate::error::Result;
use crate::types::{Cli, Command};
use clap::Parser;
use tiered_blob_cache::{BytesCodec, CacheConfig};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let command = Cli::parse().selected();

    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("blob_cache_admin=info".parse()?)
        .add_directive("tiered_blob_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    // Load configuration from environment
    let config = CacheConfig::from_env()?;
    info!("Cache dir: {:?}", config.disk_root());
    info!("Max cache age: {} seconds", config.policy.max_age.as_secs());
    match config.policy.max_size {
        Some(size) => info!("Max cache size: {} MB", size / (1024 * 1024)),
        None => info!("Max cache size: unlimited"),
    }

    let cache: Cache = Cache::new(config, BytesCodec)?;

    match command {
        Command::Stats => {
            let status = commands::status(&cache).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Clean => {
            let report = commands::clean(&cache).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Clear => {
            commands::clear(&cache).await?;
            info!("Disk cache cleared");
        }
        Command::Daemon { interval_secs } => {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let interval = std::time::Duration::from_secs(interval_secs);
            commands::run_daemon(&cache, interval, shutdown).await?;
        }
    }

    Ok(())
}
