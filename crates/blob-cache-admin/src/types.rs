//! Core types for the blob cache admin tool

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tiered_blob_cache::{CachePolicy, DiskUsage};

#[derive(Debug, Parser)]
#[command(name = "blob-cache-admin")]
#[command(about = "Inspect and maintain a tiered blob cache", long_about = None)]
pub struct Cli {
    /// Defaults to `stats`
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn selected(&self) -> Command {
        self.command.clone().unwrap_or(Command::Stats)
    }
}

/// Subcommand selected on the command line
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print disk usage and policy as JSON
    Stats,
    /// Run one expiry sweep
    Clean,
    /// Delete every record in the writable root
    Clear,
    /// Sweep periodically until interrupted
    Daemon {
        /// Seconds between sweeps
        #[arg(
            long,
            env = "CLEAN_INTERVAL_SECS",
            default_value_t = 60 * 60,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_secs: u64,
    },
}

/// Output of the `stats` command
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub namespace: String,
    pub root: PathBuf,
    pub read_only_paths: Vec<PathBuf>,
    pub usage: DiskUsage,
    pub policy: CachePolicy,
}
