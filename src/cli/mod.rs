//! CLI command implementations.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

pub mod backfill;
pub mod error;
pub mod health;
pub mod upload;

pub use backfill::BackfillArgs;
pub use error::CliError;
pub use health::HealthArgs;
pub use upload::UploadArgs;

/// BNPL data pipeline CLI.
#[derive(Parser, Debug)]
#[command(name = "bnpl-pipeline")]
#[command(about = "Move BNPL transaction and prediction events into the analytical store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Maximum attempts for retryable operations (range: 1-10)
    #[arg(long, global = true, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9187)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Backfill historical records over a date range
    Backfill(BackfillArgs),

    /// Drain the pending-upload queue into the destination store
    Upload(UploadArgs),

    /// Probe cache and API connectivity
    Health(HealthArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
