//! Main entry point for the bnpl-pipeline CLI.

use bnpl_pipeline::cli::{Cli, Commands};
use bnpl_pipeline::shutdown::{self, ShutdownSignal};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with optional JSON formatting via `LOG_FORMAT=json`.
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bnpl_pipeline=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = bnpl_pipeline::metrics::init_metrics(addr) {
            error!("Failed to initialize metrics: {e}");
            std::process::exit(1);
        }
    }

    let shutdown = ShutdownSignal::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing the current batch...");
                shutdown.request();
            }
        }
    });

    let result = match cli.command {
        Commands::Backfill(ref args) => args.execute(&cli, shutdown.clone()).await,
        Commands::Upload(ref args) => args.execute(&cli, shutdown.clone()).await,
        Commands::Health(ref args) => args.execute(&cli, shutdown.clone()).await,
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        std::process::exit(1);
    }
}
