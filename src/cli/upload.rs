//! Upload command implementation.

use super::{Cli, CliError, OutputFormat};
use crate::cache::{RedisBackend, WriteThroughCache};
use crate::retry::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::store::JsonlStore;
use crate::uploader::{BatchUploader, UploadReport, UploaderConfig};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Arguments for the upload command.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Redis connection URL
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Most queue entries to drain in this run (range: 1-100000)
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u32).range(1..=100_000))]
    pub max_batch_size: u32,

    /// Keep cached records after upload instead of deleting them
    #[arg(long, default_value_t = false)]
    pub keep_cached: bool,

    /// Destination directory for the NDJSON store
    #[arg(long, default_value = "data")]
    pub out: PathBuf,
}

impl UploadArgs {
    /// Drain one batch from the upload queue into the destination store.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let backend = Arc::new(RedisBackend::connect(&self.redis_url).await?);
        let cache = Arc::new(WriteThroughCache::new(backend));
        let store = Arc::new(JsonlStore::open(&self.out)?);

        let retry = RetryPolicy::default()
            .with_max_attempts(cli.max_retries)
            .with_shutdown(shutdown);
        let uploader = BatchUploader::with_config(
            cache,
            store,
            UploaderConfig {
                max_batch_size: self.max_batch_size as usize,
                delete_after_upload: !self.keep_cached,
            },
        )
        .with_retry(retry);

        let report = uploader.run_once().await?;
        print_report(cli.output_format, &report);

        // Dead letters are reported, not fatal: the records are still cached
        // and a rerun can pick them up before the TTL expires.
        if !report.dead_letters.is_empty() {
            warn!(
                dead_letters = report.dead_letters.len(),
                "Some entries could not be delivered"
            );
        }
        Ok(())
    }
}

fn print_report(format: OutputFormat, report: &UploadReport) {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "drained": report.drained,
                "transactions_uploaded": report.transactions_uploaded,
                "predictions_uploaded": report.predictions_uploaded,
                "lost_records": report.lost_records,
                "dead_letters": report
                    .dead_letters
                    .iter()
                    .map(|d| {
                        json!({
                            "key": d.key,
                            "namespace": d.namespace.map(|n| n.to_string()),
                            "error": d.error,
                        })
                    })
                    .collect::<Vec<_>>(),
                "deleted": report.deleted,
            });
            println!("{value}");
        }
        OutputFormat::Human => {
            println!(
                "Uploaded {} rows ({} transactions, {} predictions); {} lost, {} dead-lettered, {} cache entries deleted",
                report.total_uploaded(),
                report.transactions_uploaded,
                report.predictions_uploaded,
                report.lost_records.len(),
                report.dead_letters.len(),
                report.deleted
            );
        }
    }
}
