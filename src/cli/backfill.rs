//! Backfill command implementation.

use super::{Cli, CliError, OutputFormat};
use crate::api::{ApiClientConfig, BnplApiClient};
use crate::ingest::{
    HistoricalIngestionEngine, IngestionConfig, IngestionStatus, IngestionSummary,
};
use crate::retry::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::store::JsonlStore;
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Arguments for the backfill command.
#[derive(Parser, Debug)]
pub struct BackfillArgs {
    /// First date to ingest (YYYY-MM-DD, inclusive)
    #[arg(long)]
    pub start_date: NaiveDate,

    /// Last date to ingest (YYYY-MM-DD, inclusive)
    #[arg(long)]
    pub end_date: NaiveDate,

    /// Baseline records per day before volume modeling
    #[arg(long, default_value = "5000", value_parser = clap::value_parser!(u64).range(1..=50_000))]
    pub base_daily_volume: u64,

    /// Seed for the upstream generator and the volume model
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Dates per committed batch window (range: 1-366)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u16).range(1..=366))]
    pub batch_days: u16,

    /// Report modeled volumes without fetching or writing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Progress checkpoint file
    #[arg(long, default_value = "backfill_progress.json")]
    pub checkpoint: PathBuf,

    /// Destination directory for the NDJSON store
    #[arg(long, default_value = "data")]
    pub out: PathBuf,

    /// Override the historical API base URL
    #[arg(long)]
    pub api_url: Option<String>,
}

impl BackfillArgs {
    /// Run a historical backfill over the requested date range.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        if self.end_date < self.start_date {
            return Err(CliError::InvalidArgument(format!(
                "end date {} precedes start date {}",
                self.end_date, self.start_date
            )));
        }

        let retry = RetryPolicy::default()
            .with_max_attempts(cli.max_retries)
            .with_shutdown(shutdown.clone());

        let mut api_config = ApiClientConfig::default();
        if let Some(url) = &self.api_url {
            api_config.base_url = url.clone();
        }
        let client = Arc::new(BnplApiClient::new(api_config, retry.clone())?);
        let store = Arc::new(JsonlStore::open(&self.out)?);

        let mut config =
            IngestionConfig::new(self.start_date, self.end_date, self.checkpoint.clone());
        config.base_daily_volume = self.base_daily_volume;
        config.seed = self.seed;
        config.batch_days = self.batch_days as usize;
        config.dry_run = self.dry_run;

        let engine = HistoricalIngestionEngine::new(config, client, store)
            .with_retry(retry)
            .with_shutdown(shutdown);

        let spinner = progress_spinner(cli.output_format, self.start_date, self.end_date);
        let summary = engine.run().await?;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        print_summary(cli.output_format, &summary);

        match summary.status {
            IngestionStatus::Completed | IngestionStatus::DryRun => Ok(()),
            // Graceful shutdown is not a failure; the checkpoint resumes
            IngestionStatus::Interrupted => {
                info!("Backfill interrupted, rerun to resume from the checkpoint");
                Ok(())
            }
            IngestionStatus::Partial => Err(CliError::Incomplete(format!(
                "{} date(s) failed; rerun to retry them",
                summary.failed_dates
            ))),
        }
    }
}

fn progress_spinner(
    format: OutputFormat,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<ProgressBar> {
    // Human mode only; a spinner corrupts piped JSON output
    if format != OutputFormat::Human {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Backfilling {start}..{end}"));
    spinner.enable_steady_tick(Duration::from_millis(120));
    Some(spinner)
}

fn print_summary(format: OutputFormat, summary: &IngestionSummary) {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "status": format!("{:?}", summary.status).to_lowercase(),
                "batches_committed": summary.batches_committed,
                "batches_failed": summary.batches_failed,
                "records_ingested": summary.records_ingested,
                "total_records_ingested": summary.total_records_ingested,
                "completed_dates": summary.completed_dates,
                "failed_dates": summary.failed_dates,
                "planned_records": summary.planned_records,
            });
            println!("{value}");
        }
        OutputFormat::Human => {
            if let Some(planned) = summary.planned_records {
                println!("Dry run: {planned} records planned across the remaining dates");
                return;
            }
            println!(
                "Backfill {:?}: {} records this run ({} total), {} dates complete, {} failed",
                summary.status,
                summary.records_ingested,
                summary.total_records_ingested,
                summary.completed_dates,
                summary.failed_dates
            );
        }
    }
}
