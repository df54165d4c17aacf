//! Historical ingestion engine.
//!
//! Drives a date-range backfill: models each day's target volume, fetches
//! the day through a [`RecordSource`], validates it atomically, dedups by
//! [`UniqueRecordId`], and commits multi-day batch windows to the
//! destination store. The checkpoint is persisted after every committed or
//! failed window, so interrupting the process at any point loses at most the
//! in-flight window.

use super::checkpoint::ProgressCheckpoint;
use super::volume::VolumeModel;
use super::IngestError;
use crate::api::{ApiError, RecordSource};
use crate::retry::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::store::{DestinationRow, DestinationStore};
use crate::{EventRecord, Namespace, ValidationError};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backfill parameters.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// First date to ingest (inclusive)
    pub start_date: NaiveDate,
    /// Last date to ingest (inclusive)
    pub end_date: NaiveDate,
    /// Baseline daily volume before modeling factors
    pub base_daily_volume: u64,
    /// Seed forwarded to the API and the volume model
    pub seed: u64,
    /// Dates per committed batch window
    pub batch_days: usize,
    /// Report modeled volumes without fetching or writing
    pub dry_run: bool,
    /// Where the progress checkpoint lives
    pub checkpoint_path: PathBuf,
}

impl IngestionConfig {
    /// Config for a date range with the standard defaults: 5000 records/day
    /// baseline, seed 42, 30-day batch windows.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, checkpoint_path: PathBuf) -> Self {
        Self {
            start_date,
            end_date,
            base_daily_volume: 5000,
            seed: 42,
            batch_days: 30,
            dry_run: false,
            checkpoint_path,
        }
    }
}

/// Terminal state of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    /// Every date in the range is committed
    Completed,
    /// Some dates remain failed after this run
    Partial,
    /// Shutdown was requested before the range finished
    Interrupted,
    /// Dry run, nothing written
    DryRun,
}

/// What one engine run accomplished.
#[derive(Debug, Clone)]
pub struct IngestionSummary {
    /// How the run ended
    pub status: IngestionStatus,
    /// Batch windows committed this run
    pub batches_committed: u64,
    /// Batch windows that failed this run
    pub batches_failed: u64,
    /// Records committed this run
    pub records_ingested: u64,
    /// Records committed across all runs, from the checkpoint
    pub total_records_ingested: u64,
    /// Dates committed across all runs
    pub completed_dates: usize,
    /// Dates currently marked failed
    pub failed_dates: usize,
    /// Modeled record total for a dry run
    pub planned_records: Option<u64>,
}

/// Resumable date-range backfill over any [`RecordSource`] and
/// [`DestinationStore`].
pub struct HistoricalIngestionEngine {
    config: IngestionConfig,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn DestinationStore>,
    volume: VolumeModel,
    retry: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

/// Why one calendar date could not be collected.
#[derive(Debug, thiserror::Error)]
enum DayError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ApiError),

    #[error("record {index} failed validation: {source}")]
    Validation {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

impl HistoricalIngestionEngine {
    /// Build an engine over a record source and a destination store.
    pub fn new(
        config: IngestionConfig,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            volume: VolumeModel::default(),
            retry: RetryPolicy::default(),
            shutdown: None,
        }
    }

    /// Replace the default volume model.
    pub fn with_volume_model(mut self, volume: VolumeModel) -> Self {
        self.volume = volume;
        self
    }

    /// Replace the default retry policy for bulk store loads.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = match &self.shutdown {
            Some(shutdown) => retry.with_shutdown(shutdown.clone()),
            None => retry,
        };
        self
    }

    /// Attach a shutdown handle checked between batch windows.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.retry = self.retry.clone().with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the backfill to completion, shutdown, or a fatal checkpoint error.
    pub async fn run(&self) -> Result<IngestionSummary, IngestError> {
        if self.config.end_date < self.config.start_date {
            return Err(IngestError::InvalidRange {
                start: self.config.start_date,
                end: self.config.end_date,
            });
        }

        let mut checkpoint = ProgressCheckpoint::load_or_new(&self.config.checkpoint_path)?;
        checkpoint.mark_started();

        let batches = checkpoint.remaining_batches(
            self.config.start_date,
            self.config.end_date,
            self.config.batch_days,
        );

        if self.config.dry_run {
            return Ok(self.plan(&checkpoint, &batches));
        }

        info!(
            start = %self.config.start_date,
            end = %self.config.end_date,
            remaining_batches = batches.len(),
            already_completed = checkpoint.completed_dates.len(),
            "Starting historical ingestion"
        );

        let mut batches_committed = 0u64;
        let mut batches_failed = 0u64;
        let mut records_ingested = 0u64;
        let mut interrupted = false;

        for dates in &batches {
            if self.shutdown.as_ref().is_some_and(|s| s.is_requested()) {
                info!("Shutdown requested, stopping before next batch window");
                interrupted = true;
                break;
            }

            match self.ingest_batch(&mut checkpoint, dates).await? {
                Some(committed) => {
                    batches_committed += 1;
                    records_ingested += committed;
                }
                None => batches_failed += 1,
            }
        }

        let status = if interrupted {
            IngestionStatus::Interrupted
        } else if checkpoint.failed_dates.is_empty()
            && checkpoint
                .remaining_dates(self.config.start_date, self.config.end_date)
                .is_empty()
        {
            IngestionStatus::Completed
        } else {
            IngestionStatus::Partial
        };

        let summary = IngestionSummary {
            status,
            batches_committed,
            batches_failed,
            records_ingested,
            total_records_ingested: checkpoint.total_records_ingested,
            completed_dates: checkpoint.completed_dates.len(),
            failed_dates: checkpoint.failed_dates.len(),
            planned_records: None,
        };
        info!(
            status = ?summary.status,
            records = summary.records_ingested,
            total_records = summary.total_records_ingested,
            failed_dates = summary.failed_dates,
            "Historical ingestion finished"
        );
        Ok(summary)
    }

    /// Model the remaining work without touching the network or the store.
    fn plan(&self, checkpoint: &ProgressCheckpoint, batches: &[Vec<NaiveDate>]) -> IngestionSummary {
        let mut planned = 0u64;
        for dates in batches {
            for &date in dates {
                let volume =
                    self.volume
                        .modeled_volume(self.config.base_daily_volume, date, self.config.seed);
                info!(%date, volume, "Planned ingestion volume");
                planned += volume;
            }
        }
        IngestionSummary {
            status: IngestionStatus::DryRun,
            batches_committed: 0,
            batches_failed: 0,
            records_ingested: 0,
            total_records_ingested: checkpoint.total_records_ingested,
            completed_dates: checkpoint.completed_dates.len(),
            failed_dates: checkpoint.failed_dates.len(),
            planned_records: Some(planned),
        }
    }

    /// Collect one batch window and commit it as a unit.
    ///
    /// Dates that fail fetch or validation are marked failed without
    /// poisoning the rest of the window. Returns the committed record count,
    /// or `None` when the whole window failed. Only checkpoint persistence
    /// errors propagate.
    async fn ingest_batch(
        &self,
        checkpoint: &mut ProgressCheckpoint,
        dates: &[NaiveDate],
    ) -> Result<Option<u64>, IngestError> {
        let mut rows: Vec<DestinationRow> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut day_counts: Vec<(NaiveDate, u64)> = Vec::new();

        for &date in dates {
            let target = self
                .volume
                .modeled_volume(self.config.base_daily_volume, date, self.config.seed);
            match self.collect_day(date, target).await {
                Ok(records) => {
                    let mut count = 0u64;
                    for record in records {
                        let id = record.record_id();
                        // Dedup within the window; the store handles the rest
                        if seen.insert(id.as_str().to_string()) {
                            rows.push(DestinationRow::new(id, record.raw));
                            count += 1;
                        }
                    }
                    day_counts.push((date, count));
                    debug!(%date, target, validated = count, "Collected day");
                }
                Err(e) => {
                    warn!(%date, error = %e, "Date failed, zero records kept for it");
                    checkpoint.mark_failed(date);
                }
            }
        }

        if day_counts.is_empty() {
            checkpoint.save(&self.config.checkpoint_path)?;
            crate::metrics::record_batch_failed();
            return Ok(None);
        }

        let started = std::time::Instant::now();
        let load_result = self
            .retry
            .run("load_historical_batch", || {
                self.store.load(Namespace::Transaction, rows.clone())
            })
            .await;
        crate::metrics::record_load_duration(started.elapsed().as_secs_f64());

        match load_result {
            Ok(inserted) => {
                let committed: u64 = day_counts.iter().map(|(_, n)| n).sum();
                for (date, count) in day_counts {
                    checkpoint.mark_completed(date, count);
                }
                checkpoint.save(&self.config.checkpoint_path)?;
                crate::metrics::record_records_ingested(committed);
                info!(
                    window_start = %dates[0],
                    window_end = %dates[dates.len() - 1],
                    rows = committed,
                    newly_inserted = inserted,
                    "Committed batch window"
                );
                Ok(Some(committed))
            }
            Err(e) => {
                warn!(
                    window_start = %dates[0],
                    window_end = %dates[dates.len() - 1],
                    error = %e,
                    "Batch window failed after retries, dates marked for re-ingestion"
                );
                for (date, _) in day_counts {
                    checkpoint.mark_failed(date);
                }
                checkpoint.save(&self.config.checkpoint_path)?;
                crate::metrics::record_batch_failed();
                Ok(None)
            }
        }
    }

    /// Fetch and validate one calendar date.
    ///
    /// Validation is atomic per date: a single bad record rejects the whole
    /// day so it can be retried as a unit.
    async fn collect_day(&self, date: NaiveDate, target: u64) -> Result<Vec<EventRecord>, DayError> {
        let raw_records = self.source.fetch_day(date, target, self.config.seed).await?;

        let mut records = Vec::with_capacity(raw_records.len());
        for (index, raw) in raw_records.into_iter().enumerate() {
            let record = EventRecord::from_raw(raw)
                .map_err(|source| DayError::Validation { index, source })?;
            records.push(record);
        }
        Ok(records)
    }
}
