//! Resumable historical ingestion.
//!
//! [`engine::HistoricalIngestionEngine`] walks a date range, models each
//! day's realistic volume, fetches and validates records, and commits
//! multi-day batches to the destination store, persisting a
//! [`checkpoint::ProgressCheckpoint`] after every committed window so an
//! interrupted backfill resumes without reprocessing committed dates.

pub mod checkpoint;
pub mod engine;
pub mod volume;

pub use checkpoint::{CheckpointError, ProgressCheckpoint};
pub use engine::{
    HistoricalIngestionEngine, IngestionConfig, IngestionStatus, IngestionSummary,
};
pub use volume::VolumeModel;

use chrono::NaiveDate;

/// Fatal ingestion errors. Per-date and per-batch failures are recorded in
/// the checkpoint and retried on the next run instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Checkpoint could not be read or persisted; operator action required
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Date range rejected before any work
    #[error("invalid date range: {start}..{end}")]
    InvalidRange {
        /// Requested start date
        start: NaiveDate,
        /// Requested end date
        end: NaiveDate,
    },
}
