//! Crash-safe progress checkpoint for historical backfills.
//!
//! The checkpoint records which calendar dates have been committed to the
//! destination store and which have failed, so a restarted backfill resumes
//! exactly where the previous run stopped. Writes go through a temp file and
//! an atomic rename under an advisory file lock, so a crash mid-save leaves
//! the previous checkpoint intact.

use chrono::{DateTime, NaiveDate, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Checkpoint schema version written to every file.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Refuse to read state files larger than this (corruption guard).
const MAX_CHECKPOINT_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Checkpoint persistence errors.
///
/// A corrupt or unreadable checkpoint is fatal: silently starting over would
/// re-ingest committed dates and misreport totals, so the operator must
/// inspect or remove the file explicitly.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure reading or writing the checkpoint
    #[error("checkpoint I/O error: {0}")]
    Io(String),

    /// File exists but does not parse as a checkpoint
    #[error("checkpoint file is corrupt: {0}")]
    Corrupt(String),

    /// File parsed but carries an unknown schema version
    #[error("unsupported checkpoint schema version: {found} (expected {expected})")]
    SchemaVersion {
        /// Version this build writes
        expected: String,
        /// Version found in the file
        found: String,
    },

    /// Advisory lock could not be acquired
    #[error("checkpoint lock error: {0}")]
    Lock(String),

    /// File exceeds the size guard
    #[error("checkpoint file too large: {size} bytes (max {max})")]
    TooLarge {
        /// Observed file size
        size: u64,
        /// Allowed maximum
        max: u64,
    },
}

/// Durable record of backfill progress.
///
/// A date appears in at most one of `completed_dates` and `failed_dates`.
/// Completion is monotonic: once a date is completed it is never moved back
/// to pending or failed, and its record count is added to the running total
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    /// Schema version of this file
    pub schema_version: String,
    /// Dates whose records are durably in the destination store
    pub completed_dates: BTreeSet<NaiveDate>,
    /// Dates that failed validation or loading and should be retried first
    pub failed_dates: BTreeSet<NaiveDate>,
    /// Records committed across all runs, summed from per-date counts
    pub total_records_ingested: u64,
    /// When the backfill first started
    pub started_at: Option<DateTime<Utc>>,
    /// Last time this checkpoint was persisted
    pub updated_at: DateTime<Utc>,
}

impl Default for ProgressCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCheckpoint {
    /// Fresh checkpoint with no recorded progress.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            completed_dates: BTreeSet::new(),
            failed_dates: BTreeSet::new(),
            total_records_ingested: 0,
            started_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Load an existing checkpoint, or start fresh when none exists.
    ///
    /// An unreadable or corrupt file is an error, never a silent restart.
    pub fn load_or_new(path: &Path) -> Result<Self, CheckpointError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No checkpoint found, starting fresh");
            Ok(Self::new())
        }
    }

    /// Load a checkpoint from disk under a shared advisory lock.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let lock_file = open_lock_file(path)?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::Lock(format!("failed to acquire read lock: {e}")))?;

        let metadata =
            std::fs::metadata(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(CheckpointError::TooLarge {
                size: metadata.len(),
                max: MAX_CHECKPOINT_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        let state: ProgressCheckpoint = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Checkpoint file failed to parse");
            CheckpointError::Corrupt(e.to_string())
        })?;

        if state.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                found: state.schema_version,
            });
        }

        info!(
            path = %path.display(),
            completed = state.completed_dates.len(),
            failed = state.failed_dates.len(),
            total_records = state.total_records_ingested,
            "Loaded ingestion checkpoint"
        );
        Ok(state)
    }

    /// Persist atomically: temp file in the target directory, fsync, rename,
    /// directory fsync, all under an exclusive advisory lock.
    pub fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Io(e.to_string()))?;

        let lock_file = open_lock_file(path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CheckpointError::Io(format!("failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::Io(format!("failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::Io(format!("failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::Io(format!("failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| CheckpointError::Io(format!("failed to persist temp file: {e}")))?;

        // Make the rename itself durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(
            path = %path.display(),
            completed = self.completed_dates.len(),
            failed = self.failed_dates.len(),
            total_records = self.total_records_ingested,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Record the backfill start time on first use.
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark a date durably committed with its exact record count.
    ///
    /// Idempotent: re-marking an already completed date adds nothing.
    pub fn mark_completed(&mut self, date: NaiveDate, records: u64) {
        if self.completed_dates.insert(date) {
            self.failed_dates.remove(&date);
            self.total_records_ingested += records;
        }
    }

    /// Mark a date failed so the next run retries it first.
    ///
    /// A completed date is never demoted.
    pub fn mark_failed(&mut self, date: NaiveDate) {
        if !self.completed_dates.contains(&date) {
            self.failed_dates.insert(date);
        }
    }

    /// Whether a date has already been committed.
    pub fn is_completed(&self, date: NaiveDate) -> bool {
        self.completed_dates.contains(&date)
    }

    /// Dates in the inclusive range still needing work, previously failed
    /// dates first, then never-attempted dates in chronological order.
    pub fn remaining_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut retries = Vec::new();
        let mut pending = Vec::new();
        let mut date = start;
        while date <= end {
            if !self.completed_dates.contains(&date) {
                if self.failed_dates.contains(&date) {
                    retries.push(date);
                } else {
                    pending.push(date);
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        retries.extend(pending);
        retries
    }

    /// Remaining work grouped into batches of at most `batch_days` dates.
    pub fn remaining_batches(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        batch_days: usize,
    ) -> Vec<Vec<NaiveDate>> {
        let batch_days = batch_days.max(1);
        self.remaining_dates(start, end)
            .chunks(batch_days)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, CheckpointError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CheckpointError::Lock(format!("failed to open lock file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("progress.json");

        let mut cp = ProgressCheckpoint::new();
        cp.mark_started();
        cp.mark_completed(date("2024-01-01"), 5000);
        cp.mark_failed(date("2024-01-02"));
        cp.save(&path).unwrap();

        let loaded = ProgressCheckpoint::load(&path).unwrap();
        assert!(loaded.is_completed(date("2024-01-01")));
        assert!(loaded.failed_dates.contains(&date("2024-01-02")));
        assert_eq!(loaded.total_records_ingested, 5000);
        assert!(loaded.started_at.is_some());
    }

    #[test]
    fn test_corrupt_file_is_a_hard_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not valid json").unwrap();

        assert!(matches!(
            ProgressCheckpoint::load(&path),
            Err(CheckpointError::Corrupt(_))
        ));
        // load_or_new must not paper over corruption either
        assert!(ProgressCheckpoint::load_or_new(&path).is_err());
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let mut cp = ProgressCheckpoint::new();
        cp.schema_version = "9.9.9".to_string();
        cp.save(&path).unwrap();

        assert!(matches!(
            ProgressCheckpoint::load(&path),
            Err(CheckpointError::SchemaVersion { .. })
        ));
    }

    #[test]
    fn test_completion_is_monotonic() {
        let mut cp = ProgressCheckpoint::new();
        cp.mark_completed(date("2024-01-01"), 100);
        cp.mark_completed(date("2024-01-01"), 999);
        assert_eq!(cp.total_records_ingested, 100);

        cp.mark_failed(date("2024-01-01"));
        assert!(cp.is_completed(date("2024-01-01")));
        assert!(cp.failed_dates.is_empty());
    }

    #[test]
    fn test_completing_a_failed_date_clears_it() {
        let mut cp = ProgressCheckpoint::new();
        cp.mark_failed(date("2024-01-03"));
        cp.mark_completed(date("2024-01-03"), 42);
        assert!(cp.failed_dates.is_empty());
        assert_eq!(cp.total_records_ingested, 42);
    }

    #[test]
    fn test_remaining_dates_retries_failures_first() {
        let mut cp = ProgressCheckpoint::new();
        cp.mark_completed(date("2024-01-01"), 1);
        cp.mark_failed(date("2024-01-04"));

        let remaining = cp.remaining_dates(date("2024-01-01"), date("2024-01-05"));
        assert_eq!(
            remaining,
            vec![
                date("2024-01-04"),
                date("2024-01-02"),
                date("2024-01-03"),
                date("2024-01-05"),
            ]
        );
    }

    #[test]
    fn test_remaining_batches_chunking() {
        let cp = ProgressCheckpoint::new();
        let batches = cp.remaining_batches(date("2024-01-01"), date("2024-01-07"), 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[2], vec![date("2024-01-07")]);
    }

    #[test]
    fn test_crash_mid_save_preserves_previous_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let mut cp = ProgressCheckpoint::new();
        cp.mark_completed(date("2024-01-01"), 10);
        cp.save(&path).unwrap();

        // A leftover temp file from an interrupted save must not affect loads
        std::fs::write(dir.path().join(".tmpXXXX"), "garbage").unwrap();
        let loaded = ProgressCheckpoint::load(&path).unwrap();
        assert_eq!(loaded.total_records_ingested, 10);
    }
}
