//! Destination store contract.
//!
//! The analytical store is an external collaborator consumed through a
//! narrow trait: two logical tables (transaction events, prediction events),
//! each accepting bulk idempotent upserts keyed by [`UniqueRecordId`] and
//! carrying the complete raw payload in an opaque JSON column for forward
//! compatibility with unseen upstream fields.

use crate::retry::Transient;
use crate::{Namespace, UniqueRecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Destination store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store momentarily unreachable; retried by policy
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected the load; retrying cannot help
    #[error("load rejected: {0}")]
    Rejected(String),

    /// Local IO failure while persisting
    #[error("IO error: {0}")]
    Io(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// One destination row: the stable dedup key, the ingestion timestamp the
/// destination partitions on, and the verbatim raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationRow {
    /// Deduplication key; the true primary key at the destination
    pub record_id: UniqueRecordId,
    /// When this row was ingested (partition column)
    pub ingested_at: DateTime<Utc>,
    /// Complete raw record, reproduced verbatim
    pub payload: serde_json::Value,
}

impl DestinationRow {
    /// Build a row stamped with the current ingestion time.
    pub fn new(record_id: UniqueRecordId, payload: serde_json::Value) -> Self {
        Self {
            record_id,
            ingested_at: Utc::now(),
            payload,
        }
    }
}

/// Bulk-load contract shared by the live and backfill paths.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Idempotently upsert rows into a logical table, keyed by record id.
    ///
    /// Re-delivering a previously loaded row is a safe no-op. Returns the
    /// number of rows newly inserted (duplicates excluded).
    async fn load(&self, table: Namespace, rows: Vec<DestinationRow>) -> Result<u64, StoreError>;
}
