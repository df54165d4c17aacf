//! Queue-driven batch uploader.
//!
//! Drains the cache's pending-upload queue in capped batches, partitions
//! entries by namespace, and bulk-loads each partition into its destination
//! table under the shared retry policy. Namespace partitions fail
//! independently: a prediction-table outage never blocks transaction
//! uploads. Entries whose cached record expired before drain are reported as
//! lost records; entries that exhaust retries become dead letters.

use crate::cache::{CacheError, WriteThroughCache};
use crate::retry::RetryPolicy;
use crate::store::{DestinationRow, DestinationStore};
use crate::{Namespace, UniqueRecordId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Uploader tunables.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Most queue entries drained per run
    pub max_batch_size: usize,
    /// Delete cached records after a successful upload; when false the TTL
    /// reclaims them
    pub delete_after_upload: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            delete_after_upload: true,
        }
    }
}

/// Uploader errors. Partition-level store failures become dead letters in
/// the report instead; only queue access itself surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The upload queue could not be drained
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A queue entry that exhausted retries against the destination store.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The namespaced cache key
    pub key: String,
    /// Partition the entry belonged to
    pub namespace: Option<Namespace>,
    /// Final error after retries
    pub error: String,
}

/// Outcome of one uploader run.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Queue entries drained this run
    pub drained: usize,
    /// Rows delivered to the transaction table
    pub transactions_uploaded: u64,
    /// Rows delivered to the prediction table
    pub predictions_uploaded: u64,
    /// Keys whose cached record had expired before drain
    pub lost_records: Vec<String>,
    /// Entries that could not be delivered
    pub dead_letters: Vec<DeadLetter>,
    /// Cached records deleted after delivery
    pub deleted: u64,
}

impl UploadReport {
    /// Total rows delivered across both tables.
    pub fn total_uploaded(&self) -> u64 {
        self.transactions_uploaded + self.predictions_uploaded
    }
}

/// Drains the pending-upload queue into the destination store.
pub struct BatchUploader {
    cache: Arc<WriteThroughCache>,
    store: Arc<dyn DestinationStore>,
    retry: RetryPolicy,
    config: UploaderConfig,
}

impl BatchUploader {
    /// Build an uploader with default tunables.
    pub fn new(cache: Arc<WriteThroughCache>, store: Arc<dyn DestinationStore>) -> Self {
        Self::with_config(cache, store, UploaderConfig::default())
    }

    /// Build an uploader with explicit tunables.
    pub fn with_config(
        cache: Arc<WriteThroughCache>,
        store: Arc<dyn DestinationStore>,
        config: UploaderConfig,
    ) -> Self {
        Self {
            cache,
            store,
            retry: RetryPolicy::default(),
            config,
        }
    }

    /// Replace the default retry policy for destination writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Drain one batch from the queue and deliver it.
    ///
    /// At-least-once: a crash between store delivery and cache deletion only
    /// re-delivers rows the store dedups anyway. Entries left beyond the
    /// batch cap stay queued for the next run.
    pub async fn run_once(&self) -> Result<UploadReport, UploadError> {
        let keys = self.cache.drain_queue(self.config.max_batch_size).await?;
        let mut report = UploadReport {
            drained: keys.len(),
            ..UploadReport::default()
        };
        if keys.is_empty() {
            debug!("Upload queue empty");
            return Ok(report);
        }

        info!(drained = keys.len(), "Draining upload queue");

        // key -> (namespace, row), partitioned for per-table bulk loads
        let mut partitions: HashMap<Namespace, Vec<(String, DestinationRow)>> = HashMap::new();
        for key in keys {
            let Some(namespace) = Namespace::from_cache_key(&key) else {
                warn!(key, "Queue entry has an unrecognized prefix");
                report.dead_letters.push(DeadLetter {
                    key,
                    namespace: None,
                    error: "unrecognized key prefix".to_string(),
                });
                continue;
            };

            match self.cache.get_record(namespace, &key).await {
                Ok(Some(payload)) => {
                    let id = record_identity(namespace, &key, &payload);
                    partitions
                        .entry(namespace)
                        .or_default()
                        .push((key, DestinationRow::new(id, payload)));
                }
                Ok(None) => {
                    // Expired between enqueue and drain
                    warn!(%namespace, key, "Cached record expired before upload");
                    crate::metrics::record_lost_record();
                    report.lost_records.push(key);
                }
                Err(e) => {
                    warn!(%namespace, key, error = %e, "Failed to read cached record");
                    report.dead_letters.push(DeadLetter {
                        key,
                        namespace: Some(namespace),
                        error: e.to_string(),
                    });
                }
            }
        }

        for namespace in Namespace::all() {
            let Some(entries) = partitions.remove(&namespace) else {
                continue;
            };
            self.upload_partition(namespace, entries, &mut report).await;
        }

        info!(
            uploaded = report.total_uploaded(),
            lost = report.lost_records.len(),
            dead_letters = report.dead_letters.len(),
            deleted = report.deleted,
            "Upload run finished"
        );
        Ok(report)
    }

    /// Deliver one namespace partition; failures stay inside the partition.
    async fn upload_partition(
        &self,
        namespace: Namespace,
        entries: Vec<(String, DestinationRow)>,
        report: &mut UploadReport,
    ) {
        let (keys, rows): (Vec<String>, Vec<DestinationRow>) = entries.into_iter().unzip();
        let operation = match namespace {
            Namespace::Transaction => "upload_transactions",
            Namespace::Prediction => "upload_predictions",
        };

        let started = std::time::Instant::now();
        let result = self
            .retry
            .run(operation, || self.store.load(namespace, rows.clone()))
            .await;
        crate::metrics::record_load_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(inserted) => {
                let delivered = rows.len() as u64;
                debug!(%namespace, delivered, newly_inserted = inserted, "Partition uploaded");
                crate::metrics::record_upload_rows(namespace, delivered);
                match namespace {
                    Namespace::Transaction => report.transactions_uploaded += delivered,
                    Namespace::Prediction => report.predictions_uploaded += delivered,
                }

                if self.config.delete_after_upload {
                    match self.cache.remove_records(namespace, &keys).await {
                        Ok(deleted) => report.deleted += deleted,
                        // Not a failure; the TTL reclaims the entries
                        Err(e) => {
                            warn!(%namespace, error = %e, "Post-upload cache cleanup failed")
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    %namespace,
                    entries = keys.len(),
                    error = %e,
                    "Partition failed after retries, dead-lettering"
                );
                crate::metrics::record_dead_letters(namespace, keys.len() as u64);
                for key in keys {
                    report.dead_letters.push(DeadLetter {
                        key,
                        namespace: Some(namespace),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Destination dedup key for a cached record.
///
/// Prefers the identifying triple from the payload. Live prediction records
/// carry `prediction_id`; some older producers used `transaction_id` for
/// both. When the payload lacks usable identity fields the namespaced cache
/// key itself is digested; that key carries no date component, so an
/// identity-free payload reusing a daily-reset upstream id collapses to one
/// row across days. Producers are expected to send the identity fields.
fn record_identity(
    namespace: Namespace,
    key: &str,
    payload: &serde_json::Value,
) -> UniqueRecordId {
    if let Some(obj) = payload.as_object() {
        let id = match namespace {
            Namespace::Transaction => obj.get("transaction_id"),
            Namespace::Prediction => obj.get("prediction_id").or_else(|| obj.get("transaction_id")),
        }
        .and_then(|v| v.as_str());
        let customer = obj.get("customer_id").and_then(|v| v.as_str());
        let timestamp = [
            "transaction_timestamp",
            "prediction_timestamp",
            "timestamp",
            "_timestamp",
        ]
        .iter()
        .find_map(|field| obj.get(*field).and_then(|v| v.as_str()));

        if let (Some(id), Some(customer), Some(timestamp)) = (id, customer, timestamp) {
            // Normalize so the live and backfill paths digest identically
            let normalized = crate::parse_timestamp(timestamp).map(|dt| dt.to_rfc3339());
            return UniqueRecordId::from_parts(
                id,
                customer,
                normalized.as_deref().unwrap_or(timestamp),
            );
        }
    }
    UniqueRecordId::from_parts(key, "", "")
}
