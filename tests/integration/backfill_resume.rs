//! Integration tests for backfill resumability and crash safety.

use async_trait::async_trait;
use bnpl_pipeline::api::{ApiError, RecordSource};
use bnpl_pipeline::ingest::{
    HistoricalIngestionEngine, IngestionConfig, IngestionStatus, ProgressCheckpoint,
};
use bnpl_pipeline::retry::RetryPolicy;
use bnpl_pipeline::store::{DestinationRow, DestinationStore, MemoryStore, StoreError};
use bnpl_pipeline::Namespace;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Emits a fixed, deterministic set of records per date so reruns fetch the
/// exact same data.
struct DeterministicSource;

#[async_trait]
impl RecordSource for DeterministicSource {
    async fn fetch_day(
        &self,
        date: NaiveDate,
        target_volume: u64,
        _seed: u64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        Ok((0..target_volume.min(20))
            .map(|i| {
                json!({
                    "transaction_id": format!("tx_{i:04}"),
                    "customer_id": format!("cust_{}", i % 5),
                    "timestamp": format!("{date}T09:{:02}:00Z", i % 60),
                    "amount": 42.50,
                })
            })
            .collect())
    }
}

/// Fails the nth `load` call with a transient error, then recovers.
struct FailNthStore {
    inner: MemoryStore,
    calls: AtomicU32,
    fail_on: u32,
}

impl FailNthStore {
    fn new(fail_on: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            calls: AtomicU32::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl DestinationStore for FailNthStore {
    async fn load(&self, table: Namespace, rows: Vec<DestinationRow>) -> Result<u64, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        self.inner.load(table, rows).await
    }
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1), 0.0)
}

fn config(dir: &TempDir) -> IngestionConfig {
    let mut cfg = IngestionConfig::new(
        date("2024-03-04"),
        date("2024-03-09"),
        dir.path().join("progress.json"),
    );
    cfg.base_daily_volume = 10;
    cfg.batch_days = 2;
    cfg
}

#[tokio::test]
async fn test_interrupted_backfill_resumes_to_the_same_totals() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(DeterministicSource);

    // First run: the second batch window hits a store outage
    let store = Arc::new(FailNthStore::new(2));
    let engine = HistoricalIngestionEngine::new(config(&dir), source.clone(), store.clone())
        .with_retry(no_retry());
    let first = engine.run().await.unwrap();
    assert_eq!(first.status, IngestionStatus::Partial);
    assert_eq!(first.batches_failed, 1);

    let cp = ProgressCheckpoint::load(&dir.path().join("progress.json")).unwrap();
    assert_eq!(cp.failed_dates.len(), 2);

    // Second run against the recovered store fills the gap and nothing else
    let engine = HistoricalIngestionEngine::new(config(&dir), source, store.clone());
    let second = engine.run().await.unwrap();
    assert_eq!(second.status, IngestionStatus::Completed);

    let cp = ProgressCheckpoint::load(&dir.path().join("progress.json")).unwrap();
    assert_eq!(cp.completed_dates.len(), 6);
    assert!(cp.failed_dates.is_empty());
    // Checkpoint totals agree with what the store actually holds
    assert_eq!(
        cp.total_records_ingested,
        store.inner.row_count(Namespace::Transaction)
    );
}

#[tokio::test]
async fn test_rerunning_a_completed_range_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(DeterministicSource);
    let store = Arc::new(MemoryStore::new());

    let engine = HistoricalIngestionEngine::new(config(&dir), source.clone(), store.clone());
    let first = engine.run().await.unwrap();
    assert_eq!(first.status, IngestionStatus::Completed);
    let rows_after_first = store.row_count(Namespace::Transaction);

    let engine = HistoricalIngestionEngine::new(config(&dir), source, store.clone());
    let second = engine.run().await.unwrap();
    assert_eq!(second.records_ingested, 0);
    assert_eq!(store.row_count(Namespace::Transaction), rows_after_first);
}

#[tokio::test]
async fn test_corrupt_checkpoint_stops_the_run() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("progress.json"), "{definitely not json").unwrap();

    let engine = HistoricalIngestionEngine::new(
        config(&dir),
        Arc::new(DeterministicSource),
        Arc::new(MemoryStore::new()),
    );
    assert!(engine.run().await.is_err());
}

#[tokio::test]
async fn test_checkpoint_survives_partial_progress_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FailNthStore::new(3));
    let engine = HistoricalIngestionEngine::new(
        config(&dir),
        Arc::new(DeterministicSource),
        store,
    )
    .with_retry(no_retry());
    engine.run().await.unwrap();

    // A fresh process sees exactly the committed dates, nothing in-flight
    let cp = ProgressCheckpoint::load(&dir.path().join("progress.json")).unwrap();
    assert_eq!(cp.completed_dates.len() + cp.failed_dates.len(), 6);
    for d in &cp.completed_dates {
        assert!(!cp.failed_dates.contains(d));
    }
}
