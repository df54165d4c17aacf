//! Operational metrics for the pipeline.
//!
//! Uses the `metrics` crate with a Prometheus scrape endpoint. Everything
//! degrades gracefully: if [`init_metrics`] is never called the recording
//! macros are no-ops, so library users pay nothing.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::info;

static METRICS_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the Prometheus exporter and register metric descriptions.
///
/// Idempotent; called once at startup when `--metrics-addr` is given.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "retry_attempts_total",
        Unit::Count,
        "Retry attempts performed by the shared backoff policy"
    );
    describe_counter!(
        "records_ingested_total",
        Unit::Count,
        "Historical records committed to the destination store"
    );
    describe_counter!(
        "ingest_batches_failed_total",
        Unit::Count,
        "Multi-day batch windows that exhausted retries"
    );
    describe_counter!(
        "upload_rows_total",
        Unit::Count,
        "Rows uploaded from the cache queue, by namespace"
    );
    describe_counter!(
        "upload_dead_letters_total",
        Unit::Count,
        "Records moved to the dead-letter list, by namespace"
    );
    describe_counter!(
        "upload_lost_records_total",
        Unit::Count,
        "Queue entries whose cache record expired before drain"
    );
    describe_counter!(
        "cache_write_failures_total",
        Unit::Count,
        "Cache writes that degraded to uncached operation"
    );
    describe_histogram!(
        "store_load_duration_seconds",
        Unit::Seconds,
        "Bulk destination-store load duration"
    );

    let _ = METRICS_INITIALIZED.set(());
    info!(%addr, "Metrics system initialized");
    Ok(())
}

/// Record one retry attempt for an operation.
pub fn record_retry(operation: &str) {
    counter!("retry_attempts_total", "operation" => operation.to_string()).increment(1);
}

/// Record historical records committed to the store.
pub fn record_records_ingested(count: u64) {
    counter!("records_ingested_total").increment(count);
}

/// Record a batch window that exhausted retries.
pub fn record_batch_failed() {
    counter!("ingest_batches_failed_total").increment(1);
}

/// Record rows uploaded for a namespace partition.
pub fn record_upload_rows(namespace: crate::Namespace, count: u64) {
    counter!("upload_rows_total", "namespace" => namespace.to_string()).increment(count);
}

/// Record dead-lettered entries for a namespace partition.
pub fn record_dead_letters(namespace: crate::Namespace, count: u64) {
    counter!("upload_dead_letters_total", "namespace" => namespace.to_string()).increment(count);
}

/// Record a queue entry whose cached record had already expired.
pub fn record_lost_record() {
    counter!("upload_lost_records_total").increment(1);
}

/// Record a cache write that fell back to uncached operation.
pub fn record_cache_write_failure(namespace: crate::Namespace) {
    counter!("cache_write_failures_total", "namespace" => namespace.to_string()).increment(1);
}

/// Record the duration of one bulk store load.
pub fn record_load_duration(seconds: f64) {
    histogram!("store_load_duration_seconds").record(seconds);
}
