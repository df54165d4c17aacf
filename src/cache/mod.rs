//! Namespace-partitioned write-through cache with a pending-upload queue.
//!
//! The serving application writes transactions and predictions through
//! [`WriteThroughCache`]; every successful write also appends the key to a
//! FIFO upload queue that [`crate::uploader::BatchUploader`] drains on a
//! schedule. The storage itself sits behind the [`CacheBackend`] port:
//! [`memory::MemoryBackend`] for tests and embedded use,
//! [`redis::RedisBackend`] for the shared deployment.

use crate::Namespace;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub mod memory;
pub mod redis;
pub mod write_through;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;
pub use write_through::{CacheHealth, HealthStatus, WriteThroughCache, WriteThroughConfig};

/// Default TTL for cached records: 7 days, matching the daily upload cadence
/// with generous slack.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Name of the pending-upload queue in the backing store.
pub const UPLOAD_QUEUE_KEY: &str = "upload_queue";

/// Cache errors (surfaced by backends; the write path converts them into
/// graceful degradation, never propagating to the serving application).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backend unreachable or command failed
    #[error("cache backend error: {0}")]
    Backend(String),

    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Read-only cache diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Live keys in the transaction namespace
    pub transaction_keys: u64,
    /// Live keys in the prediction namespace
    pub prediction_keys: u64,
    /// Entries waiting in the upload queue
    pub queue_length: u64,
    /// Approximate memory used by the backend
    pub approx_memory_bytes: u64,
}

/// Storage port for the write-through cache.
///
/// Implementations must keep `queue_push`/`queue_drain` atomic with respect
/// to each other: a drain observes a consistent FIFO prefix and never loses
/// or duplicates a concurrently-appended entry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value under a namespaced key with an expiry. Full replace,
    /// never a partial merge.
    async fn set_with_ttl(
        &self,
        namespace: Namespace,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, namespace: Namespace, keys: &[String]) -> Result<u64, CacheError>;

    /// Append a key to the tail of the upload queue.
    async fn queue_push(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically remove and return up to `max` keys from the head of the
    /// upload queue. Entries beyond the cap stay queued.
    async fn queue_drain(&self, max: usize) -> Result<Vec<String>, CacheError>;

    /// Current queue depth.
    async fn queue_len(&self) -> Result<u64, CacheError>;

    /// Count of live keys in a namespace.
    async fn key_count(&self, namespace: Namespace) -> Result<u64, CacheError>;

    /// Approximate memory footprint of the backend.
    async fn memory_bytes(&self) -> Result<u64, CacheError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), CacheError>;
}
