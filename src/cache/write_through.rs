//! Write-through cache facade used by the serving application.
//!
//! The write calls deliberately return `bool` instead of `Result`: a cache
//! outage must never take down the serving path, so any failure degrades to
//! an uncached (and logged) write rather than an error the caller has to
//! handle.

use super::{CacheBackend, CacheError, CacheStats, DEFAULT_TTL};
use crate::Namespace;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables for the write-through cache.
#[derive(Debug, Clone)]
pub struct WriteThroughConfig {
    /// Entry expiry; 7 days by default.
    pub ttl: Duration,
    /// Ping latency above which the health probe reports `Degraded`.
    pub degraded_latency: Duration,
    /// Upper bound on how long the health probe waits for a ping.
    pub probe_timeout: Duration,
}

impl Default for WriteThroughConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            degraded_latency: Duration::from_millis(250),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Liveness probe outcome. Never an error: failures degrade the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Backend reachable within the latency budget
    Healthy,
    /// Backend slow or unreachable
    Degraded,
}

/// Health probe report.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// Probe outcome
    pub status: HealthStatus,
    /// Measured ping round-trip
    pub latency_ms: u64,
}

/// Namespace-partitioned write-through cache with a pending-upload queue.
pub struct WriteThroughCache {
    backend: Arc<dyn CacheBackend>,
    config: WriteThroughConfig,
}

impl WriteThroughCache {
    /// Wrap a backend with default configuration.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_config(backend, WriteThroughConfig::default())
    }

    /// Wrap a backend with explicit configuration.
    pub fn with_config(backend: Arc<dyn CacheBackend>, config: WriteThroughConfig) -> Self {
        Self { backend, config }
    }

    /// Cache a transaction and enqueue it for upload.
    ///
    /// Returns `false` on any failure; the caller keeps serving uncached.
    pub async fn cache_transaction(&self, id: &str, payload: &serde_json::Value) -> bool {
        self.cache_record(Namespace::Transaction, id, payload).await
    }

    /// Cache a prediction and enqueue it for upload. Same contract as
    /// [`Self::cache_transaction`].
    pub async fn cache_prediction(&self, id: &str, payload: &serde_json::Value) -> bool {
        self.cache_record(Namespace::Prediction, id, payload).await
    }

    async fn cache_record(
        &self,
        namespace: Namespace,
        id: &str,
        payload: &serde_json::Value,
    ) -> bool {
        let key = namespace.cache_key(id);
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(%namespace, key, error = %e, "Failed to serialize payload, skipping cache");
                crate::metrics::record_cache_write_failure(namespace);
                return false;
            }
        };

        // Write the entry before enqueueing its key: the queue must never
        // reference a key that was not present in the cache at enqueue time.
        if let Err(e) = self
            .backend
            .set_with_ttl(namespace, &key, body, self.config.ttl)
            .await
        {
            warn!(%namespace, key, error = %e, "Cache write failed, continuing uncached");
            crate::metrics::record_cache_write_failure(namespace);
            return false;
        }

        if let Err(e) = self.backend.queue_push(&key).await {
            // The entry is cached but not queued; TTL reclaims it.
            warn!(%namespace, key, error = %e, "Upload-queue append failed, continuing uncached");
            crate::metrics::record_cache_write_failure(namespace);
            return false;
        }

        debug!(%namespace, key, "Cached record");
        true
    }

    /// Fetch and decode a cached record by its namespaced key.
    pub async fn get_record(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        match self.backend.get(namespace, key).await? {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Atomically remove up to `max` keys from the head of the upload queue.
    pub async fn drain_queue(&self, max: usize) -> Result<Vec<String>, CacheError> {
        self.backend.queue_drain(max).await
    }

    /// Delete cached records after a successful upload.
    pub async fn remove_records(
        &self,
        namespace: Namespace,
        keys: &[String],
    ) -> Result<u64, CacheError> {
        self.backend.delete(namespace, keys).await
    }

    /// Read-only diagnostics.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            transaction_keys: self.backend.key_count(Namespace::Transaction).await?,
            prediction_keys: self.backend.key_count(Namespace::Prediction).await?,
            queue_length: self.backend.queue_len().await?,
            approx_memory_bytes: self.backend.memory_bytes().await?,
        })
    }

    /// Liveness probe; degrades instead of failing.
    pub async fn health_check(&self) -> CacheHealth {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.backend.ping()).await;
        let latency = started.elapsed();
        let latency_ms = latency.as_millis() as u64;

        let status = match outcome {
            Ok(Ok(())) if latency <= self.config.degraded_latency => HealthStatus::Healthy,
            Ok(Ok(())) => {
                warn!(latency_ms, "Cache ping slow");
                HealthStatus::Degraded
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Cache ping failed");
                HealthStatus::Degraded
            }
            Err(_) => {
                warn!(timeout_ms = self.config.probe_timeout.as_millis() as u64, "Cache ping timed out");
                HealthStatus::Degraded
            }
        };

        CacheHealth { status, latency_ms }
    }
}
