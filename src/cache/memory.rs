//! In-memory cache backend.
//!
//! Single-mutex map plus FIFO queue. Expiry is lazy (checked on read and
//! during counts) and driven by the tokio clock so tests can pause and
//! advance time. Also used as the embedded backend for dry runs.

use super::{CacheBackend, CacheError};
use crate::Namespace;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Entry>,
    predictions: HashMap<String, Entry>,
    queue: VecDeque<String>,
}

impl Inner {
    fn namespace_mut(&mut self, namespace: Namespace) -> &mut HashMap<String, Entry> {
        match namespace {
            Namespace::Transaction => &mut self.transactions,
            Namespace::Prediction => &mut self.predictions,
        }
    }
}

/// Process-local [`CacheBackend`].
///
/// The `fail_connectivity` toggle simulates an unreachable backend so the
/// write path's graceful-degradation contract can be exercised.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    failing: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated connectivity loss; while set, every operation fails.
    pub fn fail_connectivity(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_connectivity(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Backend("connection refused (simulated)".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a holder panicked; the map is still
        // structurally sound, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn set_with_ttl(
        &self,
        namespace: Namespace,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.check_connectivity()?;
        let mut inner = self.lock();
        inner.namespace_mut(namespace).insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, CacheError> {
        self.check_connectivity()?;
        let mut inner = self.lock();
        let now = Instant::now();
        let map = inner.namespace_mut(namespace);
        match map.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, namespace: Namespace, keys: &[String]) -> Result<u64, CacheError> {
        self.check_connectivity()?;
        let mut inner = self.lock();
        let map = inner.namespace_mut(namespace);
        let mut removed = 0;
        for key in keys {
            if map.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn queue_push(&self, key: &str) -> Result<(), CacheError> {
        self.check_connectivity()?;
        self.lock().queue.push_back(key.to_string());
        Ok(())
    }

    async fn queue_drain(&self, max: usize) -> Result<Vec<String>, CacheError> {
        self.check_connectivity()?;
        let mut inner = self.lock();
        let take = max.min(inner.queue.len());
        Ok(inner.queue.drain(..take).collect())
    }

    async fn queue_len(&self) -> Result<u64, CacheError> {
        self.check_connectivity()?;
        Ok(self.lock().queue.len() as u64)
    }

    async fn key_count(&self, namespace: Namespace) -> Result<u64, CacheError> {
        self.check_connectivity()?;
        let mut inner = self.lock();
        let now = Instant::now();
        let map = inner.namespace_mut(namespace);
        map.retain(|_, entry| entry.expires_at > now);
        Ok(map.len() as u64)
    }

    async fn memory_bytes(&self) -> Result<u64, CacheError> {
        self.check_connectivity()?;
        let inner = self.lock();
        let entries = inner.transactions.iter().chain(inner.predictions.iter());
        let mut bytes: u64 = 0;
        for (key, entry) in entries {
            bytes += (key.len() + entry.value.len()) as u64;
        }
        bytes += inner.queue.iter().map(|k| k.len() as u64).sum::<u64>();
        Ok(bytes)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_connectivity()
    }
}
