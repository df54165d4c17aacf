//! Redis cache backend.
//!
//! Namespaces map to separate logical databases (0 = transactions,
//! 1 = predictions), each with its own connection manager so no command ever
//! issues a racy `SELECT` on a shared connection. The upload queue lives in
//! the transaction database; `LPOP count` gives the capped drain as a single
//! atomic command, so concurrent drains can never observe overlapping
//! entries.

use super::{CacheBackend, CacheError, UPLOAD_QUEUE_KEY};
use crate::Namespace;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

fn backend_err(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

/// Redis-backed [`CacheBackend`].
pub struct RedisBackend {
    transactions: ConnectionManager,
    predictions: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis, establishing one managed connection per namespace
    /// database. The database suffix of `url`, if any, is overridden.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let base = url
            .into_connection_info()
            .map_err(|e| CacheError::Backend(format!("invalid redis url: {e}")))?;

        let mut connections = Vec::with_capacity(2);
        for namespace in Namespace::all() {
            let mut info = base.clone();
            info.redis.db = namespace.db_index() as i64;
            let client = redis::Client::open(info).map_err(backend_err)?;
            let manager = client.get_connection_manager().await.map_err(backend_err)?;
            debug!(%namespace, db = namespace.db_index(), "Connected to redis database");
            connections.push(manager);
        }
        let mut connections = connections.into_iter();
        Ok(Self {
            transactions: connections.next().expect("two connections"),
            predictions: connections.next().expect("two connections"),
        })
    }

    fn conn(&self, namespace: Namespace) -> ConnectionManager {
        match namespace {
            Namespace::Transaction => self.transactions.clone(),
            Namespace::Prediction => self.predictions.clone(),
        }
    }

    /// Queue commands always target the transaction database.
    fn queue_conn(&self) -> ConnectionManager {
        self.transactions.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn set_with_ttl(
        &self,
        namespace: Namespace,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut con = self.conn(namespace);
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        let _: () = con.set_ex(key, value, seconds).await.map_err(backend_err)?;
        Ok(())
    }

    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.conn(namespace);
        let value: Option<String> = con.get(key).await.map_err(backend_err)?;
        Ok(value)
    }

    async fn delete(&self, namespace: Namespace, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.conn(namespace);
        let removed: u64 = con.del(keys).await.map_err(backend_err)?;
        Ok(removed)
    }

    async fn queue_push(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.queue_conn();
        let _: () = con.rpush(UPLOAD_QUEUE_KEY, key).await.map_err(backend_err)?;
        Ok(())
    }

    async fn queue_drain(&self, max: usize) -> Result<Vec<String>, CacheError> {
        let count = match NonZeroUsize::new(max) {
            Some(count) => count,
            None => return Ok(Vec::new()),
        };
        let mut con = self.queue_conn();
        let drained: Vec<String> = con
            .lpop(UPLOAD_QUEUE_KEY, Some(count))
            .await
            .map_err(backend_err)?;
        Ok(drained)
    }

    async fn queue_len(&self) -> Result<u64, CacheError> {
        let mut con = self.queue_conn();
        let len: u64 = con.llen(UPLOAD_QUEUE_KEY).await.map_err(backend_err)?;
        Ok(len)
    }

    async fn key_count(&self, namespace: Namespace) -> Result<u64, CacheError> {
        let mut con = self.conn(namespace);
        let pattern = format!("{}:*", namespace.key_prefix());
        let mut count: u64 = 0;
        {
            let mut iter = con
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(backend_err)?;
            while iter.next_item().await.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn memory_bytes(&self) -> Result<u64, CacheError> {
        let mut con = self.queue_conn();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut con)
            .await
            .map_err(backend_err)?;
        Ok(parse_used_memory(&info).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut con = self.queue_conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

/// Extract `used_memory` from an `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
}
