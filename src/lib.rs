//! # BNPL Data Pipeline Library
//!
//! Moves semi-structured BNPL transaction and prediction events from two
//! ephemeral sources into a durable analytical store with at-least-once
//! delivery, destination-side deduplication, and crash-safe resumability:
//!
//! - **Live path**: serving application → [`cache::WriteThroughCache`] →
//!   [`uploader::BatchUploader`] → destination store
//! - **Backfill path**: external API → [`ingest::HistoricalIngestionEngine`] →
//!   destination store, with a durable [`ingest::ProgressCheckpoint`]
//!
//! Both paths converge on the same [`store::DestinationStore`] contract and
//! the same [`UniqueRecordId`] deduplication strategy.
//!
//! ## Architecture
//!
//! - [`retry`] - Bounded exponential backoff shared by every network call
//! - [`api`] - Historical API client with SSE stream parsing
//! - [`cache`] - Namespace-partitioned write-through cache with upload queue
//! - [`store`] - Destination store contract and adapters
//! - [`uploader`] - Queue-driven batch drain into the store
//! - [`ingest`] - Resumable date-range ingestion with volume modeling
//! - [`cli`] - Operational entry points (backfill, upload, health)
//!
//! ## Deduplication
//!
//! The upstream transaction identifier is reset daily, so it is not usable as
//! a primary key. [`UniqueRecordId`] digests `(upstream id, customer id,
//! event timestamp)` into the true destination-side key; re-delivering the
//! same logical event is always a no-op upsert.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Historical API client
pub mod api;

/// Write-through cache with pending-upload queue
pub mod cache;

/// CLI command implementations
pub mod cli;

/// Resumable historical ingestion
pub mod ingest;

/// Prometheus metrics
pub mod metrics;

/// Bounded exponential backoff
pub mod retry;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Destination store contract and adapters
pub mod store;

/// Queue-driven batch uploader
pub mod uploader;

/// Logical partition within the shared cache key space and the destination
/// store (one logical table per namespace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// BNPL transaction events (`tx:{id}`)
    Transaction,
    /// Model prediction events (`pred:{id}`)
    Prediction,
}

impl Namespace {
    /// Key prefix used in the cache key space.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Namespace::Transaction => "tx",
            Namespace::Prediction => "pred",
        }
    }

    /// Logical database index in the backing key/value store.
    pub fn db_index(&self) -> u8 {
        match self {
            Namespace::Transaction => 0,
            Namespace::Prediction => 1,
        }
    }

    /// Build a namespaced cache key for an upstream identifier.
    pub fn cache_key(&self, id: &str) -> String {
        format!("{}:{}", self.key_prefix(), id)
    }

    /// Classify a cache key by its prefix.
    pub fn from_cache_key(key: &str) -> Option<Namespace> {
        let prefix = key.split_once(':')?.0;
        match prefix {
            "tx" => Some(Namespace::Transaction),
            "pred" => Some(Namespace::Prediction),
            _ => None,
        }
    }

    /// Both namespaces, in partition order.
    pub fn all() -> [Namespace; 2] {
        [Namespace::Transaction, Namespace::Prediction]
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Transaction => write!(f, "transaction"),
            Namespace::Prediction => write!(f, "prediction"),
        }
    }
}

/// Record validation errors. A single invalid record fails its entire
/// calendar date during historical ingestion.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Record is not a JSON object
    #[error("record is not a JSON object")]
    NotAnObject,

    /// Required field missing or empty
    #[error("missing or empty required field '{field}'")]
    MissingField {
        /// Name of the offending field
        field: &'static str,
    },

    /// Timestamp present but unparseable
    #[error("invalid timestamp '{value}'")]
    InvalidTimestamp {
        /// The raw timestamp value
        value: String,
    },

    /// Amount present but not numeric
    #[error("invalid amount '{value}'")]
    InvalidAmount {
        /// The raw amount value
        value: String,
    },
}

/// Deterministic digest identifying one logical event at the destination.
///
/// Computed over `(upstream id, customer id, event timestamp)` because the
/// upstream transaction identifier is reused across calendar days. Identical
/// logical events always produce identical ids, which is what makes
/// at-least-once delivery safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueRecordId(String);

impl UniqueRecordId {
    /// Digest the identifying triple into a stable hex id.
    pub fn from_parts(upstream_id: &str, customer_id: &str, timestamp: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(upstream_id.as_bytes());
        hasher.update(b"|");
        hasher.update(customer_id.as_bytes());
        hasher.update(b"|");
        hasher.update(timestamp.as_bytes());
        UniqueRecordId(format!("{:x}", hasher.finalize()))
    }

    /// Hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated historical record, still carrying its complete raw payload.
///
/// Only the four business-critical fields are extracted; everything else the
/// upstream API sends rides along verbatim in `raw` and lands in the
/// destination row's opaque JSON column.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Upstream transaction identifier (reset daily upstream)
    pub transaction_id: String,
    /// Customer identifier
    pub customer_id: String,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Transaction amount
    pub amount: Decimal,
    /// Complete raw record as received
    pub raw: serde_json::Value,
}

impl EventRecord {
    /// Validate a raw API record and extract the core fields.
    ///
    /// Requires non-empty `transaction_id` and `customer_id`, a parseable
    /// `timestamp`, and a numeric `amount`.
    pub fn from_raw(raw: serde_json::Value) -> Result<EventRecord, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let transaction_id = require_string(obj, "transaction_id")?;
        let customer_id = require_string(obj, "customer_id")?;

        let ts_raw = obj
            .get("timestamp")
            .and_then(|v| v.as_str())
            .ok_or(ValidationError::MissingField { field: "timestamp" })?;
        let timestamp = parse_timestamp(ts_raw).ok_or_else(|| ValidationError::InvalidTimestamp {
            value: ts_raw.to_string(),
        })?;

        let amount_value = obj
            .get("amount")
            .ok_or(ValidationError::MissingField { field: "amount" })?;
        let amount = parse_amount(amount_value).ok_or_else(|| ValidationError::InvalidAmount {
            value: amount_value.to_string(),
        })?;

        Ok(EventRecord {
            transaction_id,
            customer_id,
            timestamp,
            amount,
            raw,
        })
    }

    /// Deterministic destination-side primary key for this record.
    pub fn record_id(&self) -> UniqueRecordId {
        UniqueRecordId::from_parts(
            &self.transaction_id,
            &self.customer_id,
            &self.timestamp.to_rfc3339(),
        )
    }
}

fn require_string(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match obj.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ValidationError::MissingField { field }),
    }
}

/// Parse an event timestamp from RFC 3339, tolerating a missing timezone
/// designator (assumed UTC), matching what the upstream API emits.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

/// Parse an amount that may arrive as a JSON number or a numeric string.
///
/// Decoded through [`Decimal`] rather than `f64` to preserve financial
/// precision end to end.
pub fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) if !s.trim().is_empty() => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> serde_json::Value {
        json!({
            "transaction_id": "tx_000123",
            "customer_id": "cust_789",
            "timestamp": "2024-06-15T14:30:00Z",
            "amount": 299.99,
            "currency": "USD",
            "device_type": "mobile"
        })
    }

    #[test]
    fn test_valid_record_extracts_core_fields() {
        let record = EventRecord::from_raw(sample_record()).unwrap();
        assert_eq!(record.transaction_id, "tx_000123");
        assert_eq!(record.customer_id, "cust_789");
        assert_eq!(record.amount, Decimal::from_str("299.99").unwrap());
        // Raw payload is preserved verbatim, extra fields included
        assert_eq!(record.raw["device_type"], "mobile");
    }

    #[test]
    fn test_missing_amount_rejected() {
        let mut raw = sample_record();
        raw.as_object_mut().unwrap().remove("amount");
        let err = EventRecord::from_raw(raw).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field: "amount" }));
    }

    #[test]
    fn test_empty_transaction_id_rejected() {
        let mut raw = sample_record();
        raw["transaction_id"] = json!("   ");
        let err = EventRecord::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingField {
                field: "transaction_id"
            }
        ));
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let mut raw = sample_record();
        raw["timestamp"] = json!("June 15th");
        let err = EventRecord::from_raw(raw).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_non_numeric_amount_rejected() {
        let mut raw = sample_record();
        raw["amount"] = json!("lots");
        let err = EventRecord::from_raw(raw).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAmount { .. }));
    }

    #[test]
    fn test_timestamp_without_timezone_assumed_utc() {
        let ts = parse_timestamp("2024-06-15T14:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-06-15T14:30:00+00:00");
    }

    #[test]
    fn test_unique_record_id_deterministic() {
        let a = UniqueRecordId::from_parts("tx_1", "cust_1", "2024-06-15T14:30:00+00:00");
        let b = UniqueRecordId::from_parts("tx_1", "cust_1", "2024-06-15T14:30:00+00:00");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_unique_record_id_distinguishes_reused_upstream_ids() {
        // Upstream resets transaction ids daily; only the timestamp differs.
        let monday = UniqueRecordId::from_parts("tx_1", "cust_1", "2024-06-10T09:00:00+00:00");
        let tuesday = UniqueRecordId::from_parts("tx_1", "cust_1", "2024-06-11T09:00:00+00:00");
        assert_ne!(monday, tuesday);
    }

    #[test]
    fn test_namespace_cache_keys() {
        assert_eq!(Namespace::Transaction.cache_key("abc"), "tx:abc");
        assert_eq!(Namespace::Prediction.cache_key("abc"), "pred:abc");
        assert_eq!(Namespace::from_cache_key("tx:abc"), Some(Namespace::Transaction));
        assert_eq!(Namespace::from_cache_key("pred:x"), Some(Namespace::Prediction));
        assert_eq!(Namespace::from_cache_key("other:x"), None);
        assert_eq!(Namespace::from_cache_key("noprefix"), None);
    }
}
