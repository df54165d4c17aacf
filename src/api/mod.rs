//! Historical BNPL API client.
//!
//! The external API serves one date window of raw records per request as an
//! SSE-framed stream. The ingestion engine consumes it through the
//! [`RecordSource`] seam so tests can substitute a deterministic fake.

use crate::retry::Transient;
use async_trait::async_trait;
use chrono::NaiveDate;

pub mod client;

pub use client::{ApiClientConfig, BnplApiClient};

/// API client errors. Rate-limit and timeout failures are kept distinct from
/// validation and parse failures so the retry policy only retries what can
/// actually recover.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Upstream returned 429
    #[error("rate limit exceeded")]
    RateLimited,

    /// Request exceeded its timeout
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Upstream returned no usable records
    #[error("no valid records received")]
    EmptyResponse,

    /// Request parameters rejected before sending
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Transient for ApiError {
    fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited | ApiError::Timeout | ApiError::Network(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Parse(_) | ApiError::EmptyResponse | ApiError::InvalidRequest(_) => false,
        }
    }
}

/// Source of one day's worth of raw historical records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch a single calendar date's records at the modeled target volume.
    ///
    /// Each record carries at least `transactionId`, `customerId`,
    /// `timestamp`, and `amount`, plus an open-ended set of extra fields.
    async fn fetch_day(
        &self,
        date: NaiveDate,
        target_volume: u64,
        seed: u64,
    ) -> Result<Vec<serde_json::Value>, ApiError>;
}
