//! HTTP client for the historical BNPL API.

use super::{ApiError, RecordSource};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for [`BnplApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the API
    pub base_url: String,
    /// Per-request timeout
    pub timeout: std::time::Duration,
    /// Minimum delay between consecutive requests
    pub min_request_interval: std::time::Duration,
    /// Largest daily volume the client will request
    pub max_daily_volume: u64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://simtom-production.up.railway.app".to_string(),
            timeout: std::time::Duration::from_secs(30),
            min_request_interval: std::time::Duration::from_millis(100),
            max_daily_volume: 50_000,
        }
    }
}

/// Client for the historical data API with throttling and retry.
pub struct BnplApiClient {
    http: reqwest::Client,
    config: ApiClientConfig,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl BnplApiClient {
    /// Build a client; fails only on an unusable TLS/connector setup.
    pub fn new(config: ApiClientConfig, retry: RetryPolicy) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("bnpl-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            retry,
            last_request: Mutex::new(None),
        })
    }

    /// Fetch all records for an inclusive date window.
    pub async fn fetch_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        target_volume: u64,
        seed: u64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.validate_request(start_date, end_date, target_volume)?;

        self.retry
            .run("fetch_bnpl_window", || {
                self.fetch_once(start_date, end_date, target_volume, seed)
            })
            .await
    }

    /// Minimal connectivity probe: one record for a fixed date.
    pub async fn probe(&self) -> bool {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        match self.fetch_once(date, date, 1, 0).await {
            Ok(records) => {
                info!(records = records.len(), "API connectivity probe succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "API connectivity probe failed");
                false
            }
        }
    }

    fn validate_request(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        target_volume: u64,
    ) -> Result<(), ApiError> {
        if end_date < start_date {
            return Err(ApiError::InvalidRequest(format!(
                "end date {end_date} precedes start date {start_date}"
            )));
        }
        let this_year = Utc::now().year();
        if start_date.year() < 2020 || end_date.year() > this_year + 1 {
            return Err(ApiError::InvalidRequest(format!(
                "date range {start_date}..{end_date} is implausible"
            )));
        }
        if target_volume == 0 || target_volume > self.config.max_daily_volume {
            return Err(ApiError::InvalidRequest(format!(
                "target volume {target_volume} outside 1..={}",
                self.config.max_daily_volume
            )));
        }
        Ok(())
    }

    /// Enforce the minimum inter-request delay.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_once(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        target_volume: u64,
        seed: u64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.throttle().await;

        let url = format!("{}/stream/bnpl", self.config.base_url.trim_end_matches('/'));
        let payload = json!({
            "start_date": start_date.to_string(),
            "end_date": end_date.to_string(),
            "base_daily_volume": target_volume,
            "seed": seed,
        });

        debug!(%start_date, %end_date, target_volume, "Requesting BNPL records");

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let records = parse_stream_body(&body)?;
        debug!(records = records.len(), %start_date, %end_date, "Retrieved BNPL records");
        Ok(records)
    }
}

/// Decode a response body that is either SSE-framed (`data: {...}` lines) or
/// plain JSON (array or single object). Invalid SSE lines are skipped; an
/// entirely unusable body is an error.
fn parse_stream_body(body: &str) -> Result<Vec<serde_json::Value>, ApiError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ApiError::EmptyResponse);
    }

    if body.contains("data: ") {
        let mut records = Vec::new();
        for line in body.lines() {
            let Some(payload) = line.trim().strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str(payload) {
                Ok(value) => records.push(value),
                Err(e) => warn!(error = %e, "Skipping invalid SSE record"),
            }
        }
        if records.is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        return Ok(records);
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(records)) => {
            if records.is_empty() {
                Err(ApiError::EmptyResponse)
            } else {
                Ok(records)
            }
        }
        Ok(value) => Ok(vec![value]),
        Err(e) => Err(ApiError::Parse(e.to_string())),
    }
}

#[async_trait]
impl RecordSource for BnplApiClient {
    async fn fetch_day(
        &self,
        date: NaiveDate,
        target_volume: u64,
        seed: u64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.fetch_window(date, date, target_volume, seed).await
    }
}
