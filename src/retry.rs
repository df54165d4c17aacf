//! Bounded exponential backoff shared by every network-facing operation.
//!
//! No component implements its own ad hoc retry loop; the API client, the
//! batch uploader's destination writes, and the historical engine's bulk
//! loads all go through [`RetryPolicy::run`].

use crate::shutdown::SharedShutdown;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification hook for retryable errors.
///
/// Permanent failures (validation, client-side errors) surface immediately;
/// transient ones (timeouts, 429s, momentary store unavailability) are
/// retried until attempts exhaust.
pub trait Transient {
    /// Whether this error is worth retrying.
    fn is_transient(&self) -> bool;
}

/// Bounded exponential backoff executor.
///
/// Delay for attempt `n` is `min(base_delay * 2^n, max_delay)` plus a random
/// jitter of up to ±`jitter` of the computed delay. Defaults: 3 attempts,
/// 500 ms base, 30 s cap, 20 % jitter; all tunable, see the tests for the
/// resulting schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    shutdown: Option<SharedShutdown>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30), 0.2)
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts total attempts, not retries;
    /// `jitter` is a fraction of the computed delay (0.0 disables it).
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
            shutdown: None,
        }
    }

    /// Override the attempt budget, keeping the delay schedule.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attach a shutdown handle; backoff sleeps abort early when shutdown is
    /// requested so cancellation stays prompt.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Total attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic portion of the backoff schedule (before jitter).
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }

    /// Run a fallible async operation under this policy.
    ///
    /// Returns the first success, or the final error once attempts are
    /// exhausted or the error reports itself as permanent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_transient() {
                        warn!(operation, error = %err, "Permanent error, not retrying");
                        return Err(err);
                    }
                    if attempt >= self.max_attempts {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.jittered_backoff(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after backoff delay"
                    );
                    crate::metrics::record_retry(operation);
                    if !self.sleep(delay).await {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Sleep for the backoff window; returns false if shutdown interrupted it.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_requested() {
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown.wait() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
