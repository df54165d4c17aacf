//! Health command implementation.

use super::{Cli, CliError, OutputFormat};
use crate::api::{ApiClientConfig, BnplApiClient};
use crate::cache::{CacheStats, HealthStatus, RedisBackend, WriteThroughCache};
use crate::retry::RetryPolicy;
use crate::shutdown::SharedShutdown;
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Arguments for the health command.
#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Redis connection URL
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Override the historical API base URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Skip the API connectivity probe
    #[arg(long, default_value_t = false)]
    pub skip_api: bool,
}

impl HealthArgs {
    /// Probe the cache and the historical API, reporting both.
    ///
    /// Exits nonzero when any probed dependency is degraded so the command
    /// slots directly into monitoring.
    pub async fn execute(&self, cli: &Cli, _shutdown: SharedShutdown) -> Result<(), CliError> {
        let (cache_status, latency_ms, stats) = self.probe_cache().await;

        let api_ok = if self.skip_api {
            None
        } else {
            Some(self.probe_api(cli).await)
        };

        print_health(cli.output_format, cache_status, latency_ms, &stats, api_ok);

        if cache_status == HealthStatus::Degraded {
            return Err(CliError::Unhealthy("cache degraded".to_string()));
        }
        if api_ok == Some(false) {
            return Err(CliError::Unhealthy("API unreachable".to_string()));
        }
        Ok(())
    }

    async fn probe_cache(&self) -> (HealthStatus, u64, Option<CacheStats>) {
        let backend = match RedisBackend::connect(&self.redis_url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!(error = %e, "Cache unreachable");
                return (HealthStatus::Degraded, 0, None);
            }
        };
        let cache = WriteThroughCache::new(backend);
        let health = cache.health_check().await;
        let stats = match cache.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Cache stats unavailable");
                None
            }
        };
        (health.status, health.latency_ms, stats)
    }

    async fn probe_api(&self, cli: &Cli) -> bool {
        let mut config = ApiClientConfig::default();
        if let Some(url) = &self.api_url {
            config.base_url = url.clone();
        }
        let retry = RetryPolicy::default().with_max_attempts(cli.max_retries);
        match BnplApiClient::new(config, retry) {
            Ok(client) => client.probe().await,
            Err(e) => {
                warn!(error = %e, "Failed to build API client");
                false
            }
        }
    }
}

fn print_health(
    format: OutputFormat,
    cache_status: HealthStatus,
    latency_ms: u64,
    stats: &Option<CacheStats>,
    api_ok: Option<bool>,
) {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "cache": {
                    "status": cache_status,
                    "latency_ms": latency_ms,
                    "stats": stats,
                },
                "api_reachable": api_ok,
            });
            println!("{value}");
        }
        OutputFormat::Human => {
            println!("Cache: {cache_status:?} ({latency_ms} ms)");
            if let Some(stats) = stats {
                println!(
                    "  {} transaction keys, {} prediction keys, {} queued, ~{} bytes",
                    stats.transaction_keys,
                    stats.prediction_keys,
                    stats.queue_length,
                    stats.approx_memory_bytes
                );
            }
            match api_ok {
                Some(true) => println!("API: reachable"),
                Some(false) => println!("API: unreachable"),
                None => println!("API: probe skipped"),
            }
        }
    }
}
