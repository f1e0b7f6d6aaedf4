use anyhow::Context;
use std::time::Duration;

use crate::partition::RetryPolicy;

/// Runtime settings, read from the environment (optionally a `.env` file).
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub trino_url: String,
    pub trino_user: String,
    pub trino_catalog: String,
    pub partition_retry: RetryPolicy,
    pub http_port: u16,
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl SummaryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
        let trino_url = std::env::var("TRINO_URL").context("TRINO_URL must be set")?;

        let attempts = env_parsed::<u32>("HIVE_PARTITION_DELETE_RETRIES")
            .filter(|v| *v > 0)
            .unwrap_or(RetryPolicy::DEFAULT_ATTEMPTS);
        let delay_ms = env_parsed::<u64>("HIVE_PARTITION_DELETE_RETRY_DELAY_MS").unwrap_or(0);

        Ok(Self {
            database_url,
            db_max_connections: env_parsed::<u32>("DB_MAX_CONNECTIONS")
                .filter(|v| *v > 0)
                .unwrap_or(5),
            redis_url,
            trino_url,
            trino_user: env_or("TRINO_USER", "admin"),
            trino_catalog: env_or("TRINO_CATALOG", "hive"),
            partition_retry: RetryPolicy::new(attempts, Duration::from_millis(delay_ms)),
            http_port: env_parsed::<u16>("SUMMARY_HTTP_PORT").unwrap_or(8006),
        })
    }
}
