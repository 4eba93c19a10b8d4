//! Environment-driven configuration (spec.md §6), following the
//! `dotenvy` + `anyhow::Context` idiom used across the pack rather than a
//! settings-object crate.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::dispatcher::{
    DispatcherConfig, DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_WORKERS, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETRY_BACKOFF_BASE,
};
use crate::job::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub use_redis: bool,
    pub max_workers: usize,
    pub max_retries: i32,
    pub retry_backoff_base: f64,
    pub job_timeout_seconds: u64,
    pub poll_interval_seconds: f64,
}

impl Config {
    /// Load configuration from environment variables, reading a `.env`
    /// file first if present. Only `DATABASE_URL` is required; everything
    /// else has the default spec.md §6 calls for.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let use_redis = env_or("USE_REDIS", "true")
            .parse::<bool>()
            .context("USE_REDIS must be true or false")?;

        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let max_workers = env_or("MAX_WORKERS", &DEFAULT_MAX_WORKERS.to_string())
            .parse::<usize>()
            .context("MAX_WORKERS must be a positive integer")?;

        let max_retries = env_or("MAX_RETRIES", &DEFAULT_MAX_RETRIES.to_string())
            .parse::<i32>()
            .context("MAX_RETRIES must be an integer")?;

        let retry_backoff_base = env_or("RETRY_BACKOFF_BASE", &DEFAULT_RETRY_BACKOFF_BASE.to_string())
            .parse::<f64>()
            .context("RETRY_BACKOFF_BASE must be a float")?;

        let job_timeout_seconds = env_or("JOB_TIMEOUT_SECONDS", &DEFAULT_JOB_TIMEOUT.as_secs().to_string())
            .parse::<u64>()
            .context("JOB_TIMEOUT_SECONDS must be an integer")?;

        let poll_interval_seconds = env_or(
            "POLL_INTERVAL_SECONDS",
            &DEFAULT_POLL_INTERVAL.as_secs_f64().to_string(),
        )
        .parse::<f64>()
        .context("POLL_INTERVAL_SECONDS must be a float")?;

        Ok(Self {
            database_url,
            redis_url,
            use_redis,
            max_workers,
            max_retries,
            retry_backoff_base,
            job_timeout_seconds,
            poll_interval_seconds,
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.max_workers,
            poll_interval: Duration::from_secs_f64(self.poll_interval_seconds),
            job_timeout: Duration::from_secs(self.job_timeout_seconds),
            retry_backoff_base: self.retry_backoff_base,
            retry_sweep_interval: crate::retry::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        std::env::remove_var("DISPATCH_CORE_TEST_VAR_UNSET");
        assert_eq!(env_or("DISPATCH_CORE_TEST_VAR_UNSET", "fallback"), "fallback");
    }
}
