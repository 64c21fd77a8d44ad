/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (in-memory store when unset)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `JOBS_COLLECTION`: collection holding the jobs (default: jobs)
/// - `CRON_POLL_INTERVAL_MS`: sleep between polls (default: 1000)
/// - `JOB_TTL_SECONDS`: how long started jobs are kept (default: 300)
/// - `RUST_LOG`: Log level (default: warden_worker=debug)

use crate::queue::DEFAULT_JOB_TTL_SECONDS;
use crate::runner::{RunnerConfig, DEFAULT_POLL_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL connection URL
    pub database_url: Option<String>,

    /// Maximum number of connections in pool
    pub max_connections: u32,

    pub jobs_collection: String,

    pub poll_interval_ms: u64,

    pub job_ttl_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            jobs_collection: "jobs".to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            job_ttl_seconds: DEFAULT_JOB_TTL_SECONDS,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(value) => value.parse::<u32>()?,
            Err(_) => defaults.max_connections,
        };

        let jobs_collection = env::var("JOBS_COLLECTION").unwrap_or(defaults.jobs_collection);

        let poll_interval_ms = match env::var("CRON_POLL_INTERVAL_MS") {
            Ok(value) => value.parse::<u64>()?,
            Err(_) => defaults.poll_interval_ms,
        };

        let job_ttl_seconds = match env::var("JOB_TTL_SECONDS") {
            Ok(value) => value.parse::<u64>()?,
            Err(_) => defaults.job_ttl_seconds,
        };

        if poll_interval_ms == 0 {
            anyhow::bail!("CRON_POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(Self {
            database_url,
            max_connections,
            jobs_collection,
            poll_interval_ms,
            job_ttl_seconds,
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.jobs_collection, "jobs");
        assert_eq!(config.job_ttl(), Duration::from_secs(300));
        assert_eq!(config.runner_config().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_runner_config_follows_poll_interval() {
        let config = WorkerConfig {
            poll_interval_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.runner_config().poll_interval, Duration::from_millis(250));
    }
}
