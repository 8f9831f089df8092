use serde::Deserialize;
use std::time::Duration;

use crate::services::worker::WorkerConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it jobs are kept in process memory.
    pub database_url: Option<String>,

    /// Redis connection string for the ephemeral job tier
    pub redis_url: Option<String>,

    /// Base URL of the search pipeline service
    #[serde(default = "default_pipeline_url")]
    pub pipeline_url: String,

    /// Bearer token for the pipeline service
    pub pipeline_token: Option<String>,

    /// Webhook that delivers "results ready" messages
    pub notify_url: Option<String>,

    /// Public origin used to build result links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Shared secret expected from the external scheduler
    pub scheduler_secret: Option<String>,

    #[serde(default = "default_ephemeral_ttl_secs")]
    pub ephemeral_ttl_secs: u64,

    /// Idle time before a processing job is retried
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Idle time before a processing job is failed outright
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,

    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: i64,

    #[serde(default = "default_worker_budget_secs")]
    pub worker_budget_secs: u64,

    #[serde(default = "default_worker_safety_margin_secs")]
    pub worker_safety_margin_secs: u64,

    /// Cadence of the standalone worker loop
    #[serde(default = "default_worker_interval_secs")]
    pub worker_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_pipeline_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_ephemeral_ttl_secs() -> u64 {
    3600
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_stuck_after_secs() -> u64 {
    3600
}

fn default_worker_batch_size() -> i64 {
    2
}

fn default_worker_budget_secs() -> u64 {
    300
}

fn default_worker_safety_margin_secs() -> u64 {
    20
}

fn default_worker_interval_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn ephemeral_ttl(&self) -> Duration {
        Duration::from_secs(self.ephemeral_ttl_secs)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    /// Upper bound on one pipeline run: the stale threshold less the
    /// worker's safety margin.
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(
            self.stale_after_secs
                .saturating_sub(self.worker_safety_margin_secs)
                .max(1),
        )
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.worker_batch_size,
            stale_after: Duration::from_secs(self.stale_after_secs),
            stuck_after: Duration::from_secs(self.stuck_after_secs),
            budget: Duration::from_secs(self.worker_budget_secs),
            safety_margin: Duration::from_secs(self.worker_safety_margin_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let config = from_pairs(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert!(config.scheduler_secret.is_none());
        assert_eq!(config.ephemeral_ttl(), Duration::from_secs(3600));

        let worker = config.worker_config();
        assert_eq!(worker.batch_size, 2);
        assert_eq!(worker.stale_after, Duration::from_secs(600));
        assert_eq!(worker.stuck_after, Duration::from_secs(3600));
        assert_eq!(worker.budget, Duration::from_secs(300));
        assert_eq!(worker.safety_margin, Duration::from_secs(20));
        assert_eq!(config.run_timeout(), Duration::from_secs(580));
        assert!(config.run_timeout() < worker.stale_after);
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/search"),
            ("SCHEDULER_SECRET", "s3cret"),
            ("WORKER_BATCH_SIZE", "5"),
            ("STALE_AFTER_SECS", "120"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/search")
        );
        assert_eq!(config.scheduler_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.worker_config().batch_size, 5);
        assert_eq!(config.worker_config().stale_after, Duration::from_secs(120));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        let result: Result<AppConfig, _> = envy::from_iter(vec![(
            "WORKER_BUDGET_SECS".to_string(),
            "five minutes".to_string(),
        )]);
        assert!(result.is_err());
    }
}
