use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db;
use crate::services::{
    durable::{MemoryDurableStore, PgDurableStore},
    ephemeral::{MemoryEphemeralStore, RedisEphemeralStore},
    lifecycle::JobLifecycle,
    notify::{NoopNotifier, Notifier, WebhookNotifier},
    pipeline::{HttpPipeline, PipelineError},
    runner::JobRunner,
    store::{DurableStore, EphemeralStore, StoreError},
    worker::SchedulerWorker,
};

const PIPELINE_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<JobLifecycle>,
    pub worker: Arc<SchedulerWorker>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub durable: Arc<dyn DurableStore>,
    pub scheduler_secret: Option<String>,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        worker: SchedulerWorker,
        stores: &Stores,
        scheduler_secret: Option<String>,
    ) -> Self {
        Self {
            lifecycle,
            worker: Arc::new(worker),
            ephemeral: Arc::clone(&stores.ephemeral),
            durable: Arc::clone(&stores.durable),
            scheduler_secret,
        }
    }
}

/// Both storage tiers, chosen from configuration.
#[derive(Clone)]
pub struct Stores {
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub durable: Arc<dyn DurableStore>,
}

impl Stores {
    /// Process-local tiers, for local development and tests.
    pub fn in_memory() -> Self {
        Self {
            ephemeral: Arc::new(MemoryEphemeralStore::new()),
            durable: Arc::new(MemoryDurableStore::new()),
        }
    }

    /// Postgres when `DATABASE_URL` is set, Redis when `REDIS_URL` is set,
    /// in-memory otherwise.
    pub async fn connect(config: &AppConfig) -> Result<Self, StoreError> {
        let durable: Arc<dyn DurableStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url).await?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
                Arc::new(PgDurableStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, jobs will not survive a restart");
                Arc::new(MemoryDurableStore::new())
            }
        };

        let ephemeral: Arc<dyn EphemeralStore> = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis ephemeral store");
                let store = RedisEphemeralStore::new(url)?;
                store.health_check().await?;
                Arc::new(store)
            }
            None => {
                tracing::info!("REDIS_URL not set, using in-process ephemeral store");
                Arc::new(MemoryEphemeralStore::new())
            }
        };

        Ok(Self { ephemeral, durable })
    }
}

/// Runner wired to the configured pipeline service and notifier.
pub fn build_runner(
    config: &AppConfig,
    lifecycle: Arc<JobLifecycle>,
) -> Result<Arc<JobRunner>, BootstrapError> {
    let pipeline = HttpPipeline::new(
        &config.pipeline_url,
        config.pipeline_token.clone(),
        PIPELINE_TIMEOUT,
    )?;

    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, &config.public_base_url)?),
        None => {
            tracing::info!("NOTIFY_URL not set, results-ready messages are disabled");
            Arc::new(NoopNotifier)
        }
    };

    Ok(Arc::new(
        JobRunner::new(lifecycle, Arc::new(pipeline), notifier)
            .with_run_timeout(config.run_timeout()),
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Failed to build notifier client: {0}")]
    Notifier(#[from] reqwest::Error),
}
