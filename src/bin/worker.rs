use search_jobs::{
    app_state::{self, Stores},
    config::AppConfig,
    services::{lifecycle::JobLifecycle, worker::SchedulerWorker},
};
use std::sync::Arc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // `--once` runs a single invocation, for cron-style schedulers.
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    tracing::info!(once, "Starting search job worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let stores = Stores::connect(&config)
        .await
        .expect("Failed to initialize job stores");

    let lifecycle = Arc::new(JobLifecycle::new(
        Arc::clone(&stores.ephemeral),
        Arc::clone(&stores.durable),
        config.ephemeral_ttl(),
    ));
    let runner = app_state::build_runner(&config, lifecycle)
        .expect("Failed to initialize search pipeline");
    let worker = SchedulerWorker::new(runner, Arc::clone(&stores.durable), config.worker_config());

    let interval = config.worker_interval();
    tracing::info!(
        interval_secs = interval.as_secs(),
        batch_size = worker.config().batch_size,
        "Worker ready"
    );

    loop {
        match worker.run_invocation().await {
            Ok(summary) => {
                tracing::info!(
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    timed_out = summary.timed_out,
                    deferred = summary.deferred,
                    "Worker invocation complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker invocation failed");
                if once {
                    std::process::exit(1);
                }
            }
        }

        if once {
            break;
        }
        sleep(interval).await;
    }
}
