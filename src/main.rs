use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use search_jobs::{
    app_state::{self, AppState, Stores},
    config::AppConfig,
    routes,
    services::{lifecycle::JobLifecycle, runner, worker::SchedulerWorker},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing search-jobs server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "search_jobs_submitted_total",
        "Total search jobs submitted"
    );
    metrics::describe_counter!(
        "search_jobs_completed_total",
        "Total search jobs completed"
    );
    metrics::describe_counter!(
        "search_jobs_failed_total",
        "Total search jobs that failed"
    );
    metrics::describe_counter!(
        "search_jobs_timed_out_total",
        "Search jobs failed by the worker after going idle too long"
    );
    metrics::describe_histogram!(
        "search_job_pipeline_seconds",
        "Time spent running the search pipeline for one job"
    );
    metrics::describe_histogram!(
        "worker_invocation_seconds",
        "Wall-clock duration of one scheduler worker invocation"
    );

    let stores = Stores::connect(&config)
        .await
        .expect("Failed to initialize job stores");

    // Submitted jobs are handed to the dispatcher, which runs each one in the
    // background while the request returns.
    let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
    let lifecycle = Arc::new(
        JobLifecycle::new(
            Arc::clone(&stores.ephemeral),
            Arc::clone(&stores.durable),
            config.ephemeral_ttl(),
        )
        .with_dispatch(dispatch_tx),
    );

    let job_runner = app_state::build_runner(&config, Arc::clone(&lifecycle))
        .expect("Failed to initialize search pipeline");
    let _dispatcher = runner::spawn_dispatcher(Arc::clone(&job_runner), dispatch_rx);

    let worker = SchedulerWorker::new(
        job_runner,
        Arc::clone(&stores.durable),
        config.worker_config(),
    );

    // Create shared application state
    let state = AppState::new(lifecycle, worker, &stores, config.scheduler_secret.clone());
    let app = routes::build_router(state, prometheus_handle);

    tracing::info!("Starting search-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
