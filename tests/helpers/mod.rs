//! Test helper utilities: serve the real router on an ephemeral port over
//! in-memory stores and a scripted pipeline.

#![allow(dead_code)]

use metrics_exporter_prometheus::PrometheusBuilder;
use search_jobs::{
    app_state::{AppState, Stores},
    models::search::{JobStatusResponse, SubmitResponse},
    routes,
    services::{
        durable::MemoryDurableStore,
        ephemeral::MemoryEphemeralStore,
        lifecycle::JobLifecycle,
        runner::{self, JobRunner},
        testing::{RecordingNotifier, ScriptedPipeline},
        worker::{SchedulerWorker, WorkerConfig},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub lifecycle: Arc<JobLifecycle>,
    pub ephemeral: Arc<MemoryEphemeralStore>,
    pub durable: Arc<MemoryDurableStore>,
    pub pipeline: Arc<ScriptedPipeline>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestServer {
    /// Start a server whose submissions are dispatched immediately.
    pub async fn start(pipeline: ScriptedPipeline, scheduler_secret: Option<&str>) -> Self {
        Self::spawn(pipeline, scheduler_secret, true).await
    }

    /// Start a server that only runs jobs when the worker is triggered.
    pub async fn start_without_dispatch(
        pipeline: ScriptedPipeline,
        scheduler_secret: Option<&str>,
    ) -> Self {
        Self::spawn(pipeline, scheduler_secret, false).await
    }

    async fn spawn(pipeline: ScriptedPipeline, scheduler_secret: Option<&str>, dispatch: bool) -> Self {
        let ephemeral = Arc::new(MemoryEphemeralStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let stores = Stores {
            ephemeral: ephemeral.clone(),
            durable: durable.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut lifecycle = JobLifecycle::new(
            stores.ephemeral.clone(),
            stores.durable.clone(),
            Duration::from_secs(3600),
        );
        if dispatch {
            lifecycle = lifecycle.with_dispatch(tx);
        }
        let lifecycle = Arc::new(lifecycle);

        let pipeline = Arc::new(pipeline);
        let notifier = Arc::new(RecordingNotifier::accepting());
        let job_runner = Arc::new(JobRunner::new(
            lifecycle.clone(),
            pipeline.clone(),
            notifier.clone(),
        ));
        runner::spawn_dispatcher(job_runner.clone(), rx);

        let worker = SchedulerWorker::new(job_runner, stores.durable.clone(), WorkerConfig::default());
        let state = AppState::new(
            lifecycle.clone(),
            worker,
            &stores,
            scheduler_secret.map(str::to_string),
        );
        let prometheus = Arc::new(PrometheusBuilder::new().build_recorder().handle());
        let app = routes::build_router(state, prometheus);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Test server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            lifecycle,
            ephemeral,
            durable,
            pipeline,
            notifier,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a raw JSON body to the submit endpoint.
    pub async fn submit(&self, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/search"))
            .json(body)
            .send()
            .await
            .expect("Submit request failed")
    }

    pub async fn submit_ok(&self, body: &serde_json::Value) -> SubmitResponse {
        let response = self.submit(body).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        response.json().await.expect("Invalid submit response")
    }

    pub async fn status(&self, job_id: Uuid) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/v1/search/{job_id}")))
            .send()
            .await
            .expect("Status request failed")
    }

    /// Poll job status until completed or failed (with timeout)
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> JobStatusResponse {
        for _ in 0..200 {
            let response = self.status(job_id).await;
            if response.status().is_success() {
                let status: JobStatusResponse = response.json().await.expect("Invalid status body");
                if status.status.is_terminal() {
                    return status;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("Job {job_id} did not reach a terminal state");
    }
}

/// Submission body with `categories` categories of one image each.
pub fn search_body(categories: usize) -> serde_json::Value {
    let categories: Vec<serde_json::Value> = (0..categories)
        .map(|i| {
            serde_json::json!({
                "name": format!("cat{i}"),
                "images": [format!("uploads/{i}.jpg")],
            })
        })
        .collect();
    serde_json::json!({ "categories": categories })
}
