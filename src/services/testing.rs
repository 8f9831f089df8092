//! Test doubles for the pipeline and notification collaborators.
//!
//! Used by the unit tests and by the integration tests under `tests/`, which
//! serve the real router over in-memory stores.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{CategoryImages, JobRecord, JobStatus, SearchInput};
use crate::services::lifecycle::ProgressReporter;
use crate::services::notify::Notifier;
use crate::services::pipeline::{Pipeline, PipelineError, PipelineOutput};

/// A valid input with `categories` categories named `cat0`, `cat1`, ….
pub fn sample_input(categories: usize) -> SearchInput {
    SearchInput {
        categories: (0..categories)
            .map(|i| CategoryImages {
                name: format!("cat{i}"),
                images: vec![format!("uploads/{i}.jpg")],
            })
            .collect(),
        contact: None,
    }
}

/// A record in `status` whose last update was `idle_for` ago.
pub fn idle_job(status: JobStatus, idle_for: ChronoDuration) -> JobRecord {
    let mut job = JobRecord::new(sample_input(1));
    let at = Utc::now() - idle_for;
    job.status = status;
    job.created_at = at;
    job.updated_at = at;
    if status == JobStatus::Completed {
        job.progress = 100;
        job.results = Some(serde_json::json!({"cat0": []}));
        job.meta = Some(serde_json::json!({}));
    }
    job
}

#[derive(Debug, Clone)]
enum Script {
    Succeed,
    Fail(String),
    Panic,
}

/// Pipeline that follows a fixed script and counts its runs.
#[derive(Debug)]
pub struct ScriptedPipeline {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<Uuid>>,
}

impl ScriptedPipeline {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns one results entry per category.
    pub fn succeeding() -> Self {
        Self::with_script(Script::Succeed)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_script(Script::Fail(message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with_script(Script::Panic)
    }

    /// Spend `delay` (tokio time) inside every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Job ids in the order they were run.
    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Pipeline for ScriptedPipeline {
    async fn run(
        &self,
        job_id: Uuid,
        input: &SearchInput,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(job_id);
        }

        progress.report(10).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.script {
            Script::Succeed => {
                let mut results = serde_json::Map::new();
                for (idx, category) in input.categories.iter().enumerate() {
                    results.insert(
                        category.name.clone(),
                        serde_json::json!([{ "rank": 1, "source": category.images[0] }]),
                    );
                    let done = (idx + 1) * 80 / input.categories.len().max(1);
                    progress.report(10 + done as u8).await;
                }
                Ok(PipelineOutput {
                    results: serde_json::Value::Object(results),
                    meta: serde_json::json!({ "categories": input.categories.len() }),
                })
            }
            Script::Fail(message) => Err(PipelineError::Stage(message.clone())),
            Script::Panic => panic!("scripted pipeline panic for {job_id}"),
        }
    }
}

/// Notifier that records every delivery attempt.
#[derive(Debug)]
pub struct RecordingNotifier {
    accept: bool,
    sent: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingNotifier {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Uuid)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, contact: &str, job_id: Uuid) -> bool {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((contact.to_string(), job_id));
        }
        self.accept
    }
}
