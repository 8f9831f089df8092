use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::JobRecord;
use crate::services::lifecycle::{JobLifecycle, ProgressReporter};
use crate::services::notify::Notifier;
use crate::services::pipeline::{Pipeline, PipelineError};

/// How a single pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Drives claimed jobs through the pipeline and records their outcome.
pub struct JobRunner {
    lifecycle: Arc<JobLifecycle>,
    pipeline: Arc<dyn Pipeline>,
    notifier: Arc<dyn Notifier>,
    run_timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        pipeline: Arc<dyn Pipeline>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            lifecycle,
            pipeline,
            notifier,
            run_timeout: None,
        }
    }

    /// Fail any run that takes longer than `limit`. Must stay below the
    /// worker's stale threshold, or a running job can be claimed again.
    pub fn with_run_timeout(mut self, limit: Duration) -> Self {
        self.run_timeout = Some(limit);
        self
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    /// Run an already-claimed job to a terminal state.
    ///
    /// The pipeline runs in its own task so that a panic surfaces here as a
    /// `JoinError` and still ends in `fail()`.
    pub async fn execute(self: &Arc<Self>, job: JobRecord) -> RunOutcome {
        let job_id = job.id;
        let runner = Arc::clone(self);
        let task = tokio::spawn(async move { runner.run_pipeline(job).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = if e.is_panic() {
                    "pipeline task panicked"
                } else {
                    "pipeline task was cancelled"
                };
                tracing::error!(job_id = %job_id, error = %e, "Pipeline task aborted");
                self.record_failure(job_id, message).await;
                RunOutcome::Failed
            }
        }
    }

    async fn run_pipeline(&self, job: JobRecord) -> RunOutcome {
        let reporter = ProgressReporter::new(Arc::clone(&self.lifecycle), job.id);
        let start = Instant::now();

        tracing::info!(
            job_id = %job.id,
            categories = job.input.categories.len(),
            "Running search pipeline"
        );
        let run = self.pipeline.run(job.id, &job.input, &reporter);
        let result = match self.run_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(PipelineError::TimedOut(limit))),
            None => run.await,
        };
        let elapsed = start.elapsed();
        metrics::histogram!("search_job_pipeline_seconds").record(elapsed.as_secs_f64());

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Search pipeline failed"
                );
                self.record_failure(job.id, &e.to_string()).await;
                return RunOutcome::Failed;
            }
        };

        if let Err(e) = self
            .lifecycle
            .complete(job.id, output.results, output.meta)
            .await
        {
            // Left in processing; the worker retries it once it goes stale.
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job completion");
            return RunOutcome::Failed;
        }

        tracing::info!(
            job_id = %job.id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Search pipeline finished"
        );

        if let Some(contact) = &job.input.contact {
            if !self.notifier.notify(contact, job.id).await {
                tracing::warn!(job_id = %job.id, "Results-ready notification not delivered");
            }
        }

        RunOutcome::Succeeded
    }

    async fn record_failure(&self, job_id: Uuid, message: &str) {
        if let Err(e) = self.lifecycle.fail(job_id, message).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
    }

    /// Claim a freshly created job and run it. Losing the claim means a
    /// worker invocation got there first.
    async fn dispatch(self: Arc<Self>, job: JobRecord) {
        // Only a pending job can match: nothing is idle since the minimum time.
        match self.lifecycle.claim(job.id, DateTime::<Utc>::MIN_UTC).await {
            Ok(Some(claimed)) => {
                self.execute(claimed).await;
            }
            Ok(None) => {
                tracing::debug!(job_id = %job.id, "Job already claimed, skipping dispatch");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "Could not claim job, leaving it for the scheduler worker"
                );
            }
        }
    }
}

/// Consume jobs handed off by [`JobLifecycle::create`], running each as its
/// own supervised task.
pub fn spawn_dispatcher(
    runner: Arc<JobRunner>,
    mut jobs: mpsc::UnboundedReceiver<JobRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            tokio::spawn(Arc::clone(&runner).dispatch(job));
        }
        tracing::debug!("Job dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::durable::MemoryDurableStore;
    use crate::services::ephemeral::MemoryEphemeralStore;
    use crate::services::testing::{sample_input, RecordingNotifier, ScriptedPipeline};

    fn runner_with(
        pipeline: Arc<ScriptedPipeline>,
        notifier: Arc<RecordingNotifier>,
    ) -> (Arc<JobRunner>, mpsc::UnboundedSender<JobRecord>, mpsc::UnboundedReceiver<JobRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(
            JobLifecycle::new(
                Arc::new(MemoryEphemeralStore::new()),
                Arc::new(MemoryDurableStore::new()),
                Duration::from_secs(3600),
            )
            .with_dispatch(tx.clone()),
        );
        (
            Arc::new(JobRunner::new(lifecycle, pipeline, notifier)),
            tx,
            rx,
        )
    }

    async fn wait_for_terminal(lifecycle: &JobLifecycle, id: Uuid) -> JobRecord {
        for _ in 0..200 {
            if let Some(job) = lifecycle.lookup(id).await.unwrap() {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_dispatched_job_completes_and_notifies() {
        let pipeline = Arc::new(ScriptedPipeline::succeeding());
        let notifier = Arc::new(RecordingNotifier::accepting());
        let (runner, _tx, rx) = runner_with(pipeline.clone(), notifier.clone());
        let _dispatcher = spawn_dispatcher(runner.clone(), rx);

        let mut input = sample_input(2);
        input.contact = Some("+15550100".to_string());
        let job = runner.lifecycle().create(input).await.unwrap();

        let done = wait_for_terminal(runner.lifecycle(), job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.results.unwrap().as_object().unwrap().len(), 2);
        assert_eq!(pipeline.calls(), 1);
        assert_eq!(notifier.sent(), vec![("+15550100".to_string(), job.id)]);
    }

    #[tokio::test]
    async fn test_pipeline_error_fails_job() {
        let pipeline = Arc::new(ScriptedPipeline::failing("ranking service down"));
        let notifier = Arc::new(RecordingNotifier::accepting());
        let (runner, _tx, rx) = runner_with(pipeline, notifier.clone());
        let _dispatcher = spawn_dispatcher(runner.clone(), rx);

        let mut input = sample_input(1);
        input.contact = Some("someone@example.com".to_string());
        let job = runner.lifecycle().create(input).await.unwrap();

        let done = wait_for_terminal(runner.lifecycle(), job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("ranking service down"));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_pipeline_still_fails_job() {
        let pipeline = Arc::new(ScriptedPipeline::panicking());
        let notifier = Arc::new(RecordingNotifier::accepting());
        let (runner, _tx, _rx) = runner_with(pipeline, notifier);

        let job = runner.lifecycle().create(sample_input(1)).await.unwrap();
        let claimed = runner
            .lifecycle()
            .claim(job.id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(runner.execute(claimed).await, RunOutcome::Failed);
        let stored = runner.lifecycle().lookup(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("pipeline task panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exceeding_timeout_fails_job() {
        let lifecycle = Arc::new(JobLifecycle::new(
            Arc::new(MemoryEphemeralStore::new()),
            Arc::new(MemoryDurableStore::new()),
            Duration::from_secs(3600),
        ));
        let pipeline = Arc::new(ScriptedPipeline::succeeding().with_delay(Duration::from_secs(600)));
        let runner = Arc::new(
            JobRunner::new(
                lifecycle.clone(),
                pipeline,
                Arc::new(RecordingNotifier::accepting()),
            )
            .with_run_timeout(Duration::from_secs(60)),
        );

        let job = lifecycle.create(sample_input(1)).await.unwrap();
        let claimed = lifecycle.claim(job.id, Utc::now()).await.unwrap().unwrap();

        assert_eq!(runner.execute(claimed).await, RunOutcome::Failed);
        let stored = lifecycle.lookup(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some("Pipeline run exceeded 60 seconds")
        );
    }

    #[tokio::test]
    async fn test_rejected_notification_does_not_change_status() {
        let pipeline = Arc::new(ScriptedPipeline::succeeding());
        let notifier = Arc::new(RecordingNotifier::rejecting());
        let (runner, _tx, _rx) = runner_with(pipeline, notifier.clone());

        let mut input = sample_input(1);
        input.contact = Some("+15550100".to_string());
        let job = runner.lifecycle().create(input).await.unwrap();
        let claimed = runner
            .lifecycle()
            .claim(job.id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(runner.execute(claimed).await, RunOutcome::Succeeded);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(
            runner.lifecycle().lookup(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
