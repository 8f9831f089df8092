//! Job lifecycle: the only writer of [`JobRecord`] state.
//!
//! Records live in two tiers. The ephemeral tier holds every mutation,
//! including progress ticks, and expires entries a fixed TTL after creation.
//! The durable tier is written at creation, at claims and at terminal
//! transitions only, and backs status reads on instances that never saw the
//! job.

use chrono::{DateTime, Utc};
use garde::Validate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus, SearchInput};
use crate::services::store::{DurableStore, EphemeralStore, StoreError};

pub struct JobLifecycle {
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    ttl: Duration,
    dispatch: Option<mpsc::UnboundedSender<JobRecord>>,
}

impl JobLifecycle {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn DurableStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            ephemeral,
            durable,
            ttl,
            dispatch: None,
        }
    }

    /// Hand every created job to a background dispatcher. Without one, new
    /// jobs wait for the next worker invocation.
    pub fn with_dispatch(mut self, dispatch: mpsc::UnboundedSender<JobRecord>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Validate and persist a new job, then hand it off without waiting.
    pub async fn create(&self, input: SearchInput) -> Result<JobRecord, LifecycleError> {
        input.validate()?;

        let job = JobRecord::new(input);
        self.durable.insert(&job).await?;
        // The durable row is authoritative: status reads fall back to it and
        // the worker will pick the job up, so a cache miss is not fatal.
        if let Err(e) = self.ephemeral.insert(&job, self.ttl).await {
            tracing::warn!(
                job_id = %job.id,
                error = %e,
                "Ephemeral write failed at creation, job served from durable store"
            );
        }

        metrics::counter!("search_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            categories = job.input.categories.len(),
            has_contact = job.input.contact.is_some(),
            "Search job created"
        );

        if let Some(dispatch) = &self.dispatch {
            if dispatch.send(job.clone()).is_err() {
                tracing::warn!(
                    job_id = %job.id,
                    "Dispatcher is gone, job left for the scheduler worker"
                );
            }
        }

        Ok(job)
    }

    /// Raise progress (never lowers it) and optionally move status.
    /// Unknown ids and terminal jobs are ignored.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        status: Option<JobStatus>,
    ) -> Result<(), LifecycleError> {
        let Some(mut job) = self.ephemeral.get(id).await? else {
            tracing::debug!(job_id = %id, progress, "Progress update for unknown job ignored");
            return Ok(());
        };

        if !job.advance(progress, status) {
            tracing::debug!(
                job_id = %id,
                status = %job.status,
                requested = ?status,
                "Progress update rejected"
            );
            return Ok(());
        }

        if !self.ephemeral.set(&job).await? {
            tracing::debug!(job_id = %id, progress, "Job entry expired before progress was recorded");
            return Ok(());
        }
        tracing::debug!(job_id = %id, progress = job.progress, status = %job.status, "Job progress");
        Ok(())
    }

    pub async fn complete(
        &self,
        id: Uuid,
        results: serde_json::Value,
        meta: serde_json::Value,
    ) -> Result<(), LifecycleError> {
        self.finish(id, JobOutcome::Completed { results, meta })
            .await
    }

    pub async fn fail(&self, id: Uuid, message: &str) -> Result<(), LifecycleError> {
        self.finish(
            id,
            JobOutcome::Failed {
                error: message.to_string(),
            },
        )
        .await
    }

    async fn finish(&self, id: Uuid, outcome: JobOutcome) -> Result<(), LifecycleError> {
        let Some(job) = self.durable.finish(id, &outcome).await? else {
            tracing::warn!(
                job_id = %id,
                "Terminal update ignored: job unknown or already finished"
            );
            return Ok(());
        };

        self.mirror(job.clone()).await?;

        match &outcome {
            JobOutcome::Completed { .. } => {
                metrics::counter!("search_jobs_completed_total").increment(1);
                tracing::info!(job_id = %id, "Search job completed");
            }
            JobOutcome::Failed { error } => {
                metrics::counter!("search_jobs_failed_total").increment(1);
                tracing::warn!(job_id = %id, error = %error, "Search job failed");
            }
        }
        Ok(())
    }

    /// Read from the ephemeral tier only.
    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, LifecycleError> {
        Ok(self.ephemeral.get(id).await?)
    }

    /// Status read: ephemeral tier first, durable tier on a miss.
    pub async fn lookup(&self, id: Uuid) -> Result<Option<JobRecord>, LifecycleError> {
        if let Some(job) = self.ephemeral.get(id).await? {
            return Ok(Some(job));
        }

        let job = self.durable.get(id).await?;
        if job.is_some() {
            tracing::debug!(job_id = %id, "Ephemeral miss served from durable store");
        }
        Ok(job)
    }

    /// Claim a pending job, or a processing one idle since before
    /// `stale_before`, for a (re)run. `None` means another invocation owns it.
    pub async fn claim(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, LifecycleError> {
        let Some(job) = self.durable.claim(id, stale_before).await? else {
            return Ok(None);
        };

        let job = self.mirror(job).await?;
        tracing::info!(job_id = %id, progress = job.progress, "Job claimed for processing");
        Ok(Some(job))
    }

    /// Force-fail processing jobs that have been idle since `stuck_before`.
    pub async fn expire_stuck(
        &self,
        stuck_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, LifecycleError> {
        let failed = self.durable.fail_stuck(stuck_before, reason).await?;

        for job in &failed {
            self.mirror(job.clone()).await?;
            metrics::counter!("search_jobs_timed_out_total").increment(1);
            tracing::warn!(
                job_id = %job.id,
                created_at = %job.created_at,
                reason,
                "Stuck job force-failed"
            );
        }
        Ok(failed)
    }

    /// Copy a durable row into the ephemeral tier. Progress held by the
    /// ephemeral copy is kept when higher, and an entry this instance does
    /// not hold (never did, or it expired) gets a fresh TTL.
    async fn mirror(&self, mut job: JobRecord) -> Result<JobRecord, StoreError> {
        if let Some(existing) = self.ephemeral.get(job.id).await? {
            job.progress = job.progress.max(existing.progress);
            if self.ephemeral.set(&job).await? {
                return Ok(job);
            }
        }
        self.ephemeral.insert(&job, self.ttl).await?;
        Ok(job)
    }
}

/// Handle a pipeline uses to report progress at its stage boundaries.
#[derive(Clone)]
pub struct ProgressReporter {
    lifecycle: Arc<JobLifecycle>,
    job_id: Uuid,
}

impl ProgressReporter {
    pub fn new(lifecycle: Arc<JobLifecycle>, job_id: Uuid) -> Self {
        Self { lifecycle, job_id }
    }

    /// Progress reporting is advisory; store errors are logged, not raised.
    pub async fn report(&self, progress: u8) {
        if let Err(e) = self
            .lifecycle
            .update_progress(self.job_id, progress, None)
            .await
        {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to record progress");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid search input: {0}")]
    Validation(#[from] garde::Report),

    #[error(transparent)]
    Store(#[from] StoreError),
}
