//! Periodic reconciliation of pending and stale jobs.
//!
//! Each invocation is bounded by a wall-clock budget and processes a small
//! batch strictly one job at a time:
//!
//! ```text
//! invocation
//!     ├─► force-fail processing jobs idle longer than `stuck_after`
//!     ├─► select due jobs (pending, or processing idle past `stale_after`)
//!     └─► for each, while budget - elapsed >= safety margin:
//!             claim ─► pipeline ─► complete | fail ─► notify
//! ```
//!
//! Overlapping invocations are not prevented; the atomic claim keeps two of
//! them from running the same job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::job::JobStatus;
use crate::services::lifecycle::LifecycleError;
use crate::services::runner::{JobRunner, RunOutcome};
use crate::services::store::DurableStore;

/// Configuration for the scheduler worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs selected per invocation
    pub batch_size: i64,
    /// Idle time after which a processing job is retried
    pub stale_after: Duration,
    /// Idle time after which a processing job is failed outright
    pub stuck_after: Duration,
    /// Wall-clock ceiling of one invocation
    pub budget: Duration,
    /// Never start a job with less than this much budget left
    pub safety_margin: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            stale_after: Duration::from_secs(10 * 60),
            stuck_after: Duration::from_secs(60 * 60),
            budget: Duration::from_secs(5 * 60),
            safety_margin: Duration::from_secs(20),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    /// Jobs claimed and run through the pipeline
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Processing jobs force-failed for exceeding `stuck_after`
    pub timed_out: u32,
    /// Due jobs left for the next invocation for lack of budget
    pub deferred: u32,
    /// Due jobs claimed by a concurrent invocation first
    pub skipped: u32,
    pub elapsed_ms: u64,
}

pub struct SchedulerWorker {
    runner: Arc<JobRunner>,
    durable: Arc<dyn DurableStore>,
    config: WorkerConfig,
}

fn timeout_reason(stuck_after: Duration) -> String {
    format!(
        "job timed out: no progress for {} minutes",
        stuck_after.as_secs() / 60
    )
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

impl SchedulerWorker {
    pub fn new(runner: Arc<JobRunner>, durable: Arc<dyn DurableStore>, config: WorkerConfig) -> Self {
        Self {
            runner,
            durable,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one reconciliation pass.
    pub async fn run_invocation(&self) -> Result<WorkerSummary, LifecycleError> {
        let started = Instant::now();
        let lifecycle = self.runner.lifecycle();
        let mut summary = WorkerSummary::default();

        let now = Utc::now();
        let stale_before = now - to_chrono(self.config.stale_after);
        let stuck_before = now - to_chrono(self.config.stuck_after);

        let timed_out = lifecycle
            .expire_stuck(stuck_before, &timeout_reason(self.config.stuck_after))
            .await?;
        summary.timed_out = timed_out.len() as u32;

        let due = self
            .durable
            .due_jobs(stale_before, stuck_before, self.config.batch_size)
            .await?;

        tracing::info!(
            due = due.len(),
            timed_out = summary.timed_out,
            "Worker invocation started"
        );

        for (idx, job) in due.iter().enumerate() {
            let remaining = self.config.budget.saturating_sub(started.elapsed());
            if remaining < self.config.safety_margin {
                summary.deferred = (due.len() - idx) as u32;
                tracing::info!(
                    remaining_ms = remaining.as_millis() as u64,
                    deferred = summary.deferred,
                    "Budget exhausted, leaving remaining jobs for next invocation"
                );
                break;
            }

            let Some(claimed) = lifecycle.claim(job.id, stale_before).await? else {
                tracing::debug!(job_id = %job.id, "Job claimed elsewhere, skipping");
                summary.skipped += 1;
                continue;
            };

            let retry = job.status == JobStatus::Processing;
            tracing::info!(job_id = %job.id, retry, "Worker processing job");

            summary.processed += 1;
            match self.runner.execute(claimed).await {
                RunOutcome::Succeeded => summary.succeeded += 1,
                RunOutcome::Failed => summary.failed += 1,
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("worker_invocation_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            deferred = summary.deferred,
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed_ms,
            "Worker invocation finished"
        );

        Ok(summary)
    }
}
