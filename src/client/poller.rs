//! Client-side polling of a single search job.
//!
//! The poller submits a job, waits a settle delay, then checks status one
//! request at a time until the job reaches a terminal state:
//!
//! ```text
//! submit ─► settle ─► fetch ─┬─ not found / transport error ─► backoff ─► fetch
//!                            ├─ pending / processing ─► interval ─► fetch
//!                            ├─ completed ─► on_complete (+ local alert)
//!                            └─ failed ─► on_error
//! ```
//!
//! The interval is short while the consuming surface is in the foreground and
//! long while it is backgrounded; coming back to the foreground cuts a long
//! wait short.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{JobStatus, SearchInput};
use crate::models::search::JobStatusResponse;

/// Where the poller submits jobs and reads their status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn submit(&self, input: &SearchInput) -> Result<Uuid, SourceError>;

    /// `Ok(None)` means the id is not (yet) known to the server.
    async fn fetch(&self, job_id: Uuid) -> Result<Option<JobStatusResponse>, SourceError>;
}

/// Whether the consuming surface is currently visible to the user.
pub trait Visibility: Send + Sync {
    fn is_foreground(&self) -> bool;

    /// Subscribe to visibility changes. The receiver is dropped, detaching
    /// the observer, when polling ends.
    fn observe(&self) -> Option<watch::Receiver<bool>>;
}

/// Headless consumers are always "in the foreground" and never change.
#[derive(Debug, Default)]
pub struct AlwaysForeground;

impl Visibility for AlwaysForeground {
    fn is_foreground(&self) -> bool {
        true
    }

    fn observe(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Visibility flag driven by the embedding application.
#[derive(Debug)]
pub struct SharedVisibility {
    tx: watch::Sender<bool>,
}

impl SharedVisibility {
    pub fn new(foreground: bool) -> Self {
        let (tx, _) = watch::channel(foreground);
        Self { tx }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.tx.send_replace(foreground);
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Visibility for SharedVisibility {
    fn is_foreground(&self) -> bool {
        *self.tx.borrow()
    }

    fn observe(&self) -> Option<watch::Receiver<bool>> {
        Some(self.tx.subscribe())
    }
}

/// Local "results ready" alert (desktop or OS notification).
pub trait LocalAlert: Send + Sync {
    fn permission_granted(&self) -> bool;

    fn show(&self, title: &str, body: &str) -> Result<(), AlertError>;
}

/// For platforms without a local alert capability.
#[derive(Debug, Default)]
pub struct NoAlert;

impl LocalAlert for NoAlert {
    fn permission_granted(&self) -> bool {
        false
    }

    fn show(&self, _title: &str, _body: &str) -> Result<(), AlertError> {
        Ok(())
    }
}

/// Callbacks fired while polling. All default to no-ops.
pub trait PollObserver: Send {
    /// Every successful status fetch, terminal ones included.
    fn on_progress(&mut self, _status: &JobStatusResponse) {}

    fn on_complete(&mut self, _status: &JobStatusResponse) {}

    /// The job itself failed; carries the job's error message.
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct IgnoreEvents;

impl PollObserver for IgnoreEvents {}

/// Configuration for the client poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wait before the first status check
    pub settle_delay: Duration,
    /// Upper bound on status checks, misses included
    pub max_attempts: u32,
    /// Interval between checks while foregrounded
    pub foreground_interval: Duration,
    /// Interval between checks while backgrounded
    pub background_interval: Duration,
    /// First backoff after a miss; doubles per consecutive miss
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Give up once consecutive misses exceed this
    pub max_misses: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1500),
            max_attempts: 150,
            foreground_interval: Duration::from_secs(2),
            background_interval: Duration::from_secs(10),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            max_misses: 8,
        }
    }
}

/// Doubling delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial.min(self.max),
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Terminal state observed by the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(JobStatusResponse),
    Failed { job_id: Uuid, message: String },
}

pub struct ClientPoller {
    source: Arc<dyn StatusSource>,
    visibility: Arc<dyn Visibility>,
    alert: Arc<dyn LocalAlert>,
    config: PollerConfig,
}

impl ClientPoller {
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        Self {
            source,
            visibility: Arc::new(AlwaysForeground),
            alert: Arc::new(NoAlert),
            config,
        }
    }

    pub fn with_visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_alert(mut self, alert: Arc<dyn LocalAlert>) -> Self {
        self.alert = alert;
        self
    }

    /// Submit `input` and poll the new job to a terminal state.
    pub async fn run(
        &self,
        input: &SearchInput,
        observer: &mut dyn PollObserver,
    ) -> Result<PollOutcome, PollError> {
        let job_id = self.source.submit(input).await.map_err(PollError::Submit)?;
        tracing::info!(job_id = %job_id, "Search submitted, polling for status");
        self.watch(job_id, observer).await
    }

    /// Poll an already-submitted job to a terminal state.
    pub async fn watch(
        &self,
        job_id: Uuid,
        observer: &mut dyn PollObserver,
    ) -> Result<PollOutcome, PollError> {
        // Owned by this call so every return path detaches it.
        let mut visibility_changes = self.visibility.observe();

        tokio::time::sleep(self.config.settle_delay).await;

        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut misses = 0u32;

        for attempt in 1..=self.config.max_attempts {
            let transport_error = match self.source.fetch(job_id).await {
                Ok(Some(status)) => {
                    misses = 0;
                    backoff.reset();
                    observer.on_progress(&status);

                    match status.status {
                        JobStatus::Completed => {
                            observer.on_complete(&status);
                            self.alert_if_backgrounded(job_id);
                            tracing::info!(job_id = %job_id, attempt, "Search completed");
                            return Ok(PollOutcome::Completed(status));
                        }
                        JobStatus::Failed => {
                            let message = status
                                .error
                                .unwrap_or_else(|| "search failed".to_string());
                            observer.on_error(&message);
                            tracing::warn!(job_id = %job_id, attempt, error = %message, "Search failed");
                            return Ok(PollOutcome::Failed { job_id, message });
                        }
                        JobStatus::Pending | JobStatus::Processing => {}
                    }

                    let interval = if self.visibility.is_foreground() {
                        self.config.foreground_interval
                    } else {
                        self.config.background_interval
                    };
                    self.pause(interval, visibility_changes.as_mut()).await;
                    continue;
                }
                Ok(None) => None,
                Err(e) => Some(e),
            };

            misses += 1;
            if misses > self.config.max_misses {
                return Err(match transport_error {
                    Some(source) => PollError::Transport { job_id, source },
                    None => PollError::NotFound { job_id, misses },
                });
            }

            let delay = backoff.next_delay();
            tracing::debug!(
                job_id = %job_id,
                attempt,
                misses,
                delay_ms = delay.as_millis() as u64,
                error = transport_error.as_ref().map(|e| e.to_string()),
                "Job status unavailable, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        Err(PollError::TimedOut {
            job_id,
            attempts: self.config.max_attempts,
        })
    }

    /// Sleep for `interval`, returning early if the surface comes back to the
    /// foreground.
    async fn pause(&self, interval: Duration, changes: Option<&mut watch::Receiver<bool>>) {
        let Some(changes) = changes else {
            tokio::time::sleep(interval).await;
            return;
        };

        let deadline = Instant::now() + interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep_until(deadline).await;
                        return;
                    }
                    if *changes.borrow_and_update() {
                        tracing::debug!("Surface foregrounded, checking status early");
                        return;
                    }
                }
            }
        }
    }

    fn alert_if_backgrounded(&self, job_id: Uuid) {
        if self.visibility.is_foreground() || !self.alert.permission_granted() {
            return;
        }
        if let Err(e) = self
            .alert
            .show("Your search is ready", "Open the app to see your results.")
        {
            tracing::debug!(job_id = %job_id, error = %e, "Local alert not shown");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, thiserror::Error)]
#[error("Local alert failed: {0}")]
pub struct AlertError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Failed to submit search: {0}")]
    Submit(#[source] SourceError),

    #[error("Job {job_id} not found after {misses} consecutive status checks")]
    NotFound { job_id: Uuid, misses: u32 },

    #[error("Status checks for job {job_id} kept failing: {source}")]
    Transport {
        job_id: Uuid,
        #[source]
        source: SourceError,
    },

    #[error("Job {job_id} did not finish within {attempts} status checks")]
    TimedOut { job_id: Uuid, attempts: u32 },
}
