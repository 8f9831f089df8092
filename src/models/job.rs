use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a search job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// `processing -> processing` is the stale retry taken by the worker.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Pending) => true,
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Processing, _) => next != JobStatus::Pending,
            _ => false,
        }
    }
}

/// Images submitted for one search category.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CategoryImages {
    #[garde(length(min = 1, max = 100))]
    pub name: String,

    #[garde(length(min = 1, max = 20), inner(length(min = 1, max = 2048)))]
    pub images: Vec<String>,
}

/// Payload captured at submission. Never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SearchInput {
    #[serde(default)]
    #[garde(length(min = 1, max = 10), dive)]
    pub categories: Vec<CategoryImages>,

    /// Where to send a "results ready" notification, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 3, max = 320))]
    pub contact: Option<String>,
}

/// What a pipeline run ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        results: serde_json::Value,
        meta: serde_json::Value,
    },
    Failed {
        error: String,
    },
}

/// A search job as stored in both the ephemeral and durable tiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub input: SearchInput,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(input: SearchInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0,
            input,
            created_at: now,
            updated_at: now,
            results: None,
            meta: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Raise progress and optionally move status. Returns false, leaving the
    /// record untouched, when the job is already terminal or the transition
    /// is not allowed.
    pub fn advance(&mut self, progress: u8, status: Option<JobStatus>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if let Some(next) = status {
            if next.is_terminal() || !self.status.can_transition_to(next) {
                return false;
            }
            self.status = next;
        }
        self.progress = self.progress.max(progress.min(100));
        self.touch();
        true
    }

    /// Mark the record as claimed for a (re)run.
    pub fn claim(&mut self) -> bool {
        if !self.status.can_transition_to(JobStatus::Processing) {
            return false;
        }
        self.status = JobStatus::Processing;
        self.touch();
        true
    }

    /// Apply a terminal outcome. Only a claimed (processing) record can
    /// finish; pending and terminal records are left untouched.
    pub fn finish(&mut self, outcome: &JobOutcome) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match outcome {
            JobOutcome::Completed { results, meta } => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.results = Some(results.clone());
                self.meta = Some(meta.clone());
                self.error = None;
            }
            JobOutcome::Failed { error } => {
                self.status = JobStatus::Failed;
                self.error = Some(error.clone());
            }
        }
        self.touch();
        true
    }
}
