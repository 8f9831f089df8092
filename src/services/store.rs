//! Storage seams for the two job tiers.
//!
//! The ephemeral tier is a fast TTL-bounded cache local to one instance (or a
//! shared keyed cache); the durable tier is the cross-instance source of
//! truth. `JobLifecycle` is the only caller that writes through either.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord};

/// Fast job table with per-entry expiry.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Create or replace the entry for `job.id`, expiring after `ttl`.
    async fn insert(&self, job: &JobRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Overwrite an existing entry, keeping its expiry. Returns false, and
    /// writes nothing, when the entry is absent or already expired.
    async fn set(&self, job: &JobRecord) -> Result<bool, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Schedule removal of `id` after `ttl`.
    async fn expire(&self, id: Uuid, ttl: Duration) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Persisted job table. Rows are never deleted.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn insert(&self, job: &JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Atomically move `id` to processing if it is pending, or processing with
    /// `updated_at < stale_before`. Returns the claimed row, or `None` when the
    /// job is unknown, terminal, fresh, or was claimed by someone else.
    async fn claim(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Apply a terminal outcome to a processing row. `None` when the job is
    /// unknown, was never claimed, or is already terminal.
    async fn finish(&self, id: Uuid, outcome: &JobOutcome)
        -> Result<Option<JobRecord>, StoreError>;

    /// Pending jobs plus processing jobs idle since before `stale_before` but
    /// not since before `stuck_before`, oldest first.
    async fn due_jobs(
        &self,
        stale_before: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Fail every processing job idle since before `stuck_before`.
    async fn fail_stuck(
        &self,
        stuck_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
