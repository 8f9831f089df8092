use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{JobOutcome, JobRecord, JobStatus};
use crate::services::store::{DurableStore, StoreError};

/// PostgreSQL-backed durable job table.
#[derive(Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn insert(&self, job: &JobRecord) -> Result<(), StoreError> {
        queries::insert_job(&self.pool, job).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(queries::get_job(&self.pool, id).await?)
    }

    async fn claim(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(queries::claim_job(&self.pool, id, stale_before).await?)
    }

    async fn finish(
        &self,
        id: Uuid,
        outcome: &JobOutcome,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(queries::finish_job(&self.pool, id, outcome).await?)
    }

    async fn due_jobs(
        &self,
        stale_before: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        Ok(queries::get_due_jobs(&self.pool, stale_before, stuck_before, limit).await?)
    }

    async fn fail_stuck(
        &self,
        stuck_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        Ok(queries::fail_stuck_jobs(&self.pool, stuck_before, reason).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory durable table for tests and single-node development.
///
/// Survives only as long as the process, but honours the same conditional
/// update rules as the SQL store: every mutation happens under the row's
/// shard lock.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    rows: DashMap<Uuid, JobRecord>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn insert(&self, job: &JobRecord) -> Result<(), StoreError> {
        self.rows.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn claim(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(None);
        };
        let claimable = match row.status {
            JobStatus::Pending => true,
            JobStatus::Processing => row.updated_at < stale_before,
            _ => false,
        };
        if claimable && row.claim() {
            Ok(Some(row.value().clone()))
        } else {
            Ok(None)
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        outcome: &JobOutcome,
    ) -> Result<Option<JobRecord>, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.finish(outcome) {
            Ok(Some(row.value().clone()))
        } else {
            Ok(None)
        }
    }

    async fn due_jobs(
        &self,
        stale_before: DateTime<Utc>,
        stuck_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let mut due: Vec<JobRecord> = self
            .rows
            .iter()
            .filter(|row| match row.status {
                JobStatus::Pending => true,
                JobStatus::Processing => {
                    row.updated_at < stale_before && row.updated_at >= stuck_before
                }
                _ => false,
            })
            .map(|row| row.value().clone())
            .collect();

        due.sort_by_key(|job| job.created_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn fail_stuck(
        &self,
        stuck_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let outcome = JobOutcome::Failed {
            error: reason.to_string(),
        };
        let mut failed = Vec::new();
        for mut row in self.rows.iter_mut() {
            if row.status == JobStatus::Processing
                && row.updated_at < stuck_before
                && row.finish(&outcome)
            {
                failed.push(row.value().clone());
            }
        }
        Ok(failed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
