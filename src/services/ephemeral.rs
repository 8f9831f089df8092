use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::JobRecord;
use crate::services::store::{EphemeralStore, StoreError};

const KEY_PREFIX: &str = "search_jobs:job:";

#[derive(Debug, Clone)]
struct Entry {
    job: JobRecord,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local job table, shared by every request an instance serves.
///
/// Each entry is removed by a timer scheduled when it is inserted or expired;
/// reads also treat an elapsed deadline as a miss in case the timer has not
/// fired yet.
#[derive(Debug, Clone, Default)]
pub struct MemoryEphemeralStore {
    entries: Arc<DashMap<Uuid, Entry>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn schedule_removal(&self, id: Uuid, deadline: Instant) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // A later insert() or expire() for the same id owns removal.
            if entries
                .remove_if(&id, |_, entry| entry.expires_at == Some(deadline))
                .is_some()
            {
                tracing::debug!(job_id = %id, "Ephemeral job entry expired");
            }
        });
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let now = Instant::now();
        if self
            .entries
            .remove_if(&id, |_, entry| entry.is_expired(now))
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.entries.get(&id).map(|entry| entry.job.clone()))
    }

    async fn insert(&self, job: &JobRecord, ttl: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + ttl;
        self.entries.insert(
            job.id,
            Entry {
                job: job.clone(),
                expires_at: Some(deadline),
            },
        );
        self.schedule_removal(job.id, deadline);
        Ok(())
    }

    async fn set(&self, job: &JobRecord) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(&job.id) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.job = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.entries.remove(&id);
        Ok(())
    }

    async fn expire(&self, id: Uuid, ttl: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + ttl;
        match self.entries.get_mut(&id) {
            Some(mut entry) => entry.expires_at = Some(deadline),
            None => return Ok(()),
        }
        self.schedule_removal(id, deadline);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Redis-backed ephemeral store, shareable across instances.
pub struct RedisEphemeralStore {
    client: redis::Client,
}

impl RedisEphemeralStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }

    fn key(id: Uuid) -> String {
        format!("{KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::key(id)).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, job: &JobRecord, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        redis::cmd("SET")
            .arg(Self::key(job.id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set(&self, job: &JobRecord) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        // XX: never recreate a key that expired since it was read.
        let written: Option<String> = redis::cmd("SET")
            .arg(Self::key(job.id))
            .arg(payload)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(written.is_some())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(id)).await?;
        Ok(())
    }

    async fn expire(&self, id: Uuid, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.expire::<_, ()>(Self::key(id), ttl_seconds(ttl)).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::testing::sample_input;

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_after_ttl() {
        let store = MemoryEphemeralStore::new();
        let job = JobRecord::new(sample_input(2));
        store.insert(&job, Duration::from_secs(3600)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert!(store.get(job.id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get(job.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_keeps_scheduled_expiry() {
        let store = MemoryEphemeralStore::new();
        let mut job = JobRecord::new(sample_input(1));
        store.insert(&job, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        job.claim();
        assert!(store.set(&job).await.unwrap());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.get(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_unknown_id_is_noop() {
        let store = MemoryEphemeralStore::new();
        store
            .expire(Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let store = MemoryEphemeralStore::new();
        let job = JobRecord::new(sample_input(1));
        store.insert(&job, Duration::from_secs(60)).await.unwrap();
        store.delete(job.id).await.unwrap();
        assert!(store.get(job.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_does_not_resurrect_expired_entry() {
        let store = MemoryEphemeralStore::new();
        let mut job = JobRecord::new(sample_input(1));
        store.insert(&job, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        job.claim();
        assert!(!store.set(&job).await.unwrap());
        assert!(store.get(job.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_unknown_id_writes_nothing() {
        let store = MemoryEphemeralStore::new();
        let job = JobRecord::new(sample_input(1));
        assert!(!store.set(&job).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_replaces_expiry() {
        let store = MemoryEphemeralStore::new();
        let job = JobRecord::new(sample_input(1));
        store.insert(&job, Duration::from_secs(10)).await.unwrap();
        store.insert(&job, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.get(job.id).await.unwrap().is_some());
    }
}
