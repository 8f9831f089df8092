use search_jobs::{
    app_state::Stores,
    config::AppConfig,
    models::job::{JobStatus, SearchInput},
    services::{
        lifecycle::JobLifecycle,
        runner::JobRunner,
        testing::{idle_job, sample_input, RecordingNotifier, ScriptedPipeline},
        worker::{SchedulerWorker, WorkerConfig},
    },
};
use std::sync::Arc;
use std::time::Duration;

/// Integration test: full job lifecycle against real stores
///
/// This test verifies:
/// 1. Database connection, schema and migrations
/// 2. Redis ephemeral tier (set/get/expiry)
/// 3. Job creation and lookup across both tiers
/// 4. Atomic claim and terminal transitions
/// 5. Worker retry of a stale job and time-out of a stuck one
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via DATABASE_URL and REDIS_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");
    assert!(
        config.database_url.is_some() && config.redis_url.is_some(),
        "DATABASE_URL and REDIS_URL must be set"
    );

    let stores = tokio_test::assert_ok!(Stores::connect(&config).await);
    let lifecycle = Arc::new(JobLifecycle::new(
        stores.ephemeral.clone(),
        stores.durable.clone(),
        Duration::from_secs(60),
    ));

    // 1. Creation writes both tiers
    let mut input: SearchInput = sample_input(2);
    input.contact = Some("integration@example.com".to_string());
    let job = lifecycle.create(input).await.expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Pending);

    let cached = stores.ephemeral.get(job.id).await.unwrap().expect("Ephemeral copy missing");
    assert_eq!(cached.id, job.id);
    let stored = stores.durable.get(job.id).await.unwrap().expect("Durable copy missing");
    assert_eq!(stored.input, job.input);

    // 2. Claim is exclusive
    let now = chrono::Utc::now();
    let claimed = lifecycle.claim(job.id, now - chrono::Duration::minutes(10)).await.unwrap();
    assert!(claimed.is_some());
    let again = lifecycle.claim(job.id, now - chrono::Duration::minutes(10)).await.unwrap();
    assert!(again.is_none(), "A fresh processing job must not be reclaimed");

    // 3. Progress is monotonic in the ephemeral tier
    lifecycle.update_progress(job.id, 40, None).await.unwrap();
    lifecycle.update_progress(job.id, 30, None).await.unwrap();
    assert_eq!(lifecycle.get(job.id).await.unwrap().unwrap().progress, 40);

    // 4. Completion persists and later failures do not overwrite it
    lifecycle
        .complete(job.id, serde_json::json!({"cat0": []}), serde_json::json!({}))
        .await
        .unwrap();
    lifecycle.fail(job.id, "late failure").await.unwrap();
    let done = stores.durable.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.error.is_none());

    // 5. Worker retries stale jobs and times out stuck ones
    let stale = idle_job(JobStatus::Processing, chrono::Duration::minutes(11));
    let stuck = idle_job(JobStatus::Processing, chrono::Duration::minutes(65));
    stores.durable.insert(&stale).await.unwrap();
    stores.durable.insert(&stuck).await.unwrap();

    let pipeline = Arc::new(ScriptedPipeline::succeeding());
    let runner = Arc::new(JobRunner::new(
        lifecycle.clone(),
        pipeline.clone(),
        Arc::new(RecordingNotifier::accepting()),
    ));
    let worker = SchedulerWorker::new(
        runner,
        stores.durable.clone(),
        WorkerConfig {
            batch_size: 50,
            ..WorkerConfig::default()
        },
    );
    let summary = worker.run_invocation().await.expect("Worker invocation failed");
    assert!(summary.timed_out >= 1);

    let stale_after = stores.durable.get(stale.id).await.unwrap().unwrap();
    assert_eq!(stale_after.status, JobStatus::Completed);
    let stuck_after = stores.durable.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck_after.status, JobStatus::Failed);
    assert!(stuck_after.error.unwrap().contains("timed out"));
    assert!(!pipeline.seen().contains(&stuck.id));

    // 6. Ephemeral expiry leaves the durable copy serving lookups
    stores.ephemeral.delete(job.id).await.unwrap();
    let looked_up = lifecycle.lookup(job.id).await.unwrap().unwrap();
    assert_eq!(looked_up.status, JobStatus::Completed);

    // 7. Health checks
    stores.durable.health_check().await.expect("Database health check failed");
    stores.ephemeral.health_check().await.expect("Redis health check failed");

    println!("✓ Full integration test passed");
}
