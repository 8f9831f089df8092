use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus, SearchInput};

const JOB_COLUMNS: &str =
    "id, status, progress, input, results, meta, error, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status =
        JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let progress: i32 = row.try_get("progress")?;
    let input: Json<SearchInput> = row.try_get("input")?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        status,
        progress: progress.clamp(0, 100) as u8,
        input: input.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        results: row.try_get("results")?,
        meta: row.try_get("meta")?,
        error: row.try_get("error")?,
    })
}

/// Insert a newly submitted job
pub async fn insert_job(pool: &PgPool, job: &JobRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO search_jobs (id, status, progress, input, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(job.id)
    .bind(job.status.to_string())
    .bind(i32::from(job.progress))
    .bind(Json(&job.input))
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Claim a pending or stale job. The WHERE clause makes the claim atomic:
/// two invocations racing for the same row cannot both see it match.
pub async fn claim_job(
    pool: &PgPool,
    job_id: Uuid,
    stale_before: DateTime<Utc>,
) -> Result<Option<JobRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE search_jobs
        SET status = 'processing',
            updated_at = NOW()
        WHERE id = $1
          AND (status = 'pending' OR (status = 'processing' AND updated_at < $2))
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(stale_before)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Record a terminal outcome for a claimed job. Pending and terminal rows
/// are left alone.
pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    outcome: &JobOutcome,
) -> Result<Option<JobRecord>, sqlx::Error> {
    let row = match outcome {
        JobOutcome::Completed { results, meta } => {
            let sql = format!(
                r#"
                UPDATE search_jobs
                SET status = 'completed',
                    progress = 100,
                    results = $2,
                    meta = $3,
                    error = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND status = 'processing'
                RETURNING {JOB_COLUMNS}
                "#
            );
            sqlx::query(&sql)
                .bind(job_id)
                .bind(results)
                .bind(meta)
                .fetch_optional(pool)
                .await?
        }
        JobOutcome::Failed { error } => {
            let sql = format!(
                r#"
                UPDATE search_jobs
                SET status = 'failed',
                    error = $2,
                    updated_at = NOW()
                WHERE id = $1 AND status = 'processing'
                RETURNING {JOB_COLUMNS}
                "#
            );
            sqlx::query(&sql)
                .bind(job_id)
                .bind(error)
                .fetch_optional(pool)
                .await?
        }
    };

    row.as_ref().map(job_from_row).transpose()
}

/// Get jobs the worker should (re)attempt, oldest first
pub async fn get_due_jobs(
    pool: &PgPool,
    stale_before: DateTime<Utc>,
    stuck_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<JobRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM search_jobs
        WHERE status = 'pending'
           OR (status = 'processing' AND updated_at < $1 AND updated_at >= $2)
        ORDER BY created_at ASC
        LIMIT $3
        "#
    ))
    .bind(stale_before)
    .bind(stuck_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Force-fail processing jobs idle since before `stuck_before`
pub async fn fail_stuck_jobs(
    pool: &PgPool,
    stuck_before: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<JobRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE search_jobs
        SET status = 'failed',
            error = $2,
            updated_at = NOW()
        WHERE status = 'processing' AND updated_at < $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(stuck_before)
    .bind(reason)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}
