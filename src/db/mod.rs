//! Postgres access for the durable job tier.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Connect the job store pool. Workers hold one connection per claimed job,
/// so the pool stays small.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;
    tracing::debug!(size = pool.size(), "Job store pool connected");
    Ok(pool)
}

/// Apply the embedded `search_jobs` schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;
