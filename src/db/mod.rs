pub mod finalized;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;

pub use finalized::SqliteFinalizedStore;

pub type DbPool = SqlitePool;

/// Open the SQLite database and run migrations
pub async fn init_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
    // Every connection to `:memory:` is a separate database, keep exactly one alive
    let in_memory = database_url.contains(":memory:");

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .idle_timeout(if in_memory {
            None
        } else {
            Some(Duration::from_secs(60))
        })
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS finalized_jobs (
            job_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            source TEXT NOT NULL,
            finalized_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_finalized_jobs_at ON finalized_jobs(finalized_at)"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
