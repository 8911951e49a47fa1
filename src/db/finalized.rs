//! Finalized job markers in SQLite

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, Sqlite};

use super::DbPool;
use crate::error::{AppError, Result};
use crate::models::{CompletionSource, TerminalKind};
use crate::services::completion::{Finalize, FinalizedStore};

/// Marker row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FinalizedRecord {
    pub job_id: String,
    pub kind: String,
    pub source: String,
    pub finalized_at: String,
}

/// Insert the marker if absent. Returns `true` when this call inserted it.
pub async fn insert_marker<'e, E>(
    executor: E,
    job_id: &str,
    kind: TerminalKind,
    source: CompletionSource,
) -> std::result::Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO finalized_jobs (job_id, kind, source, finalized_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(kind.as_str())
    .bind(source.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_marker<'e, E>(
    executor: E,
    job_id: &str,
) -> std::result::Result<Option<FinalizedRecord>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FinalizedRecord>(
        r#"SELECT job_id, kind, source, finalized_at FROM finalized_jobs WHERE job_id = ?"#,
    )
    .bind(job_id)
    .fetch_optional(executor)
    .await
}

/// Delete markers older than `max_age`; returns the number removed
pub async fn cleanup_old_markers(
    pool: &DbPool,
    max_age: Duration,
) -> std::result::Result<u64, sqlx::Error> {
    let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
        return Ok(0);
    };
    let result = sqlx::query(r#"DELETE FROM finalized_jobs WHERE finalized_at < ?"#)
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn already_finalized(record: FinalizedRecord) -> Result<Finalize> {
    let kind = TerminalKind::parse(&record.kind).ok_or_else(|| {
        AppError::Internal(format!("unknown stored terminal kind: {}", record.kind))
    })?;
    let source = CompletionSource::parse(&record.source).ok_or_else(|| {
        AppError::Internal(format!("unknown stored source: {}", record.source))
    })?;
    Ok(Finalize::AlreadyFinalized { kind, source })
}

/// [`FinalizedStore`] that survives restarts
#[derive(Debug, Clone)]
pub struct SqliteFinalizedStore {
    pool: DbPool,
}

impl SqliteFinalizedStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl FinalizedStore for SqliteFinalizedStore {
    async fn try_finalize(
        &self,
        keys: &[&str],
        kind: TerminalKind,
        source: CompletionSource,
    ) -> Result<Finalize> {
        let mut tx = self.pool.begin().await?;

        for key in keys {
            if insert_marker(&mut *tx, key, kind, source).await? {
                continue;
            }

            let record = get_marker(&mut *tx, key).await?.ok_or_else(|| {
                AppError::Internal(format!("finalized marker for {} vanished", key))
            })?;
            // Markers inserted for earlier keys go with the rollback
            tx.rollback().await?;
            return already_finalized(record);
        }

        tx.commit().await?;
        Ok(Finalize::First)
    }

    async fn cleanup_older_than(&self, max_age: std::time::Duration) -> Result<u64> {
        let max_age = Duration::from_std(max_age)
            .map_err(|_| AppError::InvalidInput(format!("retention out of range: {:?}", max_age)))?;
        Ok(cleanup_old_markers(&self.pool, max_age).await?)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
