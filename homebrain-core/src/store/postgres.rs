use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{validate_thread_id, CheckpointStore, StoreError};
use crate::checkpoint::TurnCheckpoint;

/// PostgreSQL-backed store. One row per thread; the `version` column is the
/// compare-and-swap guard.
pub struct PostgresCheckpointStore {
    pool: PgPool,
    table: String,
}

impl PostgresCheckpointStore {
    /// Checkpoints live in `homebrain_checkpoints` by default.
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, "homebrain_checkpoints")
    }

    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// Create the table if missing. Idempotent.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                thread_id  TEXT PRIMARY KEY,
                version    BIGINT NOT NULL,
                data       JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table = self.table,
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn current_version(&self, thread_id: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT version FROM {} WHERE thread_id = $1", self.table);
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(|(v,)| v as u64).unwrap_or(0))
    }
}

fn sql_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TurnCheckpoint>, StoreError> {
        validate_thread_id(thread_id)?;
        let sql = format!(
            "SELECT version, data FROM {} WHERE thread_id = $1",
            self.table
        );
        let row: Option<(i64, Json<TurnCheckpoint>)> = sqlx::query_as(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;

        Ok(row.map(|(version, Json(mut checkpoint))| {
            checkpoint.version = version as u64;
            checkpoint
        }))
    }

    async fn save(&self, checkpoint: &TurnCheckpoint) -> Result<u64, StoreError> {
        validate_thread_id(&checkpoint.thread_id)?;

        let expected = checkpoint.version;
        let mut stored = checkpoint.clone();
        stored.version = expected + 1;

        let result = if expected == 0 {
            let sql = format!(
                "INSERT INTO {} (thread_id, version, data, updated_at) VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (thread_id) DO NOTHING",
                self.table
            );
            sqlx::query(&sql)
                .bind(&stored.thread_id)
                .bind(stored.version as i64)
                .bind(Json(&stored))
                .execute(&self.pool)
                .await
        } else {
            let sql = format!(
                "UPDATE {} SET version = $2, data = $3, updated_at = now() \
                 WHERE thread_id = $1 AND version = $4",
                self.table
            );
            sqlx::query(&sql)
                .bind(&stored.thread_id)
                .bind(stored.version as i64)
                .bind(Json(&stored))
                .bind(expected as i64)
                .execute(&self.pool)
                .await
        }
        .map_err(sql_err)?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(&checkpoint.thread_id).await?;
            return Err(StoreError::VersionConflict {
                thread_id: checkpoint.thread_id.clone(),
                expected,
                actual,
            });
        }

        Ok(stored.version)
    }
}
