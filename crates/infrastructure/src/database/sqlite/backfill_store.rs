use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use partition_core::{Backfill, BackfillStore, PartitionError, PartitionResult};

/// Backfills stored as JSON bodies with the version and lookup columns pulled out.
pub struct SqliteBackfillStore {
    pool: SqlitePool,
}

impl SqliteBackfillStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_backfill(row: &SqliteRow) -> PartitionResult<Backfill> {
        let body: String = row.try_get("body").map_err(store_error)?;
        let version: i64 = row.try_get("version").map_err(store_error)?;
        let mut backfill: Backfill = serde_json::from_str(&body).map_err(|e| {
            PartitionError::BackfillStore {
                message: format!("回填记录反序列化失败: {e}"),
            }
        })?;
        backfill.version = u64::try_from(version).unwrap_or_default();
        Ok(backfill)
    }
}

fn store_error(error: sqlx::Error) -> PartitionError {
    PartitionError::BackfillStore {
        message: error.to_string(),
    }
}

fn encode(backfill: &Backfill) -> PartitionResult<String> {
    serde_json::to_string(backfill).map_err(|e| PartitionError::BackfillStore {
        message: format!("回填记录序列化失败: {e}"),
    })
}

fn version_param(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

#[async_trait]
impl BackfillStore for SqliteBackfillStore {
    #[instrument(skip(self, backfill), fields(backfill_id = %backfill.id))]
    async fn insert(&self, backfill: &Backfill) -> PartitionResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO backfills (id, repository_name, partition_set_name, state, version, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&backfill.id)
        .bind(&backfill.origin.repository_name)
        .bind(&backfill.origin.partition_set_name)
        .bind(backfill.state.as_str())
        .bind(version_param(backfill.version))
        .bind(encode(backfill)?)
        .bind(backfill.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PartitionError::BackfillStore {
                    message: format!("回填已存在: {}", backfill.id),
                })
            }
            Err(e) => Err(store_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> PartitionResult<Option<Backfill>> {
        let row = sqlx::query("SELECT body, version FROM backfills WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(Self::row_to_backfill).transpose()
    }

    #[instrument(skip(self, next), fields(backfill_id = %next.id))]
    async fn compare_and_set(&self, expected_version: u64, next: &Backfill) -> PartitionResult<bool> {
        let mut stored = next.clone();
        stored.version = expected_version + 1;

        let result = sqlx::query(
            "UPDATE backfills SET state = ?, version = ?, body = ? WHERE id = ? AND version = ?",
        )
        .bind(stored.state.as_str())
        .bind(version_param(stored.version))
        .bind(encode(&stored)?)
        .bind(&next.id)
        .bind(version_param(expected_version))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM backfills WHERE id = ?")
            .bind(&next.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        match exists {
            Some(_) => {
                debug!(expected_version, "Backfill version conflict");
                Ok(false)
            }
            None => Err(PartitionError::BackfillNotFound { id: next.id.clone() }),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, cursor: Option<&str>, limit: Option<usize>) -> PartitionResult<Vec<Backfill>> {
        let before_seq = match cursor {
            Some(cursor) => {
                let row = sqlx::query("SELECT seq FROM backfills WHERE id = ?")
                    .bind(cursor)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_error)?
                    .ok_or_else(|| PartitionError::InvalidCursor {
                        cursor: cursor.to_string(),
                    })?;
                row.try_get::<i64, _>("seq").map_err(store_error)?
            }
            None => i64::MAX,
        };
        // LIMIT -1 is unbounded in SQLite
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query(
            "SELECT body, version FROM backfills WHERE seq < ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(before_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(Self::row_to_backfill).collect()
    }
}
