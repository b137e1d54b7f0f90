use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use partition_core::{PartitionError, PartitionResult, RunLedgerQuery, RunRecord, RunStatus, RunsFilter};

use super::run_query_builder::{RunQueryBuilder, RunQueryParam};

/// Run ledger backed by the `runs` / `run_tags` tables.
pub struct SqliteRunLedger {
    pool: SqlitePool,
}

impl SqliteRunLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upserts a run and replaces its tags. Re-recording keeps the run's position in the
    /// newest-first order.
    #[instrument(skip(self, run), fields(run_id = %run.run_id, status = %run.status))]
    pub async fn record(&self, run: &RunRecord) -> PartitionResult<()> {
        let unavailable = |e: sqlx::Error| {
            PartitionError::ledger_unavailable(
                run.tag(partition_core::tags::PARTITION_SET_TAG).unwrap_or("*"),
                e.to_string(),
            )
        };

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, status, created_at, start_time, end_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                start_time = excluded.start_time,
                end_time = excluded.end_time
            "#,
        )
        .bind(&run.run_id)
        .bind(run.status)
        .bind(run.created_at)
        .bind(run.start_time)
        .bind(run.end_time)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        sqlx::query("DELETE FROM run_tags WHERE run_id = ?")
            .bind(&run.run_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        for (key, value) in &run.tags {
            sqlx::query("INSERT INTO run_tags (run_id, key, value) VALUES (?, ?, ?)")
                .bind(&run.run_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        debug!("Recorded run");
        Ok(())
    }

    async fn load_tags(
        &self,
        run_ids: &[String],
    ) -> Result<HashMap<String, BTreeMap<String, String>>, sqlx::Error> {
        let mut tags: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        if run_ids.is_empty() {
            return Ok(tags);
        }

        let sql = RunQueryBuilder::build_tags_query(run_ids.len());
        let mut query = sqlx::query(&sql);
        for run_id in run_ids {
            query = query.bind(run_id);
        }

        for row in query.fetch_all(&self.pool).await? {
            let run_id: String = row.try_get("run_id")?;
            tags.entry(run_id)
                .or_default()
                .insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(tags)
    }

    fn row_to_run(row: &SqliteRow) -> Result<RunRecord, sqlx::Error> {
        Ok(RunRecord {
            run_id: row.try_get("run_id")?,
            status: row.try_get::<RunStatus, _>("status")?,
            tags: BTreeMap::new(),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        })
    }
}

#[async_trait]
impl RunLedgerQuery for SqliteRunLedger {
    #[instrument(skip(self, filter), fields(partition_set = %filter.partition_set()))]
    async fn find(
        &self,
        filter: &RunsFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>> {
        let unavailable =
            |e: sqlx::Error| PartitionError::ledger_unavailable(filter.partition_set(), e.to_string());

        let (sql, params) = RunQueryBuilder::build_find_query(filter, cursor, limit);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = match param {
                RunQueryParam::Text(value) => query.bind(value),
                RunQueryParam::Int64(value) => query.bind(value),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(unavailable)?;
        let mut runs = rows
            .iter()
            .map(Self::row_to_run)
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        let run_ids: Vec<String> = runs.iter().map(|r| r.run_id.clone()).collect();
        let mut tags = self.load_tags(&run_ids).await.map_err(unavailable)?;
        for run in &mut runs {
            run.tags = tags.remove(&run.run_id).unwrap_or_default();
        }

        debug!(count = runs.len(), "Ledger lookup complete");
        Ok(runs)
    }
}
