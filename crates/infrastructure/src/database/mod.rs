pub mod sqlite;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use partition_core::config::DatabaseConfig;

use sqlite::{SqliteBackfillStore, SqliteDynamicPartitionsStore, SqliteRunLedger};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_tags (
        run_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (run_id, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dynamic_partition_definitions (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dynamic_partitions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        definition TEXT NOT NULL,
        partition_key TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (definition, partition_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backfills (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        repository_name TEXT NOT NULL,
        partition_set_name TEXT NOT NULL,
        state TEXT NOT NULL,
        version INTEGER NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_run_tags_key_value ON run_tags(key, value)",
    "CREATE INDEX IF NOT EXISTS idx_dynamic_partitions_definition ON dynamic_partitions(definition)",
    "CREATE INDEX IF NOT EXISTS idx_backfills_partition_set ON backfills(repository_name, partition_set_name)",
];

/// SQLite数据库管理器
///
/// 负责连接池创建、表结构迁移，并为各个存储端口构造仓库实现。
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Each connection to `sqlite::memory:` is a separate database; pin the pool to one.
        let (max_connections, min_connections) = if config.is_in_memory() {
            (1, 1)
        } else {
            (config.max_connections, config.min_connections)
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)); // 30分钟默认生命周期
        if config.is_in_memory() {
            // Recycling the only connection would drop the database
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接数据库失败")?;

        info!(url = %config.url, max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    /// In-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let manager = Self::new(&DatabaseConfig::in_memory()).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        debug!("Running SQLite migrations");
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("执行数据库迁移失败")?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("数据库健康检查失败")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn run_ledger(&self) -> Arc<SqliteRunLedger> {
        Arc::new(SqliteRunLedger::new(self.pool.clone()))
    }

    pub fn dynamic_partitions_store(&self) -> Arc<SqliteDynamicPartitionsStore> {
        Arc::new(SqliteDynamicPartitionsStore::new(self.pool.clone()))
    }

    pub fn backfill_store(&self) -> Arc<SqliteBackfillStore> {
        Arc::new(SqliteBackfillStore::new(self.pool.clone()))
    }
}

/// `?, ?, ?` for an `IN (...)` list.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_manager() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        assert!(manager.health_check().await.is_ok());
        // Migrations are re-runnable.
        manager.migrate().await.unwrap();
        manager.close().await;
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..DatabaseConfig::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
