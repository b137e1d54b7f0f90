use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

use partition_core::{DynamicPartitionsStore, PartitionError, PartitionResult};

use crate::database::placeholders;

/// Dynamic partition keys persisted in `dynamic_partitions`. Each mutation runs in one
/// transaction.
pub struct SqliteDynamicPartitionsStore {
    pool: SqlitePool,
}

impl SqliteDynamicPartitionsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn ensure_registered(
        tx: &mut Transaction<'_, Sqlite>,
        definition: &str,
    ) -> PartitionResult<()> {
        let registered = sqlx::query("SELECT 1 FROM dynamic_partition_definitions WHERE name = ?")
            .bind(definition)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| unavailable(definition, e))?;
        match registered {
            Some(_) => Ok(()),
            None => Err(PartitionError::ExternalLookup {
                definition: definition.to_string(),
            }),
        }
    }

    /// Subset of `keys` already stored for the definition.
    async fn present_keys(
        tx: &mut Transaction<'_, Sqlite>,
        definition: &str,
        keys: &[String],
    ) -> PartitionResult<Vec<String>> {
        let sql = format!(
            "SELECT partition_key FROM dynamic_partitions WHERE definition = ? AND partition_key IN ({})",
            placeholders(keys.len())
        );
        let mut query = sqlx::query(&sql).bind(definition);
        for key in keys {
            query = query.bind(key);
        }
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| unavailable(definition, e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("partition_key"))
            .collect::<Result<_, _>>()
            .map_err(|e| unavailable(definition, e))
    }
}

fn unavailable(definition: &str, error: sqlx::Error) -> PartitionError {
    PartitionError::registry_unavailable(definition, error.to_string())
}

#[async_trait]
impl DynamicPartitionsStore for SqliteDynamicPartitionsStore {
    #[instrument(skip(self))]
    async fn register_definition(&self, definition: &str) -> PartitionResult<()> {
        sqlx::query("INSERT OR IGNORE INTO dynamic_partition_definitions (name, created_at) VALUES (?, ?)")
            .bind(definition)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable(definition, e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_partitions(&self, definition: &str) -> PartitionResult<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await.map_err(|e| unavailable(definition, e))?;
        match Self::ensure_registered(&mut tx, definition).await {
            Ok(()) => {}
            Err(PartitionError::ExternalLookup { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let rows = sqlx::query(
            "SELECT partition_key FROM dynamic_partitions WHERE definition = ? ORDER BY seq",
        )
        .bind(definition)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| unavailable(definition, e))?;
        tx.commit().await.map_err(|e| unavailable(definition, e))?;

        let keys = rows
            .iter()
            .map(|row| row.try_get::<String, _>("partition_key"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| unavailable(definition, e))?;
        Ok(Some(keys))
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn add_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(|e| unavailable(definition, e))?;
        Self::ensure_registered(&mut tx, definition).await?;

        if !keys.is_empty() {
            let mut duplicates = Self::present_keys(&mut tx, definition, keys).await?;
            if !duplicates.is_empty() {
                // Report in request order
                duplicates.sort_by_key(|d| keys.iter().position(|k| k == d));
                return Err(PartitionError::DuplicateKeys {
                    definition: definition.to_string(),
                    keys: duplicates,
                });
            }
        }

        let now = Utc::now();
        for key in keys {
            sqlx::query(
                "INSERT INTO dynamic_partitions (definition, partition_key, created_at) VALUES (?, ?, ?)",
            )
            .bind(definition)
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable(definition, e))?;
        }

        tx.commit().await.map_err(|e| unavailable(definition, e))?;
        debug!("Added dynamic partitions");
        Ok(keys.to_vec())
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| unavailable(definition, e))?;
        Self::ensure_registered(&mut tx, definition).await?;

        if keys.is_empty() {
            return Ok(());
        }

        let present = Self::present_keys(&mut tx, definition, keys).await?;
        let missing: Vec<String> = keys.iter().filter(|k| !present.contains(k)).cloned().collect();
        if !missing.is_empty() {
            return Err(PartitionError::KeysNotFound {
                definition: definition.to_string(),
                keys: missing,
            });
        }

        let sql = format!(
            "DELETE FROM dynamic_partitions WHERE definition = ? AND partition_key IN ({})",
            placeholders(keys.len())
        );
        let mut query = sqlx::query(&sql).bind(definition);
        for key in keys {
            query = query.bind(key);
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable(definition, e))?;

        tx.commit().await.map_err(|e| unavailable(definition, e))?;
        debug!("Deleted dynamic partitions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_list_delete() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.dynamic_partitions_store();

        assert_eq!(store.get_partitions("customers").await.unwrap(), None);
        store.register_definition("customers").await.unwrap();
        assert_eq!(store.get_partitions("customers").await.unwrap(), Some(vec![]));

        store.add_partitions("customers", &keys(&["b", "a"])).await.unwrap();
        assert_eq!(
            store.get_partitions("customers").await.unwrap(),
            Some(keys(&["b", "a"]))
        );

        store.delete_partitions("customers", &keys(&["b"])).await.unwrap();
        assert_eq!(store.get_partitions("customers").await.unwrap(), Some(keys(&["a"])));
    }

    #[tokio::test]
    async fn test_rejections_are_atomic() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.dynamic_partitions_store();
        store.register_definition("customers").await.unwrap();
        store.add_partitions("customers", &keys(&["a", "b"])).await.unwrap();

        match store.add_partitions("customers", &keys(&["c", "b", "a"])).await {
            Err(PartitionError::DuplicateKeys { keys: dup, .. }) => assert_eq!(dup, keys(&["b", "a"])),
            other => panic!("unexpected result: {other:?}"),
        }
        match store.delete_partitions("customers", &keys(&["a", "z"])).await {
            Err(PartitionError::KeysNotFound { keys: missing, .. }) => assert_eq!(missing, keys(&["z"])),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            store.get_partitions("customers").await.unwrap(),
            Some(keys(&["a", "b"]))
        );

        assert!(matches!(
            store.add_partitions("vendors", &keys(&["x"])).await,
            Err(PartitionError::ExternalLookup { .. })
        ));
    }
}
