use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use partition_core::config::RegistryConfig;
use partition_core::{
    DynamicPartitionsStore, EngineMetrics, PartitionError, PartitionResult, StructuredLogger,
};

use crate::partition_key::check_dimension_value;

/// Consistency wrapper over a `DynamicPartitionsStore`.
///
/// Mutations on the same definition name are serialized through a per-name lock, so the
/// duplicate and not-found checks always see the outcome of the previous mutation. Reads
/// take no lock and observe whatever the store has committed.
pub struct DynamicPartitionRegistry {
    store: Arc<dyn DynamicPartitionsStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    operation_timeout: Duration,
}

impl DynamicPartitionRegistry {
    pub fn new(store: Arc<dyn DynamicPartitionsStore>, config: &RegistryConfig) -> Self {
        Self::with_timeout(store, config.operation_timeout())
    }

    pub fn with_timeout(store: Arc<dyn DynamicPartitionsStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            operation_timeout,
        }
    }

    fn definition_lock(&self, definition: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(definition.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn call<T, F>(&self, definition: &str, operation: F) -> PartitionResult<T>
    where
        F: Future<Output = PartitionResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(PartitionError::registry_unavailable(
                definition,
                format!("操作超时 ({:?})", self.operation_timeout),
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn register_definition(&self, definition: &str) -> PartitionResult<()> {
        if definition.trim().is_empty() {
            return Err(PartitionError::invalid_definition(definition, "动态分区定义名称不能为空"));
        }
        self.call(definition, self.store.register_definition(definition))
            .await
    }

    /// Keys in insertion order.
    pub async fn list_keys(&self, definition: &str) -> PartitionResult<Vec<String>> {
        self.call(definition, self.store.get_partitions(definition))
            .await?
            .ok_or_else(|| PartitionError::ExternalLookup {
                definition: definition.to_string(),
            })
    }

    pub async fn has_key(&self, definition: &str, key: &str) -> PartitionResult<bool> {
        Ok(self.list_keys(definition).await?.iter().any(|k| k == key))
    }

    /// Adds every key or none. Keys already present are reported as `DuplicateKeys`.
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn add_keys(&self, definition: &str, keys: &[String]) -> PartitionResult<Vec<String>> {
        let result = self.add_keys_locked(definition, keys).await;
        match &result {
            Ok(added) => {
                StructuredLogger::log_dynamic_partitions_added(definition, added);
                EngineMetrics::record_dynamic_added(definition, added.len());
            }
            Err(error) => StructuredLogger::log_dynamic_mutation_rejected(definition, error),
        }
        result
    }

    async fn add_keys_locked(&self, definition: &str, keys: &[String]) -> PartitionResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut repeated = Vec::new();
        for key in keys {
            check_dimension_value(definition, key)?;
            if !seen.insert(key.as_str()) && !repeated.contains(key) {
                repeated.push(key.clone());
            }
        }
        if !repeated.is_empty() {
            return Err(PartitionError::DuplicateKeys {
                definition: definition.to_string(),
                keys: repeated,
            });
        }

        let lock = self.definition_lock(definition);
        let _guard = lock.lock().await;

        let existing: HashSet<String> = self.list_keys(definition).await?.into_iter().collect();
        let duplicates: Vec<String> = keys.iter().filter(|k| existing.contains(*k)).cloned().collect();
        if !duplicates.is_empty() {
            return Err(PartitionError::DuplicateKeys {
                definition: definition.to_string(),
                keys: duplicates,
            });
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        debug!(definition, "Committing dynamic partitions");
        self.call(definition, self.store.add_partitions(definition, keys))
            .await
    }

    /// Deletes every key or none. Keys not present are reported as `KeysNotFound`.
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn delete_keys(&self, definition: &str, keys: &[String]) -> PartitionResult<()> {
        let result = self.delete_keys_locked(definition, keys).await;
        match &result {
            Ok(()) => {
                StructuredLogger::log_dynamic_partitions_deleted(definition, keys);
                EngineMetrics::record_dynamic_deleted(definition, keys.len());
            }
            Err(error) => StructuredLogger::log_dynamic_mutation_rejected(definition, error),
        }
        result
    }

    async fn delete_keys_locked(&self, definition: &str, keys: &[String]) -> PartitionResult<()> {
        let lock = self.definition_lock(definition);
        let _guard = lock.lock().await;

        let existing: HashSet<String> = self.list_keys(definition).await?.into_iter().collect();
        let mut missing: Vec<String> = Vec::new();
        for key in keys {
            if !existing.contains(key) && !missing.contains(key) {
                missing.push(key.clone());
            }
        }
        if !missing.is_empty() {
            return Err(PartitionError::KeysNotFound {
                definition: definition.to_string(),
                keys: missing,
            });
        }
        if keys.is_empty() {
            return Ok(());
        }

        self.call(definition, self.store.delete_partitions(definition, keys))
            .await
    }
}
