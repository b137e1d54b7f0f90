use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use partition_core::{DynamicPartitionsStore, PartitionError, PartitionResult};

/// Dynamic partition store kept in process memory. Each call runs under one lock, so
/// every mutation is all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryDynamicPartitionsStore {
    definitions: RwLock<BTreeMap<String, Vec<String>>>,
}

impl InMemoryDynamicPartitionsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unregistered(definition: &str) -> PartitionError {
    PartitionError::ExternalLookup {
        definition: definition.to_string(),
    }
}

#[async_trait]
impl DynamicPartitionsStore for InMemoryDynamicPartitionsStore {
    async fn register_definition(&self, definition: &str) -> PartitionResult<()> {
        self.definitions
            .write()
            .await
            .entry(definition.to_string())
            .or_default();
        Ok(())
    }

    async fn get_partitions(&self, definition: &str) -> PartitionResult<Option<Vec<String>>> {
        Ok(self.definitions.read().await.get(definition).cloned())
    }

    async fn add_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<Vec<String>> {
        let mut definitions = self.definitions.write().await;
        let existing = definitions
            .get_mut(definition)
            .ok_or_else(|| unregistered(definition))?;

        let present: HashSet<&String> = existing.iter().collect();
        let duplicates: Vec<String> = keys.iter().filter(|k| present.contains(k)).cloned().collect();
        if !duplicates.is_empty() {
            return Err(PartitionError::DuplicateKeys {
                definition: definition.to_string(),
                keys: duplicates,
            });
        }

        existing.extend(keys.iter().cloned());
        Ok(keys.to_vec())
    }

    async fn delete_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<()> {
        let mut definitions = self.definitions.write().await;
        let existing = definitions
            .get_mut(definition)
            .ok_or_else(|| unregistered(definition))?;

        let missing: Vec<String> = keys.iter().filter(|k| !existing.contains(k)).cloned().collect();
        if !missing.is_empty() {
            return Err(PartitionError::KeysNotFound {
                definition: definition.to_string(),
                keys: missing,
            });
        }

        let removed: HashSet<&String> = keys.iter().collect();
        existing.retain(|k| !removed.contains(k));
        Ok(())
    }
}
