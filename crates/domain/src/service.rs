use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use partition_core::config::AppConfig;
use partition_core::{
    tags, Backfill, BackfillStore, Clock, DynamicPartitionsStore, FailurePolicy, PartitionError,
    PartitionResult, RunLedgerQuery, RunRecord, RunsFilter,
};

use crate::aggregator::{PartitionStatus, PartitionStatusAggregator, StatusCounts};
use crate::backfill::{BackfillStatusSnapshot, BackfillStatusTracker, CreateBackfillRequest};
use crate::definitions::{DimensionDefinitionType, PartitionDefinitionType};
use crate::dynamic_registry::DynamicPartitionRegistry;
use crate::key_space::{DimensionPartitionKeys, SnapshotToken};
use crate::partition_key::PartitionKey;
use crate::partition_set::{PartitionSet, PartitionSetCatalog};

/// Identifies a partition set within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionSetSelector {
    pub repository_name: String,
    pub partition_set_name: String,
}

impl PartitionSetSelector {
    pub fn new(repository_name: impl Into<String>, partition_set_name: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            partition_set_name: partition_set_name.into(),
        }
    }
}

/// Collaborators the engine consumes. Each is injected; nothing is looked up globally.
#[derive(Clone)]
pub struct ServiceDependencies {
    pub ledger: Arc<dyn RunLedgerQuery>,
    pub dynamic_store: Arc<dyn DynamicPartitionsStore>,
    pub backfill_store: Arc<dyn BackfillStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionDefinitionInfo {
    pub partition_set_id: String,
    pub definition_type: PartitionDefinitionType,
    pub description: String,
    pub dimension_types: Vec<DimensionDefinitionType>,
}

/// Which partitions a new backfill targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillTarget {
    AllPartitions,
    Partitions(Vec<String>),
}

/// Partition-set queries and mutations exposed to the serving layer.
pub struct PartitionService {
    catalog: Arc<PartitionSetCatalog>,
    registry: Arc<DynamicPartitionRegistry>,
    aggregator: Arc<PartitionStatusAggregator>,
    tracker: Arc<BackfillStatusTracker>,
    clock: Arc<dyn Clock>,
}

impl PartitionService {
    pub fn new(catalog: Arc<PartitionSetCatalog>, deps: ServiceDependencies, config: &AppConfig) -> Self {
        let registry = Arc::new(DynamicPartitionRegistry::new(deps.dynamic_store, &config.registry));
        let aggregator = Arc::new(PartitionStatusAggregator::new(deps.ledger, config.ledger.clone()));
        let tracker = Arc::new(BackfillStatusTracker::new(
            deps.backfill_store,
            aggregator.clone(),
            deps.clock.clone(),
            config.backfill.clone(),
        ));
        Self {
            catalog,
            registry,
            aggregator,
            tracker,
            clock: deps.clock,
        }
    }

    pub fn catalog(&self) -> &PartitionSetCatalog {
        &self.catalog
    }

    pub fn partition_set(&self, selector: &PartitionSetSelector) -> PartitionResult<Arc<PartitionSet>> {
        self.catalog
            .get(&selector.repository_name, &selector.partition_set_name)
    }

    /// Freezes the inputs of key enumeration so repeated listings agree.
    pub async fn snapshot(&self, selector: &PartitionSetSelector) -> PartitionResult<SnapshotToken> {
        let set = self.partition_set(selector)?;
        set.key_space()
            .snapshot(self.clock.as_ref(), &self.registry)
            .await
    }

    #[instrument(skip(self, as_of), fields(partition_set = %selector.partition_set_name))]
    pub async fn list_partition_keys(
        &self,
        selector: &PartitionSetSelector,
        as_of: Option<&SnapshotToken>,
    ) -> PartitionResult<Vec<PartitionKey>> {
        let set = self.partition_set(selector)?;
        set.key_space()
            .keys(as_of, self.clock.as_ref(), &self.registry)
            .await
    }

    async fn encoded_keys(
        &self,
        set: &PartitionSet,
        as_of: Option<&SnapshotToken>,
    ) -> PartitionResult<Vec<String>> {
        let key_space = set.key_space();
        match as_of {
            Some(token) => key_space.encoded_keys_at(token),
            None => {
                let token = key_space.snapshot(self.clock.as_ref(), &self.registry).await?;
                key_space.encoded_keys_at(&token)
            }
        }
    }

    /// A page of keys strictly after `cursor`, in declaration order or reversed.
    pub async fn list_partitions(
        &self,
        selector: &PartitionSetSelector,
        cursor: Option<&str>,
        limit: Option<usize>,
        reverse: bool,
    ) -> PartitionResult<Vec<PartitionKey>> {
        let mut keys = self.list_partition_keys(selector, None).await?;
        if reverse {
            keys.reverse();
        }
        let start = match cursor {
            Some(cursor) => {
                keys.iter()
                    .position(|k| k.encode() == cursor)
                    .ok_or_else(|| PartitionError::InvalidCursor {
                        cursor: cursor.to_string(),
                    })?
                    + 1
            }
            None => 0,
        };
        let end = limit.map_or(keys.len(), |limit| (start + limit).min(keys.len()));
        Ok(keys.drain(start..end).collect())
    }

    pub async fn get_partition_status(
        &self,
        selector: &PartitionSetSelector,
        partition_key: &str,
    ) -> PartitionResult<PartitionStatus> {
        let set = self.partition_set(selector)?;
        self.aggregator.status_of(set.name(), partition_key).await
    }

    pub async fn get_status_counts(
        &self,
        selector: &PartitionSetSelector,
        keys: &[String],
    ) -> PartitionResult<StatusCounts> {
        let set = self.partition_set(selector)?;
        self.aggregator.status_counts(set.name(), keys).await
    }

    /// Status of every partition in the set, via one paged scan of the ledger.
    pub async fn get_partition_statuses(
        &self,
        selector: &PartitionSetSelector,
        as_of: Option<&SnapshotToken>,
    ) -> PartitionResult<Vec<PartitionStatus>> {
        let set = self.partition_set(selector)?;
        let keys = self.encoded_keys(&set, as_of).await?;
        self.aggregator.partition_statuses(set.name(), &keys).await
    }

    pub async fn get_partition_runs(
        &self,
        selector: &PartitionSetSelector,
        partition_key: &str,
        filter: Option<RunsFilter>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>> {
        let set = self.partition_set(selector)?;
        self.aggregator
            .partition_runs(set.name(), partition_key, filter, cursor, limit)
            .await
    }

    pub fn partition_tags(
        &self,
        selector: &PartitionSetSelector,
        partition_key: &str,
    ) -> PartitionResult<BTreeMap<String, String>> {
        let set = self.partition_set(selector)?;
        let key = set.parse_key(partition_key)?;
        Ok(set.partition_tags(&key))
    }

    pub fn partition_definition_info(
        &self,
        selector: &PartitionSetSelector,
    ) -> PartitionResult<PartitionDefinitionInfo> {
        let set = self.partition_set(selector)?;
        Ok(PartitionDefinitionInfo {
            partition_set_id: set.id(),
            definition_type: set.definition.definition_type(),
            description: set.definition.describe(),
            dimension_types: set.definition.dimension_types(),
        })
    }

    pub async fn dimension_keys(
        &self,
        selector: &PartitionSetSelector,
        as_of: Option<&SnapshotToken>,
    ) -> PartitionResult<Vec<DimensionPartitionKeys>> {
        let set = self.partition_set(selector)?;
        let key_space = set.key_space();
        match as_of {
            Some(token) => key_space.dimension_keys_at(token),
            None => {
                let token = key_space.snapshot(self.clock.as_ref(), &self.registry).await?;
                key_space.dimension_keys_at(&token)
            }
        }
    }

    /// Resolves the target against the current key space and records a new backfill.
    #[instrument(skip(self, target), fields(partition_set = %selector.partition_set_name))]
    pub async fn create_backfill(
        &self,
        selector: &PartitionSetSelector,
        target: BackfillTarget,
        failure_policy: Option<FailurePolicy>,
    ) -> PartitionResult<Backfill> {
        let set = self.partition_set(selector)?;
        let all_keys = self.encoded_keys(&set, None).await?;

        let (target_keys, from_full_set) = match target {
            BackfillTarget::AllPartitions => (all_keys, true),
            BackfillTarget::Partitions(keys) => {
                let known: HashSet<&str> = all_keys.iter().map(String::as_str).collect();
                let unknown: Vec<String> = keys
                    .iter()
                    .filter(|k| !known.contains(k.as_str()))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(PartitionError::UnknownPartitionKeys {
                        partition_set: set.name().to_string(),
                        keys: unknown,
                    });
                }
                (keys, false)
            }
        };

        self.tracker
            .create(CreateBackfillRequest {
                origin: set.origin.clone(),
                target_keys,
                from_full_set,
                failure_policy,
            })
            .await
    }

    /// Tags for a child run of a backfill: partition tags plus the backfill id.
    pub async fn backfill_run_tags(
        &self,
        backfill_id: &str,
        partition_key: &str,
    ) -> PartitionResult<BTreeMap<String, String>> {
        let backfill = self.tracker.get(backfill_id).await?;
        let selector = PartitionSetSelector::new(
            &backfill.origin.repository_name,
            &backfill.origin.partition_set_name,
        );
        let mut run_tags = self.partition_tags(&selector, partition_key)?;
        run_tags.insert(tags::BACKFILL_ID_TAG.to_string(), backfill.id);
        Ok(run_tags)
    }

    pub async fn record_backfill_run_launched(
        &self,
        backfill_id: &str,
        partition_key: &str,
    ) -> PartitionResult<Backfill> {
        self.tracker.record_run_launched(backfill_id, partition_key).await
    }

    pub async fn cancel_backfill(&self, backfill_id: &str) -> PartitionResult<Backfill> {
        self.tracker.cancel(backfill_id).await
    }

    pub async fn get_backfill_status(&self, backfill_id: &str) -> PartitionResult<BackfillStatusSnapshot> {
        self.tracker.status(backfill_id).await
    }

    pub async fn list_backfills(
        &self,
        selector: &PartitionSetSelector,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<Backfill>> {
        self.tracker
            .list_for_partition_set(
                &selector.repository_name,
                &selector.partition_set_name,
                cursor,
                limit,
            )
            .await
    }

    pub async fn register_dynamic_definition(&self, definition: &str) -> PartitionResult<()> {
        self.registry.register_definition(definition).await
    }

    pub async fn add_dynamic_partitions(
        &self,
        definition: &str,
        keys: &[String],
    ) -> PartitionResult<Vec<String>> {
        self.registry.add_keys(definition, keys).await
    }

    pub async fn delete_dynamic_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<()> {
        self.registry.delete_keys(definition, keys).await
    }

    pub async fn list_dynamic_partitions(&self, definition: &str) -> PartitionResult<Vec<String>> {
        self.registry.list_keys(definition).await
    }
}
