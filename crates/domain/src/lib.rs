pub mod aggregator;
pub mod backfill;
pub mod definitions;
pub mod dynamic_registry;
pub mod key_space;
pub mod partition_key;
pub mod partition_set;
pub mod service;
pub mod time_window;

pub use aggregator::{PartitionRunStatus, PartitionStatus, PartitionStatusAggregator, StatusCounts};
pub use backfill::{
    BackfillStatusCounts, BackfillStatusSnapshot, BackfillStatusTracker, CreateBackfillRequest,
};
pub use definitions::{
    DimensionDefinitionType, DynamicPartitions, MultiPartitions, PartitionDefinition,
    PartitionDefinitionType, PartitionDimension, StaticPartitions,
};
pub use dynamic_registry::DynamicPartitionRegistry;
pub use key_space::{DimensionPartitionKeys, PartitionKeySpace, SnapshotToken};
pub use partition_key::{MultiPartitionKey, PartitionKey, MULTI_PARTITION_KEY_DELIMITER};
pub use partition_set::{PartitionSet, PartitionSetCatalog};
pub use service::{
    BackfillTarget, PartitionDefinitionInfo, PartitionService, PartitionSetSelector,
    ServiceDependencies,
};
pub use time_window::{TimeWindow, TimeWindowPartitions, WindowSchedule};
