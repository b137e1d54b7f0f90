pub mod backfill;
pub mod dynamic_partitions;
pub mod run;

pub use backfill::{Backfill, BackfillState, FailurePolicy, PartitionSetOrigin};
pub use dynamic_partitions::DynamicPartitionsState;
pub use run::{tags, RunRecord, RunStatus, RunsFilter};
