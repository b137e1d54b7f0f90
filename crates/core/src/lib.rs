pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod traits;

pub use errors::*;
pub use logging::StructuredLogger;
pub use metrics::EngineMetrics;
pub use models::{
    tags, Backfill, BackfillState, DynamicPartitionsState, FailurePolicy, PartitionSetOrigin,
    RunRecord, RunStatus, RunsFilter,
};
pub use traits::{
    BackfillStore, Clock, DynamicPartitionsStore, FixedClock, RunLedgerQuery, SystemClock,
};
