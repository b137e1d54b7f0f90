pub mod backfill_store;
pub mod dynamic_partitions;
pub mod run_ledger;
pub mod run_query_builder;

pub use backfill_store::SqliteBackfillStore;
pub use dynamic_partitions::SqliteDynamicPartitionsStore;
pub use run_ledger::SqliteRunLedger;
pub use run_query_builder::{RunQueryBuilder, RunQueryParam};
