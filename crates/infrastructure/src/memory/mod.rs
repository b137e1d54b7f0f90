//! In-process implementations of the engine's storage ports, used by tests and the
//! embedded deployment.

pub mod backfill_store;
pub mod dynamic_partitions;
pub mod run_ledger;

pub use backfill_store::InMemoryBackfillStore;
pub use dynamic_partitions::InMemoryDynamicPartitionsStore;
pub use run_ledger::InMemoryRunLedger;
