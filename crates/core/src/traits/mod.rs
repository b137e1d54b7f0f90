pub mod backfill_store;
pub mod clock;
pub mod dynamic_partitions_store;
pub mod run_ledger;

pub use backfill_store::BackfillStore;
pub use clock::{Clock, FixedClock, SystemClock};
pub use dynamic_partitions_store::DynamicPartitionsStore;
pub use run_ledger::RunLedgerQuery;
