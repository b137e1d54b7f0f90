pub mod database;
pub mod memory;

pub use database::sqlite::{SqliteBackfillStore, SqliteDynamicPartitionsStore, SqliteRunLedger};
pub use database::DatabaseManager;
pub use memory::{InMemoryBackfillStore, InMemoryDynamicPartitionsStore, InMemoryRunLedger};
