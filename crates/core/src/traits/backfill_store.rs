use async_trait::async_trait;

use crate::models::Backfill;
use crate::PartitionResult;

/// Persistence for backfill records.
#[async_trait]
pub trait BackfillStore: Send + Sync {
    async fn insert(&self, backfill: &Backfill) -> PartitionResult<()>;

    async fn get(&self, id: &str) -> PartitionResult<Option<Backfill>>;

    /// Replaces the stored record with `next` only if its version still equals
    /// `expected_version`; the stored copy then carries `expected_version + 1`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_set(&self, expected_version: u64, next: &Backfill) -> PartitionResult<bool>;

    /// Newest first. `cursor` is the id of the last backfill of the previous page.
    async fn list(&self, cursor: Option<&str>, limit: Option<usize>)
        -> PartitionResult<Vec<Backfill>>;
}
