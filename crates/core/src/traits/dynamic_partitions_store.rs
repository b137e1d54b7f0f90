use async_trait::async_trait;

use crate::PartitionResult;

/// Durable backing for dynamic partition definitions.
///
/// Every mutation is atomic per call: it is either fully applied or fully rejected.
/// Implementations report `DuplicateKeys` / `KeysNotFound` with the exact offending subset
/// and `ExternalLookup` for an unregistered definition name.
#[async_trait]
pub trait DynamicPartitionsStore: Send + Sync {
    /// Idempotent.
    async fn register_definition(&self, definition: &str) -> PartitionResult<()>;

    /// Keys in insertion order, or `None` when the definition is not registered.
    async fn get_partitions(&self, definition: &str) -> PartitionResult<Option<Vec<String>>>;

    /// Returns the committed keys.
    async fn add_partitions(&self, definition: &str, keys: &[String])
        -> PartitionResult<Vec<String>>;

    async fn delete_partitions(&self, definition: &str, keys: &[String]) -> PartitionResult<()>;
}
