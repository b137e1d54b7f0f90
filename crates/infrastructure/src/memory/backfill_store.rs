use async_trait::async_trait;
use tokio::sync::RwLock;

use partition_core::{Backfill, BackfillStore, PartitionError, PartitionResult};

#[derive(Debug, Default)]
pub struct InMemoryBackfillStore {
    /// Insertion order; listing walks it backwards.
    backfills: RwLock<Vec<Backfill>>,
}

impl InMemoryBackfillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackfillStore for InMemoryBackfillStore {
    async fn insert(&self, backfill: &Backfill) -> PartitionResult<()> {
        let mut backfills = self.backfills.write().await;
        if backfills.iter().any(|b| b.id == backfill.id) {
            return Err(PartitionError::BackfillStore {
                message: format!("回填已存在: {}", backfill.id),
            });
        }
        backfills.push(backfill.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> PartitionResult<Option<Backfill>> {
        Ok(self.backfills.read().await.iter().find(|b| b.id == id).cloned())
    }

    async fn compare_and_set(&self, expected_version: u64, next: &Backfill) -> PartitionResult<bool> {
        let mut backfills = self.backfills.write().await;
        let stored = backfills
            .iter_mut()
            .find(|b| b.id == next.id)
            .ok_or_else(|| PartitionError::BackfillNotFound { id: next.id.clone() })?;

        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = next.clone();
        stored.version = expected_version + 1;
        Ok(true)
    }

    async fn list(&self, cursor: Option<&str>, limit: Option<usize>) -> PartitionResult<Vec<Backfill>> {
        let backfills = self.backfills.read().await;
        let mut newest_first = backfills.iter().rev();
        if let Some(cursor) = cursor {
            if !newest_first.any(|b| b.id == cursor) {
                return Err(PartitionError::InvalidCursor {
                    cursor: cursor.to_string(),
                });
            }
        }
        Ok(newest_first
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partition_core::{BackfillState, FailurePolicy, PartitionSetOrigin};

    fn backfill() -> Backfill {
        Backfill::new(
            PartitionSetOrigin::new("local", "analytics", "letters"),
            vec!["a".to_string()],
            false,
            FailurePolicy::BestEffort,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = InMemoryBackfillStore::new();
        let original = backfill();
        store.insert(&original).await.unwrap();

        let mut next = original.clone();
        next.state = BackfillState::InProgress;
        assert!(store.compare_and_set(0, &next).await.unwrap());
        // Same expected version again is stale now.
        assert!(!store.compare_and_set(0, &next).await.unwrap());

        let stored = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.state, BackfillState::InProgress);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let store = InMemoryBackfillStore::new();
        let (a, b, c) = (backfill(), backfill(), backfill());
        for item in [&a, &b, &c] {
            store.insert(item).await.unwrap();
        }

        let page = store.list(None, Some(2)).await.unwrap();
        assert_eq!(page[0].id, c.id);
        assert_eq!(page[1].id, b.id);
        let rest = store.list(Some(&b.id), None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, a.id);

        assert!(matches!(
            store.list(Some("nope"), None).await,
            Err(PartitionError::InvalidCursor { .. })
        ));
    }
}
