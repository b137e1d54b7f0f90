use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use partition_core::{PartitionError, PartitionResult, RunLedgerQuery, RunRecord, RunsFilter};

/// 内存运行记录账本
///
/// 按记录顺序保存运行，查询时倒序返回。可以模拟账本不可用和查询延迟，供测试和嵌入式场景使用。
#[derive(Debug, Default)]
pub struct InMemoryRunLedger {
    runs: RwLock<Vec<RunRecord>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a run, or replaces the run with the same id in place so its position is kept.
    pub fn record(&self, run: RunRecord) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        match runs.iter_mut().find(|existing| existing.run_id == run.run_id) {
            Some(existing) => *existing = run,
            None => runs.push(run),
        }
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = Some(latency);
    }
}

#[async_trait]
impl RunLedgerQuery for InMemoryRunLedger {
    async fn find(
        &self,
        filter: &RunsFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PartitionError::ledger_unavailable(
                filter.partition_set(),
                "内存账本被标记为不可用",
            ));
        }

        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let mut newest_first = runs.iter().rev();
        if let Some(cursor) = cursor {
            // Skip up to and including the cursor; an unknown cursor yields nothing.
            if !newest_first.any(|run| run.run_id == cursor) {
                return Ok(Vec::new());
            }
        }

        Ok(newest_first
            .filter(|run| filter.matches(run))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partition_core::{tags, RunStatus};

    fn ledger_with_runs() -> InMemoryRunLedger {
        let ledger = InMemoryRunLedger::new();
        for (id, key) in [("r1", "a"), ("r2", "b"), ("r3", "a"), ("r4", "a")] {
            ledger.record(
                RunRecord::new(id, RunStatus::Success)
                    .with_tag(tags::PARTITION_SET_TAG, "letters")
                    .with_tag(tags::PARTITION_NAME_TAG, key),
            );
        }
        ledger
    }

    #[tokio::test]
    async fn test_newest_first_with_cursor_pages() {
        let ledger = ledger_with_runs();
        let filter = RunsFilter::new().with_tag(tags::PARTITION_NAME_TAG, "a");

        let first = ledger.find(&filter, None, Some(2)).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3"]);

        let second = ledger.find(&filter, Some("r3"), Some(2)).await.unwrap();
        let ids: Vec<&str> = second.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[tokio::test]
    async fn test_rerecord_keeps_position() {
        let ledger = ledger_with_runs();
        ledger.record(
            RunRecord::new("r1", RunStatus::Failure)
                .with_tag(tags::PARTITION_SET_TAG, "letters")
                .with_tag(tags::PARTITION_NAME_TAG, "a"),
        );
        assert_eq!(ledger.len(), 4);

        let all = ledger.find(&RunsFilter::new(), None, None).await.unwrap();
        assert_eq!(all.last().unwrap().run_id, "r1");
        assert_eq!(all.last().unwrap().status, RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let ledger = ledger_with_runs();
        ledger.set_unavailable(true);
        let filter = RunsFilter::new().with_tag(tags::PARTITION_SET_TAG, "letters");
        assert!(matches!(
            ledger.find(&filter, None, None).await,
            Err(PartitionError::LedgerUnavailable { partition_set, .. }) if partition_set == "letters"
        ));
    }
}
