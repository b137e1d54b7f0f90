//! 回填状态跟踪
//!
//! 状态机: `REQUESTED -> IN_PROGRESS -> {COMPLETED | FAILED}`，任意非终态都可以被取消。
//!
//! - 回填状态总是根据账本实时推导，不缓存
//! - 每次状态转换都是基于版本号的比较并交换（CAS），并发推导不会造成重复转换
//! - 取消只阻止发起新的子运行，不回滚已经发起的运行

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use partition_core::config::BackfillConfig;
use partition_core::{
    Backfill, BackfillState, BackfillStore, Clock, EngineMetrics, FailurePolicy, PartitionError,
    PartitionResult, PartitionSetOrigin, RunStatus, StructuredLogger,
};

use crate::aggregator::{PartitionRunStatus, PartitionStatus, PartitionStatusAggregator};

/// Distribution of a backfill's targeted partitions over coarse states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillStatusCounts {
    pub num_targeted: usize,
    pub num_unstarted: usize,
    pub num_in_progress: usize,
    pub num_materialized: usize,
    pub num_failed: usize,
}

impl BackfillStatusCounts {
    pub fn from_statuses(statuses: &[PartitionStatus]) -> Self {
        let mut counts = Self {
            num_targeted: statuses.len(),
            ..Self::default()
        };
        for status in statuses {
            match status.status {
                PartitionRunStatus::Unstarted => counts.num_unstarted += 1,
                PartitionRunStatus::Run(RunStatus::Success) => counts.num_materialized += 1,
                PartitionRunStatus::Run(run) if run.is_failure() => counts.num_failed += 1,
                PartitionRunStatus::Run(_) => counts.num_in_progress += 1,
            }
        }
        counts
    }

    pub fn all_terminal(&self) -> bool {
        self.num_unstarted == 0 && self.num_in_progress == 0
    }
}

/// State the backfill should move to given live counts, if any.
pub fn next_state(
    state: BackfillState,
    policy: FailurePolicy,
    counts: &BackfillStatusCounts,
) -> Option<BackfillState> {
    if state != BackfillState::InProgress {
        return None;
    }
    match policy {
        FailurePolicy::FailFast if counts.num_failed > 0 => Some(BackfillState::Failed),
        _ if !counts.all_terminal() => None,
        _ if counts.num_failed == 0 => Some(BackfillState::Completed),
        _ => Some(BackfillState::Failed),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillStatusSnapshot {
    pub backfill: Backfill,
    pub counts: BackfillStatusCounts,
    pub partition_statuses: Vec<PartitionStatus>,
}

#[derive(Debug, Clone)]
pub struct CreateBackfillRequest {
    pub origin: PartitionSetOrigin,
    pub target_keys: Vec<String>,
    pub from_full_set: bool,
    pub failure_policy: Option<FailurePolicy>,
}

pub struct BackfillStatusTracker {
    store: Arc<dyn BackfillStore>,
    aggregator: Arc<PartitionStatusAggregator>,
    clock: Arc<dyn Clock>,
    config: BackfillConfig,
}

impl BackfillStatusTracker {
    pub fn new(
        store: Arc<dyn BackfillStore>,
        aggregator: Arc<PartitionStatusAggregator>,
        clock: Arc<dyn Clock>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            store,
            aggregator,
            clock,
            config,
        }
    }

    /// Target keys must already be resolved against the partition set.
    #[instrument(skip(self, request), fields(partition_set = %request.origin.partition_set_name))]
    pub async fn create(&self, request: CreateBackfillRequest) -> PartitionResult<Backfill> {
        if request.target_keys.is_empty() {
            return Err(PartitionError::InvalidBackfillRequest {
                reason: "回填目标分区不能为空".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = request.target_keys.iter().find(|k| !seen.insert(k.as_str())) {
            return Err(PartitionError::InvalidBackfillRequest {
                reason: format!("回填目标分区重复: {duplicate}"),
            });
        }

        let backfill = Backfill::new(
            request.origin,
            request.target_keys,
            request.from_full_set,
            request.failure_policy.unwrap_or(self.config.default_failure_policy),
            self.clock.now(),
        );
        self.store.insert(&backfill).await?;
        StructuredLogger::log_backfill_created(
            &backfill.id,
            &backfill.origin.partition_set_name,
            backfill.target_keys.len(),
        );
        Ok(backfill)
    }

    pub async fn get(&self, id: &str) -> PartitionResult<Backfill> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PartitionError::BackfillNotFound { id: id.to_string() })
    }

    /// Records that a child run was launched for `partition_key`. The first launch moves
    /// the backfill to `IN_PROGRESS`; launches into a canceled backfill are refused.
    #[instrument(skip(self))]
    pub async fn record_run_launched(&self, id: &str, partition_key: &str) -> PartitionResult<Backfill> {
        for _ in 0..self.config.max_transition_attempts {
            let current = self.get(id).await?;
            match current.state {
                BackfillState::Canceled => {
                    return Err(PartitionError::BackfillCanceled { id: id.to_string() })
                }
                state if state.is_terminal() => {
                    return Err(PartitionError::InvalidBackfillTransition {
                        id: id.to_string(),
                        from: state.to_string(),
                        to: BackfillState::InProgress.to_string(),
                    })
                }
                _ => {}
            }
            if !current.targets(partition_key) {
                return Err(PartitionError::UnknownPartitionKeys {
                    partition_set: current.origin.partition_set_name.clone(),
                    keys: vec![partition_key.to_string()],
                });
            }

            let mut next = current.clone();
            next.num_runs_launched += 1;
            next.state = BackfillState::InProgress;
            if let Some(stored) = self.apply(&current, next).await? {
                return Ok(stored);
            }
        }
        Err(self.contended(id))
    }

    /// Idempotent for an already canceled backfill.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> PartitionResult<Backfill> {
        for _ in 0..self.config.max_transition_attempts {
            let current = self.get(id).await?;
            match current.state {
                BackfillState::Canceled => return Ok(current),
                state if state.is_terminal() => {
                    return Err(PartitionError::InvalidBackfillTransition {
                        id: id.to_string(),
                        from: state.to_string(),
                        to: BackfillState::Canceled.to_string(),
                    })
                }
                _ => {}
            }

            let mut next = current.clone();
            next.state = BackfillState::Canceled;
            if let Some(stored) = self.apply(&current, next).await? {
                return Ok(stored);
            }
        }
        Err(self.contended(id))
    }

    /// Derives live counts from the ledger and settles the backfill if they allow it.
    #[instrument(skip(self))]
    pub async fn status(&self, id: &str) -> PartitionResult<BackfillStatusSnapshot> {
        let mut current = self.get(id).await?;
        let statuses = self
            .aggregator
            .resolve_statuses(&current.origin.partition_set_name, &current.target_keys)
            .await?;
        let counts = BackfillStatusCounts::from_statuses(&statuses);

        for _ in 0..self.config.max_transition_attempts {
            let Some(target) = next_state(current.state, current.failure_policy, &counts) else {
                break;
            };
            let mut next = current.clone();
            next.state = target;
            match self.apply(&current, next).await? {
                Some(stored) => {
                    current = stored;
                    break;
                }
                None => current = self.get(id).await?,
            }
        }

        Ok(BackfillStatusSnapshot {
            backfill: current,
            counts,
            partition_statuses: statuses,
        })
    }

    /// Backfills of one partition set, newest first.
    pub async fn list_for_partition_set(
        &self,
        repository_name: &str,
        partition_set_name: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<Backfill>> {
        const PAGE: usize = 100;
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let mut matched = Vec::new();
        let mut cursor = cursor.map(str::to_string);

        loop {
            let page = self.store.list(cursor.as_deref(), Some(PAGE)).await?;
            for backfill in &page {
                if backfill.origin.repository_name == repository_name
                    && backfill.origin.partition_set_name == partition_set_name
                {
                    matched.push(backfill.clone());
                    if limit.is_some_and(|limit| matched.len() >= limit) {
                        return Ok(matched);
                    }
                }
            }
            if page.len() < PAGE {
                return Ok(matched);
            }
            cursor = page.last().map(|b| b.id.clone());
        }
    }

    /// Compare-and-set against the version `current` was read at.
    /// `None` means another writer won and the caller should reload.
    async fn apply(&self, current: &Backfill, mut next: Backfill) -> PartitionResult<Option<Backfill>> {
        next.updated_at = self.clock.now();
        if !self.store.compare_and_set(current.version, &next).await? {
            StructuredLogger::log_backfill_transition_conflict(&current.id, next.state);
            return Ok(None);
        }
        next.version = current.version + 1;

        if next.state != current.state {
            StructuredLogger::log_backfill_transition(&next.id, current.state, next.state);
            EngineMetrics::record_backfill_transition(next.state.as_str());
        } else {
            debug!(backfill.id = %next.id, runs_launched = next.num_runs_launched, "Backfill updated");
        }
        Ok(Some(next))
    }

    fn contended(&self, id: &str) -> PartitionError {
        PartitionError::BackfillStore {
            message: format!(
                "回填 {id} 在 {} 次尝试后仍存在并发冲突",
                self.config.max_transition_attempts
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use partition_core::config::LedgerConfig;
    use partition_core::{tags, FixedClock, RunRecord};
    use partition_infrastructure::memory::{InMemoryBackfillStore, InMemoryRunLedger};

    struct Harness {
        ledger: Arc<InMemoryRunLedger>,
        tracker: BackfillStatusTracker,
    }

    fn harness(policy: FailurePolicy) -> Harness {
        let ledger = Arc::new(InMemoryRunLedger::new());
        let aggregator = Arc::new(PartitionStatusAggregator::new(
            ledger.clone(),
            LedgerConfig::default(),
        ));
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let tracker = BackfillStatusTracker::new(
            Arc::new(InMemoryBackfillStore::new()),
            aggregator,
            clock,
            BackfillConfig {
                default_failure_policy: policy,
                ..BackfillConfig::default()
            },
        );
        Harness { ledger, tracker }
    }

    fn request(keys: &[&str]) -> CreateBackfillRequest {
        CreateBackfillRequest {
            origin: PartitionSetOrigin::new("local", "analytics", "letters"),
            target_keys: keys.iter().map(|k| k.to_string()).collect(),
            from_full_set: false,
            failure_policy: None,
        }
    }

    fn run(id: &str, key: &str, status: RunStatus) -> RunRecord {
        RunRecord::new(id, status)
            .with_tag(tags::PARTITION_SET_TAG, "letters")
            .with_tag(tags::PARTITION_NAME_TAG, key)
    }

    #[tokio::test]
    async fn test_completes_only_after_every_target_is_terminal() {
        let h = harness(FailurePolicy::BestEffort);
        let backfill = h.tracker.create(request(&["a", "b", "c"])).await.unwrap();
        assert_eq!(backfill.state, BackfillState::Requested);

        for key in ["a", "b", "c"] {
            let updated = h.tracker.record_run_launched(&backfill.id, key).await.unwrap();
            assert_eq!(updated.state, BackfillState::InProgress);
        }
        h.ledger.record(run("r-a", "a", RunStatus::Started));
        h.ledger.record(run("r-b", "b", RunStatus::Started));
        h.ledger.record(run("r-c", "c", RunStatus::Started));

        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::InProgress);
        assert_eq!(snapshot.counts.num_in_progress, 3);

        h.ledger.record(run("r-a2", "a", RunStatus::Success));
        h.ledger.record(run("r-b2", "b", RunStatus::Success));
        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::InProgress);
        assert_eq!(snapshot.counts.num_materialized, 2);

        h.ledger.record(run("r-c2", "c", RunStatus::Success));
        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::Completed);
        assert_eq!(
            snapshot.counts,
            BackfillStatusCounts {
                num_targeted: 3,
                num_materialized: 3,
                ..BackfillStatusCounts::default()
            }
        );
        assert_eq!(snapshot.backfill.num_runs_launched, 3);
    }

    #[tokio::test]
    async fn test_requested_backfill_does_not_settle() {
        let h = harness(FailurePolicy::BestEffort);
        let backfill = h.tracker.create(request(&["a"])).await.unwrap();
        h.ledger.record(run("r-a", "a", RunStatus::Success));

        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::Requested);
    }

    #[tokio::test]
    async fn test_best_effort_fails_after_all_terminal() {
        let h = harness(FailurePolicy::BestEffort);
        let backfill = h.tracker.create(request(&["a", "b"])).await.unwrap();
        h.tracker.record_run_launched(&backfill.id, "a").await.unwrap();
        h.ledger.record(run("r-a", "a", RunStatus::Failure));
        h.ledger.record(run("r-b", "b", RunStatus::Started));

        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::InProgress);

        h.ledger.record(run("r-b2", "b", RunStatus::Success));
        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::Failed);
    }

    #[tokio::test]
    async fn test_fail_fast_fails_on_first_failure() {
        let h = harness(FailurePolicy::FailFast);
        let backfill = h.tracker.create(request(&["a", "b"])).await.unwrap();
        h.tracker.record_run_launched(&backfill.id, "a").await.unwrap();
        h.ledger.record(run("r-a", "a", RunStatus::Canceled));

        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::Failed);
        assert_eq!(snapshot.counts.num_failed, 1);
        assert_eq!(snapshot.counts.num_unstarted, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_launches() {
        let h = harness(FailurePolicy::BestEffort);
        let backfill = h.tracker.create(request(&["a", "b"])).await.unwrap();
        h.tracker.record_run_launched(&backfill.id, "a").await.unwrap();

        let canceled = h.tracker.cancel(&backfill.id).await.unwrap();
        assert_eq!(canceled.state, BackfillState::Canceled);
        assert_eq!(h.tracker.cancel(&backfill.id).await.unwrap().state, BackfillState::Canceled);

        assert!(matches!(
            h.tracker.record_run_launched(&backfill.id, "b").await,
            Err(PartitionError::BackfillCanceled { .. })
        ));
        // Status keeps reporting live counts without leaving CANCELED.
        h.ledger.record(run("r-a", "a", RunStatus::Success));
        let snapshot = h.tracker.status(&backfill.id).await.unwrap();
        assert_eq!(snapshot.backfill.state, BackfillState::Canceled);
        assert_eq!(snapshot.counts.num_materialized, 1);
    }

    #[tokio::test]
    async fn test_concurrent_status_calls_transition_once() {
        let h = harness(FailurePolicy::BestEffort);
        let backfill = h.tracker.create(request(&["a"])).await.unwrap();
        h.tracker.record_run_launched(&backfill.id, "a").await.unwrap();
        h.ledger.record(run("r-a", "a", RunStatus::Success));

        let (first, second) = tokio::join!(
            h.tracker.status(&backfill.id),
            h.tracker.status(&backfill.id)
        );
        assert_eq!(first.unwrap().backfill.state, BackfillState::Completed);
        assert_eq!(second.unwrap().backfill.state, BackfillState::Completed);

        // launch (1) + completion (1); the losing writer does not bump the version again.
        assert_eq!(h.tracker.get(&backfill.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let h = harness(FailurePolicy::BestEffort);
        assert!(matches!(
            h.tracker.create(request(&[])).await,
            Err(PartitionError::InvalidBackfillRequest { .. })
        ));
        assert!(h.tracker.create(request(&["a", "a"])).await.is_err());

        let backfill = h.tracker.create(request(&["a"])).await.unwrap();
        assert!(matches!(
            h.tracker.record_run_launched(&backfill.id, "z").await,
            Err(PartitionError::UnknownPartitionKeys { .. })
        ));
        assert!(matches!(
            h.tracker.status("missing").await,
            Err(PartitionError::BackfillNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_for_partition_set() {
        let h = harness(FailurePolicy::BestEffort);
        let first = h.tracker.create(request(&["a"])).await.unwrap();
        let mut other = request(&["a"]);
        other.origin = PartitionSetOrigin::new("local", "analytics", "numbers");
        h.tracker.create(other).await.unwrap();
        let second = h.tracker.create(request(&["b"])).await.unwrap();

        let listed = h
            .tracker
            .list_for_partition_set("analytics", "letters", None, None)
            .await
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

        let limited = h
            .tracker
            .list_for_partition_set("analytics", "letters", None, Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let none = h
            .tracker
            .list_for_partition_set("analytics", "letters", None, Some(0))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_next_state_table() {
        let all_done = BackfillStatusCounts {
            num_targeted: 2,
            num_materialized: 2,
            ..BackfillStatusCounts::default()
        };
        let one_failed_one_running = BackfillStatusCounts {
            num_targeted: 2,
            num_failed: 1,
            num_in_progress: 1,
            ..BackfillStatusCounts::default()
        };
        let best = FailurePolicy::BestEffort;
        let fast = FailurePolicy::FailFast;

        assert_eq!(next_state(BackfillState::InProgress, best, &all_done), Some(BackfillState::Completed));
        assert_eq!(next_state(BackfillState::InProgress, best, &one_failed_one_running), None);
        assert_eq!(
            next_state(BackfillState::InProgress, fast, &one_failed_one_running),
            Some(BackfillState::Failed)
        );
        assert_eq!(next_state(BackfillState::Requested, best, &all_done), None);
        assert_eq!(next_state(BackfillState::Canceled, fast, &one_failed_one_running), None);
    }
}
