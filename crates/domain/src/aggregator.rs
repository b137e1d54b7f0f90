//! 分区状态聚合
//!
//! 将分区键与运行记录账本关联，得到每个分区的最新运行状态以及按状态的计数汇总。
//! 账本的任何一次查询失败都会使整个聚合以 `LedgerUnavailable` 失败，绝不返回部分结果。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, instrument};

use partition_core::config::LedgerConfig;
use partition_core::{
    tags, EngineMetrics, PartitionError, PartitionResult, RunLedgerQuery, RunRecord, RunStatus,
    RunsFilter, StructuredLogger,
};

/// Latest-run status of a partition, with an explicit state for "no run yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionRunStatus {
    Unstarted,
    Run(RunStatus),
}

impl PartitionRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRunStatus::Unstarted => "UNSTARTED",
            PartitionRunStatus::Run(status) => status.as_str(),
        }
    }
}

impl fmt::Display for PartitionRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("UNSTARTED") {
            return Ok(PartitionRunStatus::Unstarted);
        }
        s.parse::<RunStatus>().map(PartitionRunStatus::Run)
    }
}

impl Serialize for PartitionRunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PartitionRunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Derived status of one partition; never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionStatus {
    pub partition_key: String,
    pub run_id: Option<String>,
    pub status: PartitionRunStatus,
    pub run_duration_seconds: Option<f64>,
}

impl PartitionStatus {
    pub fn unstarted(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            run_id: None,
            status: PartitionRunStatus::Unstarted,
            run_duration_seconds: None,
        }
    }

    pub fn from_run(partition_key: impl Into<String>, run: &RunRecord) -> Self {
        Self {
            partition_key: partition_key.into(),
            run_id: Some(run.run_id.clone()),
            status: PartitionRunStatus::Run(run.status),
            run_duration_seconds: run.duration_seconds(),
        }
    }
}

pub type StatusCounts = BTreeMap<PartitionRunStatus, usize>;

/// Counts each status once per status present. The total always equals `statuses.len()`.
pub fn tally(statuses: &[PartitionStatus]) -> StatusCounts {
    let mut counts = StatusCounts::new();
    for status in statuses {
        *counts.entry(status.status).or_insert(0) += 1;
    }
    counts
}

pub fn partition_filter(partition_set: &str, partition_key: &str) -> RunsFilter {
    RunsFilter::new()
        .with_tag(tags::PARTITION_SET_TAG, partition_set)
        .with_tag(tags::PARTITION_NAME_TAG, partition_key)
}

pub struct PartitionStatusAggregator {
    ledger: Arc<dyn RunLedgerQuery>,
    config: LedgerConfig,
}

impl PartitionStatusAggregator {
    pub fn new(ledger: Arc<dyn RunLedgerQuery>, config: LedgerConfig) -> Self {
        Self { ledger, config }
    }

    /// One ledger call with the configured deadline. Every failure becomes `LedgerUnavailable`.
    async fn find(
        &self,
        partition_set: &str,
        filter: &RunsFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.query_timeout(),
            self.ledger.find(filter, cursor, limit),
        )
        .await;

        let result = match outcome {
            Ok(Ok(runs)) => Ok(runs),
            Ok(Err(PartitionError::LedgerUnavailable { message, .. })) => {
                Err(PartitionError::ledger_unavailable(partition_set, message))
            }
            Ok(Err(other)) => Err(PartitionError::ledger_unavailable(partition_set, other.to_string())),
            Err(_) => Err(PartitionError::ledger_unavailable(
                partition_set,
                format!("查询超时 ({:?})", self.config.query_timeout()),
            )),
        };

        EngineMetrics::record_ledger_query(partition_set, started.elapsed(), result.is_ok());
        if let Err(error) = &result {
            StructuredLogger::log_ledger_failure(partition_set, error);
        }
        result
    }

    /// The newest run tagged with the set and key decides the status.
    #[instrument(skip(self))]
    pub async fn status_of(&self, partition_set: &str, partition_key: &str) -> PartitionResult<PartitionStatus> {
        let filter = partition_filter(partition_set, partition_key);
        let runs = self.find(partition_set, &filter, None, Some(1)).await?;
        Ok(match runs.first() {
            Some(run) => PartitionStatus::from_run(partition_key, run),
            None => PartitionStatus::unstarted(partition_key),
        })
    }

    /// `status_of` for every key, concurrently, in key order.
    pub async fn resolve_statuses(
        &self,
        partition_set: &str,
        keys: &[String],
    ) -> PartitionResult<Vec<PartitionStatus>> {
        EngineMetrics::record_status_lookups(partition_set, keys.len());
        stream::iter(keys)
            .map(|key| self.status_of(partition_set, key))
            .buffered(self.config.max_concurrent_lookups)
            .try_collect()
            .await
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn status_counts(&self, partition_set: &str, keys: &[String]) -> PartitionResult<StatusCounts> {
        let statuses = self.resolve_statuses(partition_set, keys).await?;
        Ok(tally(&statuses))
    }

    /// Bulk variant of `status_of`: pages through every run of the set once instead of
    /// issuing one query per key. Stops early once every requested key has been seen.
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn partition_statuses(
        &self,
        partition_set: &str,
        keys: &[String],
    ) -> PartitionResult<Vec<PartitionStatus>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut latest: HashMap<String, RunRecord> = HashMap::new();
        let filter = RunsFilter::new().with_tag(tags::PARTITION_SET_TAG, partition_set);
        let page_size = self.config.page_size;

        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .find(partition_set, &filter, cursor.as_deref(), Some(page_size))
                .await?;
            pages += 1;

            for run in &page {
                if let Some(key) = run.tag(tags::PARTITION_NAME_TAG) {
                    if wanted.contains(key) && !latest.contains_key(key) {
                        latest.insert(key.to_string(), run.clone());
                    }
                }
            }

            if page.len() < page_size || latest.len() == wanted.len() {
                break;
            }
            cursor = page.last().map(|run| run.run_id.clone());
        }
        debug!(partition_set, pages, matched = latest.len(), "Scanned run ledger");

        Ok(keys
            .iter()
            .map(|key| match latest.get(key) {
                Some(run) => PartitionStatus::from_run(key.as_str(), run),
                None => PartitionStatus::unstarted(key.as_str()),
            })
            .collect())
    }

    /// Runs of one partition, newest first. `filter` narrows further; its partition tags
    /// are overridden by the ones for this key.
    pub async fn partition_runs(
        &self,
        partition_set: &str,
        partition_key: &str,
        filter: Option<RunsFilter>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>> {
        let tags = partition_filter(partition_set, partition_key).tags;
        let filter = filter.unwrap_or_default().merge_tags(&tags);
        self.find(partition_set, &filter, cursor, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use partition_infrastructure::memory::InMemoryRunLedger;

    mock! {
        Ledger {}

        #[async_trait]
        impl RunLedgerQuery for Ledger {
            async fn find<'s, 'f, 'c>(
                &'s self,
                filter: &'f RunsFilter,
                cursor: Option<&'c str>,
                limit: Option<usize>,
            ) -> PartitionResult<Vec<RunRecord>>;
        }
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn run(id: &str, set: &str, key: &str, status: RunStatus) -> RunRecord {
        RunRecord::new(id, status)
            .with_tag(tags::PARTITION_SET_TAG, set)
            .with_tag(tags::PARTITION_NAME_TAG, key)
    }

    fn aggregator(ledger: Arc<dyn RunLedgerQuery>) -> PartitionStatusAggregator {
        PartitionStatusAggregator::new(
            ledger,
            LedgerConfig {
                page_size: 2,
                ..LedgerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_status_counts_one_success_two_unstarted() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        ledger.record(run("r1", "letters", "b", RunStatus::Success));
        let aggregator = aggregator(ledger);

        let counts = aggregator
            .status_counts("letters", &keys(&["a", "b", "c"]))
            .await
            .unwrap();

        let mut expected = StatusCounts::new();
        expected.insert(PartitionRunStatus::Run(RunStatus::Success), 1);
        expected.insert(PartitionRunStatus::Unstarted, 2);
        assert_eq!(counts, expected);
    }

    #[tokio::test]
    async fn test_empty_key_set_gives_empty_counts() {
        let aggregator = aggregator(Arc::new(InMemoryRunLedger::new()));
        assert!(aggregator.status_counts("letters", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newest_run_is_authoritative() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        ledger.record(run("r1", "letters", "a", RunStatus::Failure));
        ledger.record(run("r2", "letters", "a", RunStatus::Success));
        ledger.record(run("r3", "other_set", "a", RunStatus::Started));
        let aggregator = aggregator(ledger);

        let status = aggregator.status_of("letters", "a").await.unwrap();
        assert_eq!(status.run_id.as_deref(), Some("r2"));
        assert_eq!(status.status, PartitionRunStatus::Run(RunStatus::Success));
    }

    #[tokio::test]
    async fn test_bulk_statuses_agree_with_status_of() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        ledger.record(run("r1", "letters", "a", RunStatus::Failure));
        ledger.record(run("r2", "letters", "b", RunStatus::Started));
        ledger.record(run("r3", "letters", "a", RunStatus::Success));
        ledger.record(run("r4", "letters", "d", RunStatus::Canceled));
        ledger.record(run("r5", "letters", "b", RunStatus::Queued));
        let aggregator = aggregator(ledger);
        let wanted = keys(&["a", "b", "c"]);

        let bulk = aggregator.partition_statuses("letters", &wanted).await.unwrap();
        let single = aggregator.resolve_statuses("letters", &wanted).await.unwrap();
        assert_eq!(bulk, single);
        assert_eq!(bulk[2].status, PartitionRunStatus::Unstarted);
    }

    #[tokio::test]
    async fn test_ledger_failure_fails_whole_aggregation() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_find()
            .returning(|_, _, _| Err(PartitionError::Serialization("bad row".to_string())));
        let aggregator = aggregator(Arc::new(ledger));

        let err = aggregator
            .status_counts("letters", &keys(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PartitionError::LedgerUnavailable { ref partition_set, .. } if partition_set == "letters"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_ledger_timeout_surfaces_as_unavailable() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        ledger.set_latency(std::time::Duration::from_millis(200));
        let aggregator = PartitionStatusAggregator::new(
            ledger,
            LedgerConfig {
                query_timeout_ms: 10,
                ..LedgerConfig::default()
            },
        );
        assert!(matches!(
            aggregator.status_of("letters", "a").await,
            Err(PartitionError::LedgerUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_partition_runs_merges_filter() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        ledger.record(run("r1", "letters", "a", RunStatus::Failure));
        ledger.record(run("r2", "letters", "a", RunStatus::Success));
        ledger.record(run("r3", "letters", "b", RunStatus::Failure));
        let aggregator = aggregator(ledger);

        let failures = aggregator
            .partition_runs(
                "letters",
                "a",
                Some(RunsFilter::new().with_statuses([RunStatus::Failure])),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].run_id, "r1");
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        assert_eq!(
            serde_json::to_string(&PartitionRunStatus::Unstarted).unwrap(),
            "\"UNSTARTED\""
        );
        assert_eq!(
            "success".parse::<PartitionRunStatus>().unwrap(),
            PartitionRunStatus::Run(RunStatus::Success)
        );
    }
}
