use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag keys written on runs launched for a partition.
pub mod tags {
    pub const PARTITION_SET_TAG: &str = "engine/partition_set";
    pub const PARTITION_NAME_TAG: &str = "engine/partition";
    /// Prefix for per-dimension tags of multi-dimensional partitions.
    pub const MULTIDIMENSIONAL_PARTITION_PREFIX: &str = "engine/partition/";
    pub const BACKFILL_ID_TAG: &str = "engine/backfill";

    pub fn dimension_tag(dimension: &str) -> String {
        format!("{MULTIDIMENSIONAL_PARTITION_PREFIX}{dimension}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "MANAGED")]
    Managed,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "CANCELING")]
    Canceling,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 9] = [
        RunStatus::Queued,
        RunStatus::NotStarted,
        RunStatus::Managed,
        RunStatus::Starting,
        RunStatus::Started,
        RunStatus::Success,
        RunStatus::Failure,
        RunStatus::Canceling,
        RunStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::NotStarted => "NOT_STARTED",
            RunStatus::Managed => "MANAGED",
            RunStatus::Starting => "STARTING",
            RunStatus::Started => "STARTED",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Canceling => "CANCELING",
            RunStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Canceled
        )
    }

    /// Terminal without producing the partition.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failure | RunStatus::Canceled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid run status: {s}"))
    }
}

impl sqlx::Type<sqlx::Sqlite> for RunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<RunStatus>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// A run as recorded by the run-history store. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            run_id: run_id.into(),
            status,
            tags: BTreeMap::new(),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_times(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start);
        self.end_time = end;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Wall-clock duration in seconds, once the run has both started and ended.
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Filter passed to the run ledger. Tag matching is exact on every listed tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunsFilter {
    pub tags: BTreeMap<String, String>,
    pub statuses: Option<BTreeSet<RunStatus>>,
    pub run_ids: Option<BTreeSet<String>>,
}

impl RunsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_run_ids<S: Into<String>>(mut self, run_ids: impl IntoIterator<Item = S>) -> Self {
        self.run_ids = Some(run_ids.into_iter().map(Into::into).collect());
        self
    }

    /// Tags in `tags` override tags of the same key already present.
    pub fn merge_tags(mut self, tags: &BTreeMap<String, String>) -> Self {
        for (key, value) in tags {
            self.tags.insert(key.clone(), value.clone());
        }
        self
    }

    /// Partition set this filter is scoped to, for error context.
    pub fn partition_set(&self) -> &str {
        self.tags
            .get(tags::PARTITION_SET_TAG)
            .map(String::as_str)
            .unwrap_or("*")
    }

    pub fn matches(&self, run: &RunRecord) -> bool {
        let tags_match = self
            .tags
            .iter()
            .all(|(key, value)| run.tag(key) == Some(value.as_str()));
        let status_match = self
            .statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&run.status));
        let id_match = self
            .run_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&run.run_id));
        tags_match && status_match && id_match
    }
}
