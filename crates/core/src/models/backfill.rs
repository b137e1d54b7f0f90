use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a partition set comes from. Partition-set names are only unique within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionSetOrigin {
    pub location_name: String,
    pub repository_name: String,
    pub partition_set_name: String,
}

impl PartitionSetOrigin {
    pub fn new(
        location_name: impl Into<String>,
        repository_name: impl Into<String>,
        partition_set_name: impl Into<String>,
    ) -> Self {
        Self {
            location_name: location_name.into(),
            repository_name: repository_name.into(),
            partition_set_name: partition_set_name.into(),
        }
    }

    /// Stable identifier of the partition set across snapshots.
    pub fn origin_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.location_name, self.repository_name, self.partition_set_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackfillState {
    Requested,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl BackfillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillState::Requested => "REQUESTED",
            BackfillState::InProgress => "IN_PROGRESS",
            BackfillState::Completed => "COMPLETED",
            BackfillState::Failed => "FAILED",
            BackfillState::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackfillState::Completed | BackfillState::Failed | BackfillState::Canceled
        )
    }
}

impl fmt::Display for BackfillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackfillState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(BackfillState::Requested),
            "IN_PROGRESS" => Ok(BackfillState::InProgress),
            "COMPLETED" => Ok(BackfillState::Completed),
            "FAILED" => Ok(BackfillState::Failed),
            "CANCELED" => Ok(BackfillState::Canceled),
            _ => Err(format!("Invalid backfill state: {s}")),
        }
    }
}

/// How a backfill reacts to a failed partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going; settle once every targeted partition is terminal.
    #[default]
    BestEffort,
    /// Mark the backfill failed as soon as any targeted partition fails.
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(FailurePolicy::BestEffort),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            _ => Err(format!("Invalid failure policy: {s}")),
        }
    }
}

/// A bulk operation over a subset of a partition set's partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backfill {
    pub id: String,
    pub origin: PartitionSetOrigin,
    /// Materialized at creation so the target never drifts with the key space.
    pub target_keys: Vec<String>,
    pub from_full_set: bool,
    pub failure_policy: FailurePolicy,
    pub state: BackfillState,
    pub num_runs_launched: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful compare-and-set.
    pub version: u64,
}

impl Backfill {
    pub fn new(
        origin: PartitionSetOrigin,
        target_keys: Vec<String>,
        from_full_set: bool,
        failure_policy: FailurePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin,
            target_keys,
            from_full_set,
            failure_policy,
            state: BackfillState::Requested,
            num_runs_launched: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn targets(&self, key: &str) -> bool {
        self.target_keys.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_state_terminality() {
        assert!(!BackfillState::Requested.is_terminal());
        assert!(!BackfillState::InProgress.is_terminal());
        assert!(BackfillState::Completed.is_terminal());
        assert!(BackfillState::Failed.is_terminal());
        assert!(BackfillState::Canceled.is_terminal());
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!("BEST_EFFORT".parse::<FailurePolicy>().unwrap(), FailurePolicy::BestEffort);
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_new_backfill_starts_requested() {
        let origin = PartitionSetOrigin::new("loc", "repo", "daily_partition_set");
        let backfill = Backfill::new(
            origin.clone(),
            vec!["a".to_string(), "b".to_string()],
            false,
            FailurePolicy::default(),
            Utc::now(),
        );
        assert_eq!(backfill.state, BackfillState::Requested);
        assert_eq!(backfill.version, 0);
        assert!(backfill.targets("a"));
        assert!(!backfill.targets("c"));
        assert_eq!(origin.origin_id(), "loc:repo:daily_partition_set");
    }
}
