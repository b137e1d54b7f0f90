use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::FailurePolicy;

/// Run ledger access settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    /// Deadline for a single ledger call; expiry surfaces as `LedgerUnavailable`
    pub query_timeout_ms: u64,
    /// Page size used when scanning every run of a partition set
    pub page_size: usize,
    /// Upper bound on concurrent per-partition status lookups
    pub max_concurrent_lookups: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            page_size: 500,
            max_concurrent_lookups: 16,
        }
    }
}

impl LedgerConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.query_timeout_ms == 0 {
            return Err(anyhow::anyhow!("账本查询超时时间必须大于0"));
        }
        if self.page_size == 0 {
            return Err(anyhow::anyhow!("分页大小必须大于0"));
        }
        if self.max_concurrent_lookups == 0 {
            return Err(anyhow::anyhow!("最大并发查询数必须大于0"));
        }
        Ok(())
    }
}

/// Dynamic partition registry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// Deadline for a single store call; expiry surfaces as `RegistryUnavailable`
    pub operation_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
        }
    }
}

impl RegistryConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(anyhow::anyhow!("注册表操作超时时间必须大于0"));
        }
        Ok(())
    }
}

/// Backfill tracking settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillConfig {
    pub default_failure_policy: FailurePolicy,
    /// Attempts for a compare-and-set transition before giving up on a contended backfill
    pub max_transition_attempts: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            default_failure_policy: FailurePolicy::BestEffort,
            max_transition_attempts: 5,
        }
    }
}

impl BackfillConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_transition_attempts == 0 {
            return Err(anyhow::anyhow!("状态转换尝试次数必须大于0"));
        }
        Ok(())
    }
}

/// Partition-set catalog settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// TOML file declaring the partition sets
    pub definitions_path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            definitions_path: "config/partition_sets.toml".to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.definitions_path.trim().is_empty() {
            return Err(anyhow::anyhow!("分区集定义文件路径不能为空"));
        }
        Ok(())
    }
}
