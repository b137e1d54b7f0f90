//! 运行记录账本接口定义
//!
//! 分区引擎只读取运行历史，从不写入。此模块定义引擎消费的最小查询接口：
//!
//! - 按标签精确匹配过滤（分区集名称标签 + 分区键标签）
//! - 可选的状态过滤和运行ID过滤
//! - 稳定的倒序（最新优先）排序，支持基于游标的分页
//! - 每次调用最多返回 `limit` 条记录
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use partition_core::models::{tags, RunsFilter};
//! use partition_core::traits::RunLedgerQuery;
//!
//! async fn latest_run(ledger: &dyn RunLedgerQuery) -> PartitionResult<()> {
//!     let filter = RunsFilter::new()
//!         .with_tag(tags::PARTITION_SET_TAG, "daily_partition_set")
//!         .with_tag(tags::PARTITION_NAME_TAG, "2024-03-01");
//!     let runs = ledger.find(&filter, None, Some(1)).await?;
//!     if let Some(run) = runs.first() {
//!         println!("最新运行: {} ({})", run.run_id, run.status);
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::models::{RunRecord, RunsFilter};
use crate::PartitionResult;

/// 运行记录账本查询接口
///
/// # 排序与分页
///
/// 返回结果按创建顺序倒序排列。`cursor` 是上一页最后一条记录的 `run_id`，
/// 下一页只包含比它更早的记录。账本必须保证该顺序在多次调用之间稳定。
///
/// # 错误
///
/// 实现应将底层存储或网络故障映射为 `PartitionError::LedgerUnavailable`，
/// 不允许返回部分结果。
#[async_trait]
pub trait RunLedgerQuery: Send + Sync {
    async fn find(
        &self,
        filter: &RunsFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> PartitionResult<Vec<RunRecord>>;
}
