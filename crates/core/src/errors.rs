use thiserror::Error;

/// 分区引擎错误类型定义
///
/// Every variant carries the definition, partition set or backfill it concerns so callers
/// can render a precise message without inspecting strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("无效的分区定义 '{definition}': {reason}")]
    InvalidPartitionDefinition { definition: String, reason: String },

    #[error("动态分区定义未注册: {definition}")]
    ExternalLookup { definition: String },

    #[error("动态分区 '{definition}' 已存在的分区键: {keys:?}")]
    DuplicateKeys { definition: String, keys: Vec<String> },

    #[error("动态分区 '{definition}' 不存在的分区键: {keys:?}")]
    KeysNotFound { definition: String, keys: Vec<String> },

    #[error("运行记录账本不可用 (分区集: {partition_set}): {message}")]
    LedgerUnavailable {
        partition_set: String,
        message: String,
    },

    #[error("动态分区存储不可用 (定义: {definition}): {message}")]
    RegistryUnavailable { definition: String, message: String },

    #[error("分区集未找到: {repository}/{name}")]
    PartitionSetNotFound { repository: String, name: String },

    #[error("分区集 '{partition_set}' 中不存在的分区键: {keys:?}")]
    UnknownPartitionKeys {
        partition_set: String,
        keys: Vec<String>,
    },

    #[error("无效的分页游标: {cursor}")]
    InvalidCursor { cursor: String },

    #[error("回填未找到: {id}")]
    BackfillNotFound { id: String },

    #[error("回填已取消，不再发起新的运行: {id}")]
    BackfillCanceled { id: String },

    #[error("回填 {id} 无效的状态转换: {from} -> {to}")]
    InvalidBackfillTransition { id: String, from: String, to: String },

    #[error("无效的回填请求: {reason}")]
    InvalidBackfillRequest { reason: String },

    #[error("回填存储错误: {message}")]
    BackfillStore { message: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),
}

impl PartitionError {
    pub fn invalid_definition(definition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPartitionDefinition {
            definition: definition.into(),
            reason: reason.into(),
        }
    }

    pub fn ledger_unavailable(partition_set: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LedgerUnavailable {
            partition_set: partition_set.into(),
            message: message.into(),
        }
    }

    pub fn registry_unavailable(definition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            definition: definition.into(),
            message: message.into(),
        }
    }

    /// Transient infrastructure failures. The engine itself never retries; callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerUnavailable { .. }
                | Self::RegistryUnavailable { .. }
                | Self::BackfillStore { .. }
        )
    }

    /// Errors that map to a "not found" response in the query layer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ExternalLookup { .. }
                | Self::PartitionSetNotFound { .. }
                | Self::BackfillNotFound { .. }
                | Self::KeysNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for PartitionError {
    fn from(err: serde_json::Error) -> Self {
        PartitionError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type PartitionResult<T> = std::result::Result<T, PartitionError>;
