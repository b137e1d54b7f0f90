//! 配置管理
//!
//! 配置按以下优先级合并（后者覆盖前者）：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. `PARTITION_ENGINE_` 前缀的环境变量，嵌套字段以 `__` 分隔，
//!    例如 `PARTITION_ENGINE_LEDGER__QUERY_TIMEOUT_MS=2000`
//!
//! ```rust,no_run
//! use partition_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/partition-engine.toml"))?;
//! println!("ledger timeout: {:?}", config.ledger.query_timeout());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod models;

pub use models::{
    AppConfig, BackfillConfig, CatalogConfig, DatabaseConfig, LedgerConfig, ObservabilityConfig,
    RegistryConfig,
};
