use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use partition_core::config::AppConfig;
use partition_core::metrics::{self, PrometheusHandle};
use partition_core::{Clock, SystemClock};
use partition_domain::{PartitionService, PartitionSetCatalog, ServiceDependencies};
use partition_infrastructure::{DatabaseManager, SqliteRunLedger};

/// 主应用程序
///
/// 持有数据库连接池、分区集目录和对外的分区服务。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    ledger: Arc<SqliteRunLedger>,
    service: PartitionService,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    /// 创建新的应用实例：连接数据库、执行迁移、加载分区集目录
    pub async fn new(config: AppConfig) -> Result<Self> {
        let catalog = PartitionSetCatalog::load(&config.catalog.definitions_path)
            .with_context(|| format!("加载分区集目录失败: {}", config.catalog.definitions_path))?;
        Self::with_catalog(config, catalog, Arc::new(SystemClock)).await
    }

    /// 使用已构建的目录和时钟创建应用实例
    pub async fn with_catalog(
        config: AppConfig,
        catalog: PartitionSetCatalog,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        info!(
            database = %config.database.url,
            partition_sets = catalog.len(),
            "初始化分区引擎"
        );

        let metrics = config
            .observability
            .metrics_enabled
            .then(metrics::install_prometheus_recorder);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        database.migrate().await.context("数据库迁移失败")?;

        let ledger = database.run_ledger();
        let deps = ServiceDependencies {
            ledger: ledger.clone(),
            dynamic_store: database.dynamic_partitions_store(),
            backfill_store: database.backfill_store(),
            clock,
        };
        let service = PartitionService::new(Arc::new(catalog), deps, &config);

        Ok(Self {
            config,
            database,
            ledger,
            service,
            metrics,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &PartitionService {
        &self.service
    }

    /// Write side of the run ledger. The engine itself only reads runs.
    pub fn ledger(&self) -> &SqliteRunLedger {
        &self.ledger
    }

    /// Prometheus text of everything recorded so far; `None` when metrics are disabled.
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.database.health_check().await
    }

    pub async fn shutdown(&self) {
        info!("关闭数据库连接池");
        self.database.close().await;
    }
}
