use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use partition_core::config::AppConfig;
use partition_core::{logging, tags, FailurePolicy, RunRecord, RunStatus};
use partition_domain::{BackfillTarget, PartitionKey, PartitionSetSelector};
use partition_engine::Application;

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "partition-engine")]
#[command(version = "1.0.0")]
#[command(about = "分区集解析与回填状态引擎 - 命令行管理工具")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    /// 命令结束后将 Prometheus 指标输出到 stderr
    #[arg(long)]
    emit_metrics: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分区查询
    Partitions(PartitionCommands),
    /// 动态分区管理
    Dynamic(DynamicCommands),
    /// 回填管理
    Backfill(BackfillCommands),
    /// 运行记录账本
    Ledger(LedgerCommands),
    /// 配置管理
    Config(ConfigCommands),
}

#[derive(Args, Debug, Clone)]
struct SetArgs {
    /// 仓库名称
    #[arg(long)]
    repository: String,
    /// 分区集名称
    #[arg(long = "set")]
    partition_set: String,
}

impl SetArgs {
    fn selector(&self) -> PartitionSetSelector {
        PartitionSetSelector::new(&self.repository, &self.partition_set)
    }
}

#[derive(Args, Debug)]
struct PartitionCommands {
    #[command(subcommand)]
    action: PartitionActions,
}

#[derive(Subcommand, Debug)]
enum PartitionActions {
    /// 列出仓库中的分区集
    Sets {
        /// 仓库名称
        #[arg(long)]
        repository: String,
    },
    /// 列出分区集的全部分区键
    Keys {
        #[command(flatten)]
        set: SetArgs,
    },
    /// 分页列出分区键
    List {
        #[command(flatten)]
        set: SetArgs,
        /// 上一页最后一个分区键
        #[arg(long)]
        cursor: Option<String>,
        /// 每页数量
        #[arg(long)]
        limit: Option<usize>,
        /// 倒序
        #[arg(long)]
        reverse: bool,
    },
    /// 查看单个分区的最新运行状态
    Status {
        #[command(flatten)]
        set: SetArgs,
        /// 分区键
        #[arg(long)]
        key: String,
    },
    /// 查看全部分区的最新运行状态
    Statuses {
        #[command(flatten)]
        set: SetArgs,
    },
    /// 按状态统计分区数量
    Counts {
        #[command(flatten)]
        set: SetArgs,
        /// 仅统计这些分区键，缺省为全部分区
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// 查看分区的运行记录
    Runs {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        key: String,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// 查看分区运行时应携带的标签
    Tags {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        key: String,
    },
    /// 查看分区定义元数据
    Info {
        #[command(flatten)]
        set: SetArgs,
    },
    /// 按维度列出分区键
    Dimensions {
        #[command(flatten)]
        set: SetArgs,
    },
}

#[derive(Args, Debug)]
struct DynamicCommands {
    #[command(subcommand)]
    action: DynamicActions,
}

#[derive(Subcommand, Debug)]
enum DynamicActions {
    /// 注册动态分区定义
    Register { definition: String },
    /// 添加动态分区键
    Add {
        definition: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// 删除动态分区键
    Delete {
        definition: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// 列出动态分区键
    List { definition: String },
}

#[derive(Args, Debug)]
struct BackfillCommands {
    #[command(subcommand)]
    action: BackfillActions,
}

#[derive(Subcommand, Debug)]
enum BackfillActions {
    /// 创建回填
    Create {
        #[command(flatten)]
        set: SetArgs,
        /// 目标分区键
        #[arg(long, value_delimiter = ',', conflicts_with = "all", required_unless_present = "all")]
        keys: Vec<String>,
        /// 回填全部分区
        #[arg(long)]
        all: bool,
        /// 失败策略: best_effort | fail_fast
        #[arg(long)]
        failure_policy: Option<FailurePolicy>,
    },
    /// 记录回填已为某分区启动运行，并输出该运行应携带的标签
    Launch {
        #[arg(long)]
        id: String,
        #[arg(long)]
        key: String,
    },
    /// 取消回填
    Cancel {
        #[arg(long)]
        id: String,
    },
    /// 查看回填状态
    Status {
        #[arg(long)]
        id: String,
    },
    /// 列出分区集的回填
    List {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct LedgerCommands {
    #[command(subcommand)]
    action: LedgerActions,
}

#[derive(Subcommand, Debug)]
enum LedgerActions {
    /// 记录一次分区运行
    Record {
        #[command(flatten)]
        set: SetArgs,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        key: String,
        /// 运行状态，如 SUCCESS / FAILURE / STARTED
        #[arg(long)]
        status: RunStatus,
        /// 所属回填
        #[arg(long)]
        backfill_id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ConfigCommands {
    #[command(subcommand)]
    action: ConfigActions,
}

#[derive(Subcommand, Debug)]
enum ConfigActions {
    /// 输出生效配置
    Show,
    /// 校验配置与分区集目录
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliApp::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.observability.log_format = format.clone();
    }
    logging::init_from_config(&config.observability)?;

    if let Commands::Config(ConfigCommands {
        action: ConfigActions::Show,
    }) = &cli.command
    {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let app = Application::new(config).await?;
    let result = run(&app, cli.command).await;
    if cli.emit_metrics {
        match app.render_metrics() {
            Some(text) => eprint!("{text}"),
            None => eprintln!("指标未启用: observability.metrics_enabled = false"),
        }
    }
    app.shutdown().await;
    result
}

async fn run(app: &Application, command: Commands) -> Result<()> {
    let service = app.service();
    match command {
        Commands::Partitions(PartitionCommands { action }) => match action {
            PartitionActions::Sets { repository } => {
                let names: Vec<String> = service
                    .catalog()
                    .list(&repository)
                    .iter()
                    .map(|set| set.name().to_string())
                    .collect();
                print_json(&names)
            }
            PartitionActions::Keys { set } => {
                print_json(&service.list_partition_keys(&set.selector(), None).await?)
            }
            PartitionActions::List {
                set,
                cursor,
                limit,
                reverse,
            } => print_json(
                &service
                    .list_partitions(&set.selector(), cursor.as_deref(), limit, reverse)
                    .await?,
            ),
            PartitionActions::Status { set, key } => {
                print_json(&service.get_partition_status(&set.selector(), &key).await?)
            }
            PartitionActions::Statuses { set } => {
                print_json(&service.get_partition_statuses(&set.selector(), None).await?)
            }
            PartitionActions::Counts { set, keys } => {
                let selector = set.selector();
                let keys = if keys.is_empty() {
                    service
                        .list_partition_keys(&selector, None)
                        .await?
                        .iter()
                        .map(PartitionKey::encode)
                        .collect()
                } else {
                    keys
                };
                print_json(&service.get_status_counts(&selector, &keys).await?)
            }
            PartitionActions::Runs {
                set,
                key,
                cursor,
                limit,
            } => print_json(
                &service
                    .get_partition_runs(&set.selector(), &key, None, cursor.as_deref(), Some(limit))
                    .await?,
            ),
            PartitionActions::Tags { set, key } => {
                print_json(&service.partition_tags(&set.selector(), &key)?)
            }
            PartitionActions::Info { set } => {
                print_json(&service.partition_definition_info(&set.selector())?)
            }
            PartitionActions::Dimensions { set } => {
                print_json(&service.dimension_keys(&set.selector(), None).await?)
            }
        },
        Commands::Dynamic(DynamicCommands { action }) => match action {
            DynamicActions::Register { definition } => {
                service.register_dynamic_definition(&definition).await?;
                print_json(&definition)
            }
            DynamicActions::Add { definition, keys } => {
                print_json(&service.add_dynamic_partitions(&definition, &keys).await?)
            }
            DynamicActions::Delete { definition, keys } => {
                service.delete_dynamic_partitions(&definition, &keys).await?;
                print_json(&keys)
            }
            DynamicActions::List { definition } => {
                print_json(&service.list_dynamic_partitions(&definition).await?)
            }
        },
        Commands::Backfill(BackfillCommands { action }) => match action {
            BackfillActions::Create {
                set,
                keys,
                all,
                failure_policy,
            } => {
                let target = if all {
                    BackfillTarget::AllPartitions
                } else {
                    BackfillTarget::Partitions(keys)
                };
                let backfill = service
                    .create_backfill(&set.selector(), target, failure_policy)
                    .await?;
                info!(backfill_id = %backfill.id, "回填已创建");
                print_json(&backfill)
            }
            BackfillActions::Launch { id, key } => {
                let run_tags = service.backfill_run_tags(&id, &key).await?;
                service.record_backfill_run_launched(&id, &key).await?;
                print_json(&run_tags)
            }
            BackfillActions::Cancel { id } => print_json(&service.cancel_backfill(&id).await?),
            BackfillActions::Status { id } => print_json(&service.get_backfill_status(&id).await?),
            BackfillActions::List { set, cursor, limit } => print_json(
                &service
                    .list_backfills(&set.selector(), cursor.as_deref(), limit)
                    .await?,
            ),
        },
        Commands::Ledger(LedgerCommands { action }) => match action {
            LedgerActions::Record {
                set,
                run_id,
                key,
                status,
                backfill_id,
            } => {
                let mut run_tags = service.partition_tags(&set.selector(), &key)?;
                if let Some(backfill_id) = backfill_id {
                    run_tags.insert(tags::BACKFILL_ID_TAG.to_string(), backfill_id);
                }
                let run = RunRecord::new(run_id, status).with_tags(run_tags);
                app.ledger().record(&run).await?;
                print_json(&run)
            }
        },
        Commands::Config(ConfigCommands { action }) => {
            match action {
                ConfigActions::Show => print!("{}", app.config().to_toml()?),
                ConfigActions::Validate => {
                    app.health_check().await?;
                    println!("配置有效: {} 个分区集", service.catalog().len());
                }
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("序列化输出失败")?);
    Ok(())
}
