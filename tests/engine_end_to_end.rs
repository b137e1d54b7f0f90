//! 端到端测试：SQLite 存储 + 分区服务

use std::io::Write;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use partition_core::config::{AppConfig, DatabaseConfig};
use partition_core::metrics::names;
use partition_core::{tags, BackfillState, FixedClock, RunRecord, RunStatus};
use partition_domain::{BackfillTarget, PartitionRunStatus, PartitionSetCatalog, PartitionSetSelector};
use partition_engine::Application;

const CATALOG: &str = r#"
    location_name = "local"
    repository_name = "analytics"

    [[partition_sets]]
    name = "regional_daily"
    job_name = "regional_job"
    [partition_sets.definition]
    type = "multi"
    [[partition_sets.definition.dimensions]]
    name = "date"
    primary = true
    [partition_sets.definition.dimensions.definition]
    type = "time_window"
    start = "2024-03-01"
    end = "2024-03-03"
    schedule = "daily"
    timezone = "Europe/Berlin"
    [[partition_sets.definition.dimensions]]
    name = "region"
    [partition_sets.definition.dimensions.definition]
    type = "dynamic"
    name = "regions"
"#;

fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig::in_memory(),
        ..AppConfig::default()
    }
}

async fn application() -> Application {
    let catalog = PartitionSetCatalog::from_toml(CATALOG).unwrap();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
    Application::with_catalog(test_config(), catalog, clock).await.unwrap()
}

#[tokio::test]
async fn test_backfill_over_sqlite_storage() {
    let app = application().await;
    app.health_check().await.unwrap();
    let service = app.service();
    let selector = PartitionSetSelector::new("analytics", "regional_daily");

    service.register_dynamic_definition("regions").await.unwrap();
    service
        .add_dynamic_partitions("regions", &["eu".to_string(), "us".to_string()])
        .await
        .unwrap();

    let keys: Vec<String> = service
        .list_partition_keys(&selector, None)
        .await
        .unwrap()
        .iter()
        .map(|k| k.encode())
        .collect();
    assert_eq!(
        keys,
        vec!["2024-03-01|eu", "2024-03-01|us", "2024-03-02|eu", "2024-03-02|us"]
    );

    let backfill = service
        .create_backfill(
            &selector,
            BackfillTarget::Partitions(vec!["2024-03-01|eu".to_string(), "2024-03-02|us".to_string()]),
            None,
        )
        .await
        .unwrap();

    for (run_id, key, status) in [
        ("run-1", "2024-03-01|eu", RunStatus::Success),
        ("run-2", "2024-03-02|us", RunStatus::Failure),
    ] {
        let run_tags = service.backfill_run_tags(&backfill.id, key).await.unwrap();
        assert_eq!(run_tags.get(&tags::dimension_tag("region")).map(String::as_str), Some(&key[11..]));
        service.record_backfill_run_launched(&backfill.id, key).await.unwrap();
        app.ledger()
            .record(&RunRecord::new(run_id, status).with_tags(run_tags))
            .await
            .unwrap();
    }

    let snapshot = service.get_backfill_status(&backfill.id).await.unwrap();
    assert_eq!(snapshot.backfill.state, BackfillState::Failed);
    assert_eq!(snapshot.counts.num_materialized, 1);
    assert_eq!(snapshot.counts.num_failed, 1);

    let statuses = service.get_partition_statuses(&selector, None).await.unwrap();
    let unstarted = statuses
        .iter()
        .filter(|s| s.status == PartitionRunStatus::Unstarted)
        .count();
    assert_eq!(unstarted, 2);

    // Settled state was persisted
    let stored = service.list_backfills(&selector, None, None).await.unwrap();
    assert_eq!(stored[0].state, BackfillState::Failed);

    let rendered = app.render_metrics().unwrap();
    assert!(rendered.contains(names::BACKFILL_TRANSITIONS_TOTAL));
    assert!(rendered.contains(names::DYNAMIC_PARTITIONS_ADDED_TOTAL));

    app.shutdown().await;
}

#[tokio::test]
async fn test_application_loads_catalog_from_config() {
    let mut catalog_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(catalog_file, "{CATALOG}").unwrap();

    let mut config = test_config();
    config.catalog.definitions_path = catalog_file.path().to_string_lossy().into_owned();
    let app = Application::new(config).await.unwrap();
    assert_eq!(app.service().catalog().len(), 1);

    let mut bad = test_config();
    bad.catalog.definitions_path = "/no/such/partition_sets.toml".to_string();
    assert!(Application::new(bad).await.is_err());
}

#[tokio::test]
async fn test_metrics_disabled_has_no_recorder() {
    let mut config = test_config();
    config.observability.metrics_enabled = false;
    let catalog = PartitionSetCatalog::from_toml(CATALOG).unwrap();
    let app = Application::with_catalog(config, catalog, Arc::new(FixedClock::new(Utc::now())))
        .await
        .unwrap();
    assert!(app.render_metrics().is_none());
}
