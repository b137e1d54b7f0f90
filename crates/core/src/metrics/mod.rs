//! Metric names and recording helpers built on the `metrics` facade.
//!
//! Recordings are no-ops until a recorder is installed; `install_prometheus_recorder`
//! installs the Prometheus one when `observability.metrics_enabled` is set.

use std::sync::OnceLock;
use std::time::Duration;

use ::metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

pub use metrics_exporter_prometheus::PrometheusHandle;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder as the global recorder, once per process.
/// Later calls return the same handle.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            match ::metrics::set_global_recorder(recorder) {
                Ok(()) => info!("Prometheus metrics recorder installed"),
                Err(e) => warn!(error = %e, "另一个指标记录器已安装，Prometheus 指标将为空"),
            }
            handle
        })
        .clone()
}

pub mod names {
    pub const LEDGER_QUERIES_TOTAL: &str = "partition_engine_ledger_queries_total";
    pub const LEDGER_FAILURES_TOTAL: &str = "partition_engine_ledger_failures_total";
    pub const LEDGER_QUERY_DURATION: &str = "partition_engine_ledger_query_duration_seconds";
    pub const STATUS_LOOKUPS_TOTAL: &str = "partition_engine_status_lookups_total";
    pub const DYNAMIC_PARTITIONS_ADDED_TOTAL: &str = "partition_engine_dynamic_partitions_added_total";
    pub const DYNAMIC_PARTITIONS_DELETED_TOTAL: &str =
        "partition_engine_dynamic_partitions_deleted_total";
    pub const BACKFILL_TRANSITIONS_TOTAL: &str = "partition_engine_backfill_transitions_total";
}

pub struct EngineMetrics;

impl EngineMetrics {
    pub fn record_ledger_query(partition_set: &str, elapsed: Duration, success: bool) {
        counter!(names::LEDGER_QUERIES_TOTAL, "partition_set" => partition_set.to_string())
            .increment(1);
        histogram!(names::LEDGER_QUERY_DURATION).record(elapsed.as_secs_f64());
        if !success {
            counter!(names::LEDGER_FAILURES_TOTAL, "partition_set" => partition_set.to_string())
                .increment(1);
        }
    }

    pub fn record_status_lookups(partition_set: &str, count: usize) {
        counter!(names::STATUS_LOOKUPS_TOTAL, "partition_set" => partition_set.to_string())
            .increment(count as u64);
    }

    pub fn record_dynamic_added(definition: &str, count: usize) {
        counter!(names::DYNAMIC_PARTITIONS_ADDED_TOTAL, "definition" => definition.to_string())
            .increment(count as u64);
    }

    pub fn record_dynamic_deleted(definition: &str, count: usize) {
        counter!(names::DYNAMIC_PARTITIONS_DELETED_TOTAL, "definition" => definition.to_string())
            .increment(count as u64);
    }

    pub fn record_backfill_transition(to: &str) {
        counter!(names::BACKFILL_TRANSITIONS_TOTAL, "to" => to.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_installs_once_and_renders_engine_metrics() {
        let _ = install_prometheus_recorder();
        EngineMetrics::record_backfill_transition("COMPLETED");
        EngineMetrics::record_dynamic_added("customers", 2);

        // A second install hands back the recorder that saw the recordings above.
        let rendered = install_prometheus_recorder().render();
        assert!(rendered.contains(names::BACKFILL_TRANSITIONS_TOTAL));
        assert!(rendered.contains(names::DYNAMIC_PARTITIONS_ADDED_TOTAL));
    }
}
