//! Structured logging utilities
//!
//! Event helpers for the operations operators care about: dynamic partition mutations,
//! backfill transitions and run-ledger failures.

use tracing::{debug, info, warn};

use crate::models::BackfillState;
use crate::PartitionError;

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_dynamic_partitions_added(definition: &str, keys: &[String]) {
        info!(
            event = "dynamic_partitions_added",
            definition = definition,
            key_count = keys.len(),
            keys = ?keys,
            "Dynamic partitions added"
        );
    }

    pub fn log_dynamic_partitions_deleted(definition: &str, keys: &[String]) {
        info!(
            event = "dynamic_partitions_deleted",
            definition = definition,
            key_count = keys.len(),
            keys = ?keys,
            "Dynamic partitions deleted"
        );
    }

    pub fn log_dynamic_mutation_rejected(definition: &str, error: &PartitionError) {
        warn!(
            event = "dynamic_partitions_rejected",
            definition = definition,
            error = %error,
            "Dynamic partition mutation rejected"
        );
    }

    pub fn log_backfill_created(backfill_id: &str, partition_set: &str, targeted: usize) {
        info!(
            event = "backfill_created",
            backfill.id = backfill_id,
            backfill.partition_set = partition_set,
            backfill.targeted = targeted,
            "Backfill requested"
        );
    }

    pub fn log_backfill_transition(backfill_id: &str, from: BackfillState, to: BackfillState) {
        info!(
            event = "backfill_transition",
            backfill.id = backfill_id,
            backfill.from = %from,
            backfill.to = %to,
            "Backfill state changed"
        );
    }

    pub fn log_backfill_transition_conflict(backfill_id: &str, attempted: BackfillState) {
        debug!(
            event = "backfill_transition_conflict",
            backfill.id = backfill_id,
            backfill.attempted = %attempted,
            "Backfill transition lost a compare-and-set race"
        );
    }

    pub fn log_ledger_failure(partition_set: &str, error: &PartitionError) {
        warn!(
            event = "ledger_query_failed",
            partition_set = partition_set,
            error = %error,
            "Run ledger query failed"
        );
    }
}
