//! Metrics instrumentation for the cache engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! process installs the exporter.
//!
//! # Metric Naming Convention
//! - `cache_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use crate::task::Action;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a task handed to the queue
pub fn record_task(action: Action) {
    counter!(
        "cache_engine_tasks_total",
        "action" => action.as_str()
    )
    .increment(1);
}

/// Record a node whose statistics were lost for this cycle
pub fn record_stats_node_failure(reason: &'static str) {
    counter!(
        "cache_engine_stats_node_failures_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a discarded top-key observation
pub fn record_discarded_observation(reason: &'static str) {
    counter!(
        "cache_engine_discarded_observations_total",
        "reason" => reason
    )
    .increment(1);
}

pub fn record_lookup_failure() {
    counter!("cache_engine_key_lookup_failures_total").increment(1);
}

pub fn record_reservation_failure() {
    counter!("cache_engine_reservation_failures_total").increment(1);
}

pub fn record_defrag_scheduled() {
    counter!("cache_engine_defrag_jobs_total").increment(1);
}

/// Record a completed statistics→plan→evict cycle
pub fn record_cycle(duration: Duration, cached_keys: usize) {
    histogram!("cache_engine_cycle_seconds").record(duration.as_secs_f64());
    gauge!("cache_engine_cached_keys").set(cached_keys as f64);
}
