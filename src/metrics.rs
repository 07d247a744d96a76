// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the broker.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `loyalty_broker_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: crm, erp
//! - `operation`: create_identity, get_identity, record_order, get_loyalty
//! - `status`: success, deferred, fallback, miss, error

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a facade operation outcome
pub fn record_operation(store: &str, operation: &str, status: &str) {
    counter!(
        "loyalty_broker_operations_total",
        "store" => store.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record store-call latency
pub fn record_latency(store: &str, operation: &str, duration: Duration) {
    histogram!(
        "loyalty_broker_operation_seconds",
        "store" => store.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a health probe result
pub fn record_probe(store: &str, healthy: bool) {
    counter!(
        "loyalty_broker_probes_total",
        "store" => store.to_string(),
        "status" => if healthy { "healthy" } else { "unhealthy" }
    )
    .increment(1);
}

/// Record entries removed by a cache eviction pass
pub fn record_cache_evictions(count: usize) {
    counter!("loyalty_broker_cache_evictions_total").increment(count as u64);
}

/// Record operations dropped by queue overflow
pub fn record_queue_overflow(count: usize) {
    counter!("loyalty_broker_queue_overflow_dropped_total").increment(count as u64);
}

/// Record an operation dropped after exhausting its retry budget
pub fn record_queue_exhausted(kind: &str) {
    counter!(
        "loyalty_broker_queue_exhausted_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a recovery drain pass
pub fn record_drain_pass(processed: usize, failed: usize) {
    counter!("loyalty_broker_drain_processed_total").increment(processed as u64);
    counter!("loyalty_broker_drain_failed_total").increment(failed as u64);
}

/// Set current cache entry count
pub fn set_cache_entries(count: usize) {
    gauge!("loyalty_broker_cache_entries").set(count as f64);
}

/// Set current queue depth
pub fn set_queue_depth(count: usize) {
    gauge!("loyalty_broker_queue_depth").set(count as f64);
}

/// Set current system mode (0 = NORMAL, 1 = DEGRADED, 2 = EMERGENCY)
pub fn set_system_mode(mode: u8) {
    gauge!("loyalty_broker_system_mode").set(f64::from(mode));
}

#[cfg(test)]
mod tests {
    use super::*;

    // With no recorder installed these are no-ops; the tests pin the API.
    #[test]
    fn test_helpers_do_not_panic_without_recorder() {
        record_operation("crm", "create_identity", "success");
        record_latency("erp", "get_loyalty", Duration::from_millis(5));
        record_probe("crm", false);
        record_cache_evictions(20);
        record_queue_overflow(5);
        record_queue_exhausted("create_user");
        record_drain_pass(3, 1);
        set_cache_entries(10);
        set_queue_depth(2);
        set_system_mode(1);
    }
}
