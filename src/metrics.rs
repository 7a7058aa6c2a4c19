// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for cache-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `cache_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `operation`: set, get, delete, exists, expire, clear, flush
//! - `status`: success, hit, miss, error, rejected
//! - `circuit`: store, loader

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::compression::CompressionStats;
use crate::stats::Stats;

/// Record a completed engine operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "cache_engine_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "cache_engine_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an operation slower than the configured threshold
pub fn record_slow_operation(operation: &str) {
    counter!(
        "cache_engine_slow_operations_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an error by type
pub fn record_error(operation: &str, error_type: &str) {
    counter!(
        "cache_engine_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

pub fn record_bytes_written(bytes: usize) {
    counter!("cache_engine_bytes_written_total").increment(bytes as u64);
}

pub fn record_bytes_read(bytes: usize) {
    counter!("cache_engine_bytes_read_total").increment(bytes as u64);
}

pub fn record_compression(algorithm: &str, stats: &CompressionStats) {
    histogram!(
        "cache_engine_compression_ratio",
        "algorithm" => algorithm.to_string()
    )
    .record(stats.ratio);
    counter!(
        "cache_engine_compressed_bytes_total",
        "algorithm" => algorithm.to_string()
    )
    .increment(stats.compressed_bytes as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// Circuit breakers
// ═══════════════════════════════════════════════════════════════════════════

/// Set circuit breaker state (0=closed, 1=half_open, 2=open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "cache_engine_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(f64::from(state));
}

/// Record a gate decision (allowed, rejected)
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "cache_engine_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_circuit_transition(circuit: &str, to: &str) {
    counter!(
        "cache_engine_circuit_breaker_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Write-behind
// ═══════════════════════════════════════════════════════════════════════════

/// Record a flushed write-behind batch
pub fn record_batch_flush(reason: &str, count: usize, duration: Duration) {
    counter!(
        "cache_engine_batch_flushes_total",
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!("cache_engine_batch_size").record(count as f64);
    histogram!("cache_engine_batch_flush_seconds").record(duration.as_secs_f64());
}

/// Record the per-shard share of a batch
pub fn record_shard_batch(shard: &str, count: usize) {
    histogram!(
        "cache_engine_shard_batch_size",
        "shard" => shard.to_string()
    )
    .record(count as f64);
}

/// Record a write that bypassed the queue because it was full
pub fn record_write_behind_fallback(kind: &str) {
    counter!(
        "cache_engine_write_behind_fallbacks_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record operations lost when a batch failed
pub fn record_write_behind_dropped(count: usize) {
    counter!("cache_engine_write_behind_dropped_total").increment(count as u64);
}

pub fn set_write_behind_pending(count: usize) {
    gauge!("cache_engine_write_behind_pending").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// Health and topology
// ═══════════════════════════════════════════════════════════════════════════

pub fn set_cluster_nodes(healthy: usize, total: usize) {
    gauge!("cache_engine_cluster_nodes_healthy").set(healthy as f64);
    gauge!("cache_engine_cluster_nodes_total").set(total as f64);
}

pub fn record_topology_change(added: usize, removed: usize) {
    counter!("cache_engine_topology_nodes_added_total").increment(added as u64);
    counter!("cache_engine_topology_nodes_removed_total").increment(removed as u64);
}

/// Sampled key movement of the last topology change, per source and target node.
pub fn record_rebalance(from: &str, to: &str, share: f64) {
    histogram!(
        "cache_engine_rebalance_key_share",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .record(share);
}

pub fn set_last_rebalance_share(share: f64) {
    gauge!("cache_engine_last_rebalance_share").set(share);
}

pub fn set_backend_healthy(healthy: bool) {
    gauge!("cache_engine_backend_healthy").set(if healthy { 1.0 } else { 0.0 });
}

pub fn set_memory_pressure(pressure: f64) {
    gauge!("cache_engine_memory_pressure").set(pressure);
}

/// Publish a stats snapshot as gauges
pub fn publish_stats(stats: &Stats) {
    gauge!("cache_engine_hits").set(stats.hits as f64);
    gauge!("cache_engine_misses").set(stats.misses as f64);
    gauge!("cache_engine_sets").set(stats.sets as f64);
    gauge!("cache_engine_deletes").set(stats.deletes as f64);
    gauge!("cache_engine_evictions").set(stats.evictions as f64);
    gauge!("cache_engine_errors").set(stats.errors as f64);
    gauge!("cache_engine_hit_rate").set(stats.hit_rate());
    gauge!("cache_engine_latency_avg_ms").set(stats.avg_latency_ms);
    gauge!("cache_engine_latency_p95_ms").set(stats.p95_latency_ms);
    gauge!("cache_engine_latency_p99_ms").set(stats.p99_latency_ms);
    gauge!("cache_engine_memory_usage_bytes").set(stats.memory_usage_bytes as f64);
    gauge!("cache_engine_connections").set(stats.connection_count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These verify the API doesn't panic without a recorder installed.

    #[test]
    fn test_record_operation() {
        record_operation("get", "hit");
        record_operation("set", "error");
        record_latency("get", Duration::from_micros(100));
        record_slow_operation("clear");
        record_error("get", "timeout");
    }

    #[test]
    fn test_circuit_metrics() {
        set_circuit_state("store", 2);
        record_circuit_call("store", "rejected");
        record_circuit_transition("store", "open");
    }

    #[test]
    fn test_write_behind_metrics() {
        record_batch_flush("interval", 42, Duration::from_millis(3));
        record_shard_batch("node-a", 20);
        record_write_behind_fallback("set");
        record_write_behind_dropped(5);
        set_write_behind_pending(7);
    }

    #[test]
    fn test_publish_stats_gauges() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            publish_stats(&Stats { hits: 3, misses: 1, ..Default::default() });
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let hit_rate = snapshot
            .into_iter()
            .find(|(key, ..)| key.key().name() == "cache_engine_hit_rate")
            .map(|(.., value)| value);
        assert_eq!(hit_rate, Some(DebugValue::Gauge(0.75.into())));
    }
}
