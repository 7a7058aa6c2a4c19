// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator-facing cache statistics.
//!
//! Counters only grow between resets. Latency percentiles are computed
//! over a rolling window of the most recent samples.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Snapshot returned by [`crate::CacheEngine::get_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Keys the server evicted since the last reset
    pub evictions: u64,
    pub errors: u64,
    pub total_operations: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub memory_usage_bytes: u64,
    pub connection_count: usize,
    /// ms since epoch
    pub last_reset_ms: u64,
}

impl Stats {
    /// Hits over lookups; 0 before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    errors: u64,
    total_operations: u64,
    latencies_ms: VecDeque<f64>,
    last_reset_ms: u64,
    eviction_baseline: Option<u64>,
}

impl Counters {
    fn new(window: usize, now_ms: u64) -> Self {
        Self {
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            errors: 0,
            total_operations: 0,
            latencies_ms: VecDeque::with_capacity(window),
            last_reset_ms: now_ms,
            eviction_baseline: None,
        }
    }
}

#[derive(Debug)]
pub struct StatsRecorder {
    counters: RwLock<Counters>,
    window: usize,
}

impl StatsRecorder {
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            counters: RwLock::new(Counters::new(window, crate::unix_millis())),
            window,
        }
    }

    pub fn record_operation(&self) {
        self.counters.write().total_operations += 1;
    }

    pub fn record_hit(&self) {
        self.counters.write().hits += 1;
    }

    pub fn record_miss(&self) {
        self.counters.write().misses += 1;
    }

    pub fn record_set(&self) {
        self.counters.write().sets += 1;
    }

    pub fn record_deletes(&self, count: u64) {
        self.counters.write().deletes += count;
    }

    pub fn record_error(&self) {
        self.counters.write().errors += 1;
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let mut c = self.counters.write();
        if c.latencies_ms.len() == self.window {
            c.latencies_ms.pop_front();
        }
        c.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Evictions since the last reset, given the server's cumulative count.
    ///
    /// The first observation after a reset becomes the baseline.
    pub fn evictions_since_reset(&self, server_total: u64) -> u64 {
        let mut c = self.counters.write();
        let baseline = *c.eviction_baseline.get_or_insert(server_total);
        // Server restarts reset its counter
        if server_total < baseline {
            c.eviction_baseline = Some(server_total);
            return 0;
        }
        server_total - baseline
    }

    #[must_use]
    pub fn snapshot(&self) -> Stats {
        let c = self.counters.read();
        let mut sorted: Vec<f64> = c.latencies_ms.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        Stats {
            hits: c.hits,
            misses: c.misses,
            sets: c.sets,
            deletes: c.deletes,
            evictions: 0,
            errors: c.errors,
            total_operations: c.total_operations,
            avg_latency_ms: avg,
            p95_latency_ms: percentile(&sorted, 0.95),
            p99_latency_ms: percentile(&sorted, 0.99),
            memory_usage_bytes: 0,
            connection_count: 0,
            last_reset_ms: c.last_reset_ms,
        }
    }

    pub fn reset(&self) {
        *self.counters.write() = Counters::new(self.window, crate::unix_millis());
    }
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
