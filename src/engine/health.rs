// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health checks, topology refresh and the health monitor task.
//!
//! Health checks bypass the breaker: they must keep answering while it is
//! open, and their failures do not count against it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::types::{HealthReport, HealthStatus};
use super::{CacheEngine, EngineInner};
use crate::error::CacheError;
use crate::resilience::circuit_breaker::CircuitState;
use crate::scheduler::PeriodicTask;
use crate::sharding::topology::TopologyChange;
use crate::storage::traits::StorageError;

/// Below this share of healthy nodes the cluster counts as down.
const MIN_HEALTHY_RATIO: f64 = 0.5;

/// Memory use above this share of `max_memory_bytes` degrades health.
const HIGH_MEMORY_PRESSURE: f64 = 0.9;

/// Store failure rate above this degrades health.
const DEGRADED_FAILURE_RATE: f64 = 0.1;

impl CacheEngine {
    /// Pass/fail health check: the store answers a ping, at least half the
    /// cluster nodes (and at least one) are healthy, and the store breaker
    /// is not open.
    pub async fn health_check(&self) -> Result<(), CacheError> {
        if self.inner.is_closed() {
            return Err(CacheError::Closed);
        }
        let inner = &*self.inner;
        let timeout = inner.config.health_timeout();

        let check = async {
            inner.store.ping().await.map_err(|source| CacheError::Backend { operation: "ping", source })?;

            let (healthy, total) = inner.cluster_health().await?;
            if !cluster_ok(healthy, total) {
                return Err(CacheError::ClusterDegraded { healthy, total });
            }

            if inner.circuits.store.state() == CircuitState::Open {
                return Err(CacheError::CircuitOpen { dependency: inner.circuits.store.name().to_string() });
            }
            Ok::<(), CacheError>(())
        };

        tokio::time::timeout(timeout, check).await.map_err(|_| CacheError::Backend {
            operation: "health_check",
            source: StorageError::Timeout { operation: "health_check", after: timeout },
        })?
    }

    /// Detailed health of the engine and its store.
    pub async fn health_report(&self) -> HealthReport {
        self.inner.health_report().await
    }

    /// Re-read the cluster topology and update the ring.
    pub async fn refresh_topology(&self) -> Result<TopologyChange, CacheError> {
        self.inner.refresh_topology().await
    }
}

fn cluster_ok(healthy: usize, total: usize) -> bool {
    healthy > 0 && healthy as f64 >= total as f64 * MIN_HEALTHY_RATIO
}

impl EngineInner {
    /// Apply the store's current topology to the shard table and the ring.
    ///
    /// Healthy nodes join the ring; unhealthy or vanished ones leave it.
    pub(crate) async fn refresh_topology(&self) -> Result<TopologyChange, CacheError> {
        let nodes = self
            .store
            .cluster_topology()
            .await
            .map_err(|source| CacheError::Backend { operation: "cluster_topology", source })?;

        let mut change = self.shards.write().apply(&nodes, crate::unix_millis());
        if !change.is_empty() {
            let ring_size = {
                let mut ring = self.ring.write();
                change.apply_to(&mut ring);
                ring.len()
            };
            crate::metrics::record_topology_change(change.added.len(), change.removed.len());
            crate::metrics::set_last_rebalance_share(change.moved_share());
            for key_move in &change.moves {
                crate::metrics::record_rebalance(&key_move.from, &key_move.to, key_move.share());
                debug!(
                    from = %key_move.from,
                    to = %key_move.to,
                    share = key_move.share(),
                    "Keys changing owner"
                );
            }
            info!(
                added = ?change.added,
                removed = ?change.removed,
                ring_nodes = ring_size,
                moved_share = change.moved_share(),
                "Cluster topology changed"
            );
        }

        let (healthy, total) = self.shards.read().health_counts();
        crate::metrics::set_cluster_nodes(healthy, total);
        Ok(change)
    }

    /// (healthy, total) cluster nodes. Refreshes the ring when sharding.
    async fn cluster_health(&self) -> Result<(usize, usize), CacheError> {
        if self.config.sharding_enabled {
            self.refresh_topology().await?;
            return Ok(self.shards.read().health_counts());
        }
        let nodes = self
            .store
            .cluster_topology()
            .await
            .map_err(|source| CacheError::Backend { operation: "cluster_topology", source })?;
        Ok((nodes.iter().filter(|n| n.healthy).count(), nodes.len()))
    }

    pub(crate) async fn health_report(&self) -> HealthReport {
        let started = Instant::now();
        let ping = self.store.ping().await;
        let ping_latency = started.elapsed();

        let (healthy_nodes, total_nodes) = match self.cluster_health().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Cluster topology unavailable");
                (0, 0)
            }
        };
        let healthy_ratio = if total_nodes == 0 {
            0.0
        } else {
            healthy_nodes as f64 / total_nodes as f64
        };

        let memory_pressure = match self.store.server_stats().await {
            Ok(server) => server
                .memory_used_bytes
                .filter(|_| self.config.max_memory_bytes > 0)
                .map(|used| used as f64 / self.config.max_memory_bytes as f64),
            Err(e) => {
                debug!(error = %e, "Server stats unavailable for health report");
                None
            }
        };
        if let Some(pressure) = memory_pressure {
            crate::metrics::set_memory_pressure(pressure);
        }

        let store_circuit = self.circuits.store.state();
        let store_failure_rate = self.circuits.store.failure_rate();

        let status = if ping.is_err()
            || store_circuit == CircuitState::Open
            || !cluster_ok(healthy_nodes, total_nodes)
        {
            HealthStatus::Unhealthy
        } else if store_circuit == CircuitState::HalfOpen
            || healthy_ratio < 1.0
            || memory_pressure.is_some_and(|p| p >= HIGH_MEMORY_PRESSURE)
            || store_failure_rate > DEGRADED_FAILURE_RATE
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            store_circuit,
            healthy_nodes,
            total_nodes,
            healthy_ratio,
            ping_latency_ms: ping.is_ok().then(|| ping_latency.as_secs_f64() * 1000.0),
            ping_error: ping.err().map(|e| e.to_string()),
            memory_pressure,
            store_failure_rate,
            checked_at_ms: crate::unix_millis(),
        }
    }
}

/// Periodic health report, logging status changes.
pub(super) struct HealthMonitor {
    inner: Arc<EngineInner>,
    last_status: Option<HealthStatus>,
}

impl HealthMonitor {
    pub(super) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner, last_status: None }
    }
}

#[async_trait]
impl PeriodicTask for HealthMonitor {
    fn name(&self) -> &'static str {
        "health_monitor"
    }

    async fn tick(&mut self) {
        let timeout = self.inner.config.health_timeout();
        let Ok(report) = tokio::time::timeout(timeout, self.inner.health_report()).await else {
            warn!(?timeout, "Health check timed out");
            crate::metrics::set_backend_healthy(false);
            return;
        };
        crate::metrics::set_backend_healthy(report.status != HealthStatus::Unhealthy);

        if self.last_status == Some(report.status) {
            debug!(status = %report.status, "Health unchanged");
            return;
        }
        match report.status {
            HealthStatus::Healthy => info!(
                healthy = report.healthy_nodes,
                total = report.total_nodes,
                "Cache backend healthy"
            ),
            HealthStatus::Degraded => warn!(
                healthy = report.healthy_nodes,
                total = report.total_nodes,
                circuit = %report.store_circuit,
                failure_rate = report.store_failure_rate,
                memory_pressure = ?report.memory_pressure,
                "Cache backend degraded"
            ),
            HealthStatus::Unhealthy => error!(
                healthy = report.healthy_nodes,
                total = report.total_nodes,
                circuit = %report.store_circuit,
                ping_error = ?report.ping_error,
                "Cache backend unhealthy"
            ),
        }
        self.last_status = Some(report.status);
    }
}
