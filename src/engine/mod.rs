// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache engine.
//!
//! The [`CacheEngine`] ties the components together:
//! - payload codec and compression, applied before any store call
//! - one circuit breaker per dependency (store, read-through loader)
//! - a consistent-hash ring over the store's cluster nodes
//! - the write strategy, including the write-behind queue and flusher
//! - operator stats and health
//!
//! # Request path
//!
//! ```text
//! caller ─▶ encode ─▶ shard lookup ─▶ breaker gate ─▶ store ─▶ record outcome ─▶ stats
//!                                         │
//!                                         └─ open: CircuitOpen, store untouched
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! new/connect ─▶ ping ─▶ topology ─▶ spawn tasks ─▶ serving ─▶ close ─▶ drain ─▶ store.close
//! ```

mod types;
mod api;
mod health;
mod lifecycle;
mod write_behind;

pub use types::{CacheEntry, HealthReport, HealthStatus, LoadError, Loader, WriteKind, WriteOperation};

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use self::write_behind::FlushAck;
use crate::codec::PayloadCodec;
use crate::config::CacheEngineConfig;
use crate::error::CacheError;
use crate::resilience::adaptive::{AdaptiveCircuitBreaker, BackendCircuits};
use crate::sharding::hash_ring::ConsistentHashRing;
use crate::sharding::topology::ShardTable;
use crate::stats::StatsRecorder;
use crate::storage::traits::{BackingStore, StorageError};

/// Write-around entries never live shorter than this.
const WRITE_AROUND_MIN_TTL: Duration = Duration::from_secs(60);

/// Distributed cache in front of a [`BackingStore`].
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. Each shared
/// structure (breakers, ring, shard table, stats) has its own lock.
pub struct CacheEngine {
    pub(super) inner: Arc<EngineInner>,

    /// Flipped to true on close; background tasks watch it
    pub(super) shutdown: watch::Sender<bool>,

    /// Background task handles, taken by close
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared between the engine and its background tasks.
pub(crate) struct EngineInner {
    pub(crate) config: CacheEngineConfig,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) circuits: BackendCircuits,
    pub(crate) ring: RwLock<ConsistentHashRing>,
    pub(crate) shards: RwLock<ShardTable>,
    pub(crate) stats: StatsRecorder,
    pub(crate) payload: PayloadCodec,
    pub(crate) loader: Option<Arc<dyn Loader>>,

    /// Write-behind queue (write-behind strategy only)
    pub(crate) write_tx: Option<mpsc::Sender<WriteOperation>>,

    /// Manual flush requests, answered with the outcome of the next round
    pub(crate) flush_tx: Option<mpsc::Sender<FlushAck>>,

    pub(crate) closed: AtomicBool,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("strategy", &self.inner.config.strategy)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

/// Latency bookkeeping for one public operation. Records on drop, so a
/// cancelled call still lands in the latency window.
pub(crate) struct OpTimer<'a> {
    inner: &'a EngineInner,
    operation: &'static str,
    started: Instant,
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.inner.stats.record_latency(elapsed);
        crate::metrics::record_latency(self.operation, elapsed);

        if elapsed >= self.inner.config.slow_query_threshold() {
            crate::metrics::record_slow_operation(self.operation);
            warn!(
                operation = self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow cache operation"
            );
        }
    }
}

/// Holds a breaker admission until an outcome is recorded. Dropped without
/// one (the caller's future was cancelled), it hands back the trial slot.
struct TrialGuard<'a> {
    breaker: &'a AdaptiveCircuitBreaker,
    settled: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a AdaptiveCircuitBreaker) -> Self {
        Self { breaker, settled: false }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}

impl EngineInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start a public operation: refuse once closed, count it, time it.
    pub(crate) fn begin(&self, operation: &'static str) -> Result<OpTimer<'_>, CacheError> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        self.stats.record_operation();
        Ok(OpTimer { inner: self, operation, started: Instant::now() })
    }

    /// Record the outcome of a public operation in telemetry.
    pub(crate) fn observe<T>(&self, operation: &'static str, result: &Result<T, CacheError>) {
        match result {
            Ok(_) => crate::metrics::record_operation(operation, "success"),
            Err(CacheError::CircuitOpen { .. }) => crate::metrics::record_operation(operation, "rejected"),
            Err(e) => {
                crate::metrics::record_operation(operation, "error");
                crate::metrics::record_error(operation, e.kind());
            }
        }
    }

    /// Count a local (codec) failure. The breaker is never involved.
    pub(crate) fn local_failure(&self, err: CacheError) -> CacheError {
        self.stats.record_error();
        err
    }

    /// Run one dependency call behind `breaker`.
    ///
    /// Denied: counted as an error, `CircuitOpen`, the call is never polled.
    /// Admitted: the outcome is recorded on the breaker; failures are
    /// counted and wrapped by `wrap`.
    async fn gated<T, E, Fut>(
        &self,
        breaker: &AdaptiveCircuitBreaker,
        operation: &'static str,
        call: Fut,
        wrap: impl FnOnce(E) -> CacheError,
    ) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !breaker.allow() {
            self.stats.record_error();
            return Err(CacheError::CircuitOpen { dependency: breaker.name().to_string() });
        }

        let trial = TrialGuard::new(breaker);
        match call.await {
            Ok(value) => {
                trial.success();
                Ok(value)
            }
            Err(e) => {
                trial.failure();
                self.stats.record_error();
                warn!(operation, circuit = breaker.name(), error = %e, "Dependency call failed");
                Err(wrap(e))
            }
        }
    }

    /// Run one backing-store call behind the store breaker.
    pub(crate) async fn call_store<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.gated(&self.circuits.store, operation, call, |source| CacheError::Backend { operation, source })
            .await
    }

    /// Owning node for `key`. `Ok(None)` when sharding is off.
    pub(crate) fn resolve_shard(&self, key: &str) -> Result<Option<String>, CacheError> {
        if !self.config.sharding_enabled {
            return Ok(None);
        }
        match self.ring.read().lookup(key) {
            Some(node) => Ok(Some(node.to_string())),
            None => {
                self.stats.record_error();
                Err(CacheError::ShardUnavailable { key: key.to_string() })
            }
        }
    }

    /// Shard label used to group write-behind batches.
    pub(crate) fn shard_label(&self, key: &str) -> String {
        if !self.config.sharding_enabled {
            return "default".to_string();
        }
        self.ring.read().lookup(key).unwrap_or("unassigned").to_string()
    }

    /// `None` or zero falls back to the configured default.
    pub(crate) fn resolve_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => self.config.default_ttl(),
        }
    }
}

/// Write-around keeps a short-lived copy: a quarter of the TTL, at least a
/// minute.
pub(crate) fn write_around_ttl(ttl: Duration) -> Duration {
    (ttl / 4).max(WRITE_AROUND_MIN_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_around_ttl() {
        assert_eq!(write_around_ttl(Duration::from_secs(3600)), Duration::from_secs(900));
        assert_eq!(write_around_ttl(Duration::from_secs(100)), Duration::from_secs(60));
    }
}
