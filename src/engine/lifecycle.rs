// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine construction, background tasks and shutdown.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::health::HealthMonitor;
use super::types::Loader;
use super::write_behind::Flusher;
use super::{CacheEngine, EngineInner};
use crate::codec::PayloadCodec;
use crate::config::{CacheEngineConfig, Strategy};
use crate::error::CacheError;
use crate::resilience::adaptive::BackendCircuits;
use crate::scheduler::{spawn_periodic, PeriodicTask};
use crate::sharding::hash_ring::ConsistentHashRing;
use crate::sharding::topology::ShardTable;
use crate::stats::StatsRecorder;
use crate::storage::redis::RedisStore;
use crate::storage::traits::BackingStore;

/// Pending manual flush requests.
const FLUSH_REQUEST_CAPACITY: usize = 16;

impl CacheEngine {
    /// Connect to Redis at `config.addrs` and start the engine.
    pub async fn connect(config: CacheEngineConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let store = RedisStore::connect(&config)
            .await
            .map_err(|source| CacheError::Backend { operation: "connect", source })?;
        Self::start(config, Arc::new(store), None).await
    }

    /// Start an engine over an already connected store.
    pub async fn new(config: CacheEngineConfig, store: Arc<dyn BackingStore>) -> Result<Self, CacheError> {
        Self::start(config, store, None).await
    }

    /// Start an engine that fills read-through misses from `loader`.
    pub async fn with_loader(
        config: CacheEngineConfig,
        store: Arc<dyn BackingStore>,
        loader: Arc<dyn Loader>,
    ) -> Result<Self, CacheError> {
        Self::start(config, store, Some(loader)).await
    }

    /// Validate, ping the store, load the topology, spawn the background
    /// tasks.
    #[tracing::instrument(skip_all, fields(strategy = %config.strategy))]
    async fn start(
        config: CacheEngineConfig,
        store: Arc<dyn BackingStore>,
        loader: Option<Arc<dyn Loader>>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let payload = PayloadCodec::from_config(&config)?;
        store
            .ping()
            .await
            .map_err(|source| CacheError::Backend { operation: "ping", source })?;

        if config.strategy == Strategy::ReadThrough && loader.is_none() {
            warn!("Read-through strategy without a loader; misses return None");
        }

        let write_behind = config.strategy == Strategy::WriteBehind;
        let (write_tx, write_rx) = if write_behind {
            let (tx, rx) = mpsc::channel(config.write_behind.queue_capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (flush_tx, flush_rx) = if write_behind {
            let (tx, rx) = mpsc::channel(FLUSH_REQUEST_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let inner = Arc::new(EngineInner {
            circuits: BackendCircuits::new(&config.circuit_breaker),
            ring: RwLock::new(ConsistentHashRing::new(config.virtual_nodes)),
            shards: RwLock::new(ShardTable::new()),
            stats: StatsRecorder::new(config.latency_window),
            payload,
            loader,
            write_tx,
            flush_tx,
            closed: AtomicBool::new(false),
            store,
            config,
        });

        if inner.config.sharding_enabled {
            inner.refresh_topology().await?;
            if inner.ring.read().is_empty() {
                warn!("No healthy shards discovered; keyed operations fail until topology recovers");
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if let (Some(rx), Some(flush_rx)) = (write_rx, flush_rx) {
            let flusher = Flusher::new(Arc::clone(&inner), rx, flush_rx);
            tasks.push(spawn_periodic(flusher, inner.config.write_behind.flush_interval(), shutdown_rx.clone()));
        }
        if inner.config.metrics_enabled {
            let collector = StatsCollector { inner: Arc::clone(&inner) };
            tasks.push(spawn_periodic(collector, inner.config.stats_interval(), shutdown_rx.clone()));
        }
        let monitor = HealthMonitor::new(Arc::clone(&inner));
        tasks.push(spawn_periodic(monitor, inner.config.health_interval(), shutdown_rx));

        info!(
            sharding = inner.config.sharding_enabled,
            compression = inner.payload.compression_enabled(),
            nodes = inner.ring.read().len(),
            background_tasks = tasks.len(),
            "Cache engine started"
        );

        Ok(Self {
            inner,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Stop background tasks and close the store.
    ///
    /// The write-behind flusher drains its queue before stopping. Waits at
    /// most `shutdown_timeout_ms` for the tasks; stragglers are aborted.
    /// Idempotent; every other operation returns [`CacheError::Closed`]
    /// afterwards.
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Cache engine shutting down");
        self.shutdown.send_replace(true);

        let handles = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let timeout = self.inner.config.shutdown_timeout();

        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        };
        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!(?timeout, "Background tasks did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        self.inner
            .store
            .close()
            .await
            .map_err(|source| CacheError::Backend { operation: "close", source })?;
        info!("Cache engine closed");
        Ok(())
    }
}

/// Publishes stats gauges on every tick.
struct StatsCollector {
    inner: Arc<EngineInner>,
}

#[async_trait]
impl PeriodicTask for StatsCollector {
    fn name(&self) -> &'static str {
        "stats_collector"
    }

    async fn tick(&mut self) {
        let stats = self.inner.collect_stats().await;
        crate::metrics::publish_stats(&stats);
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            errors = stats.errors,
            p99_ms = stats.p99_latency_ms,
            "Stats published"
        );
    }
}
