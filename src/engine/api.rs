// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-facing cache operations.
//!
//! Every operation follows the same path: refuse once closed, encode (local
//! errors stop here), resolve the shard, pass the breaker gate, call the
//! store, record the outcome.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::types::{CacheEntry, LoadError, WriteOperation};
use super::write_behind::FlushOutcome;
use super::{write_around_ttl, CacheEngine, EngineInner};
use crate::compression::is_compressed;
use crate::config::{CacheEngineConfig, Strategy};
use crate::error::CacheError;
use crate::resilience::adaptive::BackendCircuits;
use crate::resilience::circuit_breaker::CircuitStats;
use crate::sharding::topology::Shard;
use crate::stats::Stats;
use crate::storage::traits::StorageError;

/// Keys requested per SCAN round trip during clear.
const CLEAR_SCAN_COUNT: usize = 100;

/// Keys per DEL during clear.
const CLEAR_DELETE_CHUNK: usize = 1000;

impl CacheEngine {
    /// Store `value` under `key`.
    ///
    /// `ttl` of `None` or zero uses the configured default. How the write
    /// reaches the store depends on the configured [`Strategy`].
    #[tracing::instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let _timer = self.inner.begin("set")?;
        let result = self.write(key, value, ttl).await;
        self.inner.observe("set", &result);
        result
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let inner = &*self.inner;
        let encoded = inner.payload.encode(value).map_err(|e| inner.local_failure(e))?;
        inner.resolve_shard(key)?;

        let ttl = inner.resolve_ttl(ttl);
        let size = encoded.bytes.len();
        match inner.config.strategy {
            Strategy::WriteThrough | Strategy::ReadThrough => {
                inner.call_store("set", inner.store.set(key, &encoded.bytes, ttl)).await?;
            }
            Strategy::WriteAround => {
                let ttl = write_around_ttl(ttl);
                inner.call_store("set", inner.store.set(key, &encoded.bytes, ttl)).await?;
            }
            Strategy::WriteBehind => {
                inner.submit(WriteOperation::set(key, encoded.bytes, ttl)).await?;
            }
        }

        inner.stats.record_set();
        crate::metrics::record_bytes_written(size);
        debug!(key, bytes = size, compressed = encoded.compressed, "Cached value");
        Ok(())
    }

    /// Fetch and decode the value under `key`.
    ///
    /// On a miss under [`Strategy::ReadThrough`] the configured loader is
    /// consulted and its value cached with the default TTL.
    #[tracing::instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let _timer = self.inner.begin("get")?;
        let result = self.read(key).await;
        if result.is_err() {
            self.inner.observe("get", &result);
        }
        result
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let inner = &*self.inner;
        inner.resolve_shard(key)?;

        if let Some(bytes) = inner.call_store("get", inner.store.get(key)).await? {
            inner.stats.record_hit();
            crate::metrics::record_operation("get", "hit");
            crate::metrics::record_bytes_read(bytes.len());
            return inner.payload.decode(&bytes).map(Some).map_err(|e| inner.local_failure(e));
        }

        inner.stats.record_miss();
        crate::metrics::record_operation("get", "miss");
        if inner.config.strategy != Strategy::ReadThrough {
            return Ok(None);
        }

        match inner.load_through(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| inner.local_failure(CacheError::Deserialization(e.to_string()))),
            None => Ok(None),
        }
    }

    /// Remove `key`. Queued behind earlier writes under write-behind.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _timer = self.inner.begin("delete")?;
        let result = self.remove(key).await;
        self.inner.observe("delete", &result);
        result
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let inner = &*self.inner;
        inner.resolve_shard(key)?;

        if inner.config.strategy == Strategy::WriteBehind {
            inner.submit(WriteOperation::delete(key)).await?;
            inner.stats.record_deletes(1);
        } else {
            let keys = [key.to_string()];
            let deleted = inner.call_store("delete", inner.store.del(&keys)).await?;
            inner.stats.record_deletes(deleted);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let _timer = self.inner.begin("exists")?;
        let inner = &*self.inner;
        let result = match inner.resolve_shard(key) {
            Ok(_) => inner.call_store("exists", inner.store.exists(key)).await,
            Err(e) => Err(e),
        };
        inner.observe("exists", &result);
        result
    }

    /// Reset the time to live of `key`. Zero uses the configured default.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let _timer = self.inner.begin("expire")?;
        let result = self.reexpire(key, ttl).await;
        self.inner.observe("expire", &result);
        result
    }

    async fn reexpire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let inner = &*self.inner;
        inner.resolve_shard(key)?;
        let ttl = inner.resolve_ttl(Some(ttl));

        if inner.config.strategy == Strategy::WriteBehind {
            inner.submit(WriteOperation::expire(key, ttl)).await
        } else {
            let found = inner.call_store("expire", inner.store.expire(key, ttl)).await?;
            if !found {
                debug!(key, "Expire on missing key");
            }
            Ok(())
        }
    }

    /// Delete every key matching the glob `pattern`. Returns how many were
    /// deleted.
    ///
    /// Not atomic: a failed chunk is logged and the scan carries on; the
    /// first such error is returned at the end and nothing is rolled back.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, pattern: &str) -> Result<u64, CacheError> {
        let _timer = self.inner.begin("clear")?;
        let inner = &*self.inner;
        let result = inner.call_store("clear", inner.scan_and_delete(pattern)).await;
        inner.observe("clear", &result);
        if let Ok(deleted) = &result {
            info!(pattern, deleted = *deleted, "Cache cleared");
        }
        result
    }

    /// Metadata of the entry under `key`, without decoding its payload.
    #[tracing::instrument(skip(self))]
    pub async fn inspect(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let _timer = self.inner.begin("inspect")?;
        let result = self.entry(key).await;
        self.inner.observe("inspect", &result);
        result
    }

    async fn entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let inner = &*self.inner;
        let shard = inner.resolve_shard(key)?;

        // Metadata first, so reading the payload does not count as an access
        let metadata = inner.call_store("key_metadata", inner.store.key_metadata(key)).await?;
        let Some(bytes) = inner.call_store("get", inner.store.get(key)).await? else {
            return Ok(None);
        };
        let ttl = inner.call_store("ttl", inner.store.ttl(key)).await?;
        let metadata = metadata.unwrap_or_default();

        Ok(Some(CacheEntry {
            key: key.to_string(),
            size_bytes: bytes.len(),
            compressed: is_compressed(&bytes),
            ttl,
            expires_at_ms: ttl.map(|ttl| crate::unix_millis() + ttl.as_millis() as u64),
            created_at_ms: metadata.created_at_ms,
            last_access_ms: metadata.last_access_ms,
            access_count: metadata.access_count,
            shard,
        }))
    }

    /// Write out everything queued so far and wait for it.
    ///
    /// Returns at once unless the strategy is write-behind. `Ok` means every
    /// queued operation reached the store. Operations the store breaker
    /// holds back stay queued and the call fails with
    /// [`CacheError::CircuitOpen`]; a failed batch is dropped and reported as
    /// [`CacheError::Backend`].
    pub async fn flush(&self) -> Result<(), CacheError> {
        let _timer = self.inner.begin("flush")?;
        let Some(flush_tx) = &self.inner.flush_tx else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        flush_tx.send(ack_tx).await.map_err(|_| CacheError::Closed)?;
        let outcome = ack_rx.await.map_err(|_| CacheError::Closed)?;

        let result = match outcome {
            FlushOutcome::Written => Ok(()),
            FlushOutcome::Held => Err(CacheError::CircuitOpen {
                dependency: self.inner.circuits.store.name().to_string(),
            }),
            FlushOutcome::Failed => Err(CacheError::Backend {
                operation: "flush",
                source: StorageError::Backend("write-behind batch failed, operations dropped".into()),
            }),
        };
        self.inner.observe("flush", &result);
        result
    }

    /// Counters plus server-side memory, connections and evictions.
    pub async fn get_stats(&self) -> Stats {
        self.inner.collect_stats().await
    }

    /// Zero all counters and the latency window.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        info!("Cache stats reset");
    }

    /// Node owning `key`; `None` when the ring is empty.
    #[must_use]
    pub fn shard_for(&self, key: &str) -> Option<String> {
        self.inner.ring.read().lookup(key).map(str::to_string)
    }

    /// Known shards, sorted by id.
    #[must_use]
    pub fn shards(&self) -> Vec<Shard> {
        self.inner.shards.read().shards()
    }

    #[must_use]
    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.inner.circuits.stats()
    }

    /// The dependency breakers, for listeners and operator overrides.
    #[must_use]
    pub fn circuits(&self) -> &BackendCircuits {
        &self.inner.circuits
    }

    #[must_use]
    pub fn config(&self) -> &CacheEngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl EngineInner {
    /// Load a missing key through the loader breaker and cache it.
    ///
    /// A failed cache write is logged; the loaded value is still returned.
    async fn load_through(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let Some(loader) = &self.loader else {
            return Ok(None);
        };
        let loaded = self
            .gated(&self.circuits.loader, "load", loader.load(key), |e: LoadError| {
                CacheError::Loader(e.to_string())
            })
            .await?;
        let Some(value) = loaded else {
            debug!(key, "Loader has no value");
            return Ok(None);
        };

        match self.payload.encode_value(&value) {
            Ok(encoded) => {
                let ttl = self.config.default_ttl();
                match self.call_store("set", self.store.set(key, &encoded.bytes, ttl)).await {
                    Ok(()) => {
                        self.stats.record_set();
                        crate::metrics::record_bytes_written(encoded.bytes.len());
                    }
                    Err(e) => warn!(key, error = %e, "Failed to cache loaded value"),
                }
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key, error = %e, "Loaded value could not be encoded");
            }
        }
        Ok(Some(value))
    }

    /// SCAN in pages and DEL in chunks so only one chunk of keys is held.
    async fn scan_and_delete(&self, pattern: &str) -> Result<u64, StorageError> {
        let mut cursor = 0;
        let mut pending: Vec<String> = Vec::new();
        let mut deleted = 0;
        let mut first_error: Option<StorageError> = None;

        loop {
            let page = self.store.scan(cursor, pattern, CLEAR_SCAN_COUNT).await?;
            pending.extend(page.keys);
            while pending.len() >= CLEAR_DELETE_CHUNK {
                let chunk: Vec<String> = pending.drain(..CLEAR_DELETE_CHUNK).collect();
                deleted += self.delete_chunk(&chunk, &mut first_error).await;
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        if !pending.is_empty() {
            deleted += self.delete_chunk(&pending, &mut first_error).await;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    async fn delete_chunk(&self, keys: &[String], first_error: &mut Option<StorageError>) -> u64 {
        match self.store.del(keys).await {
            Ok(deleted) => {
                self.stats.record_deletes(deleted);
                deleted
            }
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Clear chunk failed, continuing");
                first_error.get_or_insert(e);
                0
            }
        }
    }

    /// Stats snapshot merged with the store's server-side figures.
    pub(crate) async fn collect_stats(&self) -> Stats {
        let mut stats = self.stats.snapshot();
        match tokio::time::timeout(self.config.command_timeout(), self.store.server_stats()).await {
            Ok(Ok(server)) => {
                stats.memory_usage_bytes = server.memory_used_bytes.unwrap_or(0);
                stats.connection_count = server.connections;
                if let Some(total) = server.evicted_keys {
                    stats.evictions = self.stats.evictions_since_reset(total);
                }
            }
            Ok(Err(e)) => debug!(error = %e, "Server stats unavailable"),
            Err(_) => debug!("Server stats timed out"),
        }
        stats
    }
}
