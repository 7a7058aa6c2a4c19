// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// One node of the backing cluster as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    pub address: String,
    pub weight: u32,
    pub healthy: bool,
}

/// Server-side figures merged into the engine's stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub memory_used_bytes: Option<u64>,
    /// Cumulative keys the server evicted under memory pressure
    pub evicted_keys: Option<u64>,
    pub connections: usize,
}

/// Per-key bookkeeping a store may track. Every field is optional because
/// Redis only exposes idle time (and access frequency under LFU).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMetadata {
    /// ms since epoch
    pub created_at_ms: Option<u64>,
    /// ms since epoch
    pub last_access_ms: Option<u64>,
    pub access_count: Option<u64>,
}

/// One page of a cursor scan. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    pub cursor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: String, value: Vec<u8>, ttl: Duration },
    Del { key: String },
    Expire { key: String, ttl: Duration },
}

impl BatchOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Del { key } | Self::Expire { key, .. } => key,
        }
    }
}

/// Ordered commands sent to the store in one pipelined round trip.
///
/// Commands execute in insertion order; the batch is not atomic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { ops: Vec::with_capacity(capacity) }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.ops.push(BatchOp::Set { key: key.into(), value, ttl });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Del { key: key.into() });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(BatchOp::Expire { key: key.into(), ttl });
        self
    }

    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A remote key-value store the engine caches into.
///
/// Keys are logical keys; any prefixing is the implementation's business.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Remaining time to live; `None` for a missing key or one without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError>;

    /// One page of keys matching a glob `pattern`, starting at `cursor`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StorageError>;

    /// Execute a batch in one round trip (pipelined for Redis).
    /// Default implementation falls back to sequential calls.
    async fn exec_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value, ttl } => self.set(&key, &value, ttl).await?,
                BatchOp::Del { key } => {
                    self.del(std::slice::from_ref(&key)).await?;
                }
                BatchOp::Expire { key, ttl } => {
                    self.expire(&key, ttl).await?;
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError>;

    /// Current cluster membership. Single-node stores report themselves.
    async fn cluster_topology(&self) -> Result<Vec<NodeInfo>, StorageError>;

    async fn server_stats(&self) -> Result<ServerStats, StorageError> {
        Ok(ServerStats::default())
    }

    /// Access bookkeeping for `key`; `None` when the key is missing or the
    /// store keeps none.
    async fn key_metadata(&self, _key: &str) -> Result<Option<KeyMetadata>, StorageError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
