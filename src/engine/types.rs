// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the cache engine.

use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::batching::SizedItem;
use crate::resilience::circuit_breaker::CircuitState;
use crate::storage::traits::WriteBatch;

/// Error type a [`Loader`] may return.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Authoritative source consulted on a read-through miss.
///
/// ```rust
/// use async_trait::async_trait;
/// use cache_engine::engine::{LoadError, Loader};
/// use serde_json::{json, Value};
///
/// struct Users;
///
/// #[async_trait]
/// impl Loader for Users {
///     async fn load(&self, key: &str) -> Result<Option<Value>, LoadError> {
///         Ok(key.strip_prefix("user:").map(|id| json!({ "id": id })))
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// `Ok(None)` when the source has no value for `key`.
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, LoadError>;
}

/// Kind of a queued write-behind operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Set,
    Delete,
    Expire,
}

impl WriteKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Expire => "expire",
        }
    }
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write waiting in the write-behind queue.
#[derive(Debug, Clone)]
pub struct WriteOperation {
    pub key: String,
    /// Encoded payload, only for [`WriteKind::Set`]
    pub payload: Option<Vec<u8>>,
    pub ttl: Duration,
    pub kind: WriteKind,
    pub enqueued_at: Instant,
}

impl WriteOperation {
    #[must_use]
    pub fn set(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        Self::new(key, Some(payload), ttl, WriteKind::Set)
    }

    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(key, None, Duration::ZERO, WriteKind::Delete)
    }

    #[must_use]
    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::new(key, None, ttl, WriteKind::Expire)
    }

    fn new(key: impl Into<String>, payload: Option<Vec<u8>>, ttl: Duration, kind: WriteKind) -> Self {
        Self {
            key: key.into(),
            payload,
            ttl,
            kind,
            enqueued_at: Instant::now(),
        }
    }

    /// Append this operation to a store batch.
    pub(crate) fn push_to(self, batch: &mut WriteBatch) {
        match self.kind {
            WriteKind::Set => batch.set(self.key, self.payload.unwrap_or_default(), self.ttl),
            WriteKind::Delete => batch.del(self.key),
            WriteKind::Expire => batch.expire(self.key, self.ttl),
        };
    }
}

impl SizedItem for WriteOperation {
    fn size_bytes(&self) -> usize {
        self.key.len() + self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// Metadata view of one cached key, returned by
/// [`super::CacheEngine::inspect`].
///
/// Bookkeeping fields are `None` when the store does not track them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    /// Stored payload size, after compression
    pub size_bytes: usize,
    pub compressed: bool,
    /// Remaining time to live; `None` when the key never expires
    pub ttl: Option<Duration>,
    /// ms since epoch
    pub expires_at_ms: Option<u64>,
    pub created_at_ms: Option<u64>,
    pub last_access_ms: Option<u64>,
    pub access_count: Option<u64>,
    /// Owning node when sharding is enabled
    pub shard: Option<String>,
}

/// Overall verdict of a health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything answers and the store breaker is closed
    Healthy,
    /// Serving, but with reduced capacity or a recovering breaker
    Degraded,
    /// The store cannot be reached or too few nodes are healthy
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Point-in-time health of the engine and its backing store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store_circuit: CircuitState,
    pub healthy_nodes: usize,
    pub total_nodes: usize,
    /// healthy / total, 0 when no node is known
    pub healthy_ratio: f64,
    /// Round trip of the health ping; `None` when it failed
    pub ping_latency_ms: Option<f64>,
    pub ping_error: Option<String>,
    /// used / `max_memory_bytes`, when both are known
    pub memory_pressure: Option<f64>,
    /// Store failures over requests in the breaker's rolling window
    pub store_failure_rate: f64,
    /// ms since epoch
    pub checked_at_ms: u64,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
