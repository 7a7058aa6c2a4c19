// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-facing error type.
//!
//! Errors fall in two families:
//! - **local**: codec and compression failures. Surfaced immediately, never
//!   retried, never counted against a circuit breaker.
//! - **dependency**: backing store and loader failures. Counted against the
//!   breaker and the `errors` stat before they reach the caller.

use thiserror::Error;

use crate::compression::CompressionError;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Value could not be encoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored payload could not be decoded into the requested type
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The breaker denied the call; the dependency was not touched
    #[error("circuit breaker open for {dependency}, request rejected")]
    CircuitOpen { dependency: String },

    /// The backing store failed (timeout, refused connection, node unreachable)
    #[error("backing store {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// Sharding is enabled but the ring has no node for the key
    #[error("no shard available for key '{key}'")]
    ShardUnavailable { key: String },

    /// The read-through loader failed
    #[error("loader failed: {0}")]
    Loader(String),

    #[error("cluster health below threshold: {healthy}/{total} nodes healthy")]
    ClusterDegraded { healthy: usize, total: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cache engine is closed")]
    Closed,
}

impl CacheError {
    /// Whether the caller may retry after backing off.
    ///
    /// Codec errors will fail the same way every time; dependency errors
    /// may clear once the backend recovers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::Backend { .. }
                | Self::ShardUnavailable { .. }
                | Self::Loader(_)
                | Self::ClusterDegraded { .. }
        )
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "serialization",
            Self::Deserialization(_) => "deserialization",
            Self::Compression(_) => "compression",
            Self::Decompression(_) => "decompression",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Backend { source: StorageError::Timeout { .. }, .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::Loader(_) => "loader",
            Self::ClusterDegraded { .. } => "cluster_degraded",
            Self::Config(_) => "config",
            Self::Closed => "closed",
        }
    }

    /// Whether this error came from a dependency rather than the caller's data.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Loader(_))
    }
}

impl From<CompressionError> for CacheError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::CompressFailed(msg) => Self::Compression(msg),
            CompressionError::DecompressFailed(msg) => Self::Decompression(msg),
        }
    }
}
