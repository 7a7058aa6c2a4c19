// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Cache Engine
//!
//! A distributed caching layer that sits in front of a remote clustered
//! key-value store (Redis or anything implementing [`BackingStore`]).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CacheEngine                          │
//! │  • set / get / delete / exists / expire / clear            │
//! │  • Codec + zstd compression before the breaker gate        │
//! │  • Strategy: write-through, write-behind, write-around,    │
//! │    read-through                                            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//! ┌──────────────────┐ ┌────────────────────┐ ┌────────────────────┐
//! │  CircuitBreaker  │ │ ConsistentHashRing │ │  Write-behind queue │
//! │  per dependency  │ │  virtual nodes     │ │  bounded, batched   │
//! └──────────────────┘ └────────────────────┘ └────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BackingStore (Redis cluster)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three background tasks run for the lifetime of the engine: the
//! write-behind flusher, the stats collector and the health monitor. They
//! share one cancellable periodic task abstraction ([`scheduler`]) and stop
//! on [`CacheEngine::close`], the flusher draining its queue first.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cache_engine::{CacheEngine, CacheEngineConfig, InMemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cache_engine::CacheError> {
//!     let config = CacheEngineConfig::default();
//!     let engine = CacheEngine::new(config, Arc::new(InMemoryStore::new())).await?;
//!
//!     engine.set("user:1", &json!({"name": "Ada"}), Some(Duration::from_secs(3600))).await?;
//!     let user: Option<serde_json::Value> = engine.get("user:1").await?;
//!     assert!(user.is_some());
//!
//!     engine.close().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`CacheEngine`] orchestrating everything
//! - [`resilience`]: circuit breakers and connection retry
//! - [`sharding`]: consistent-hash ring and shard table
//! - [`storage`]: the [`BackingStore`] trait with Redis and in-memory backends
//! - [`codec`] / [`compression`]: payload encoding
//! - [`batching`]: write-behind batch accumulation
//! - [`stats`] / [`metrics`]: operator statistics and telemetry facade

pub mod config;
pub mod error;
pub mod codec;
pub mod compression;
pub mod storage;
pub mod resilience;
pub mod sharding;
pub mod batching;
pub mod scheduler;
pub mod stats;
pub mod metrics;
pub mod engine;

pub use config::{CacheEngineConfig, ClusterMode, Strategy, EvictionPolicy, SerializationMode, WriteBehindConfig};
pub use error::CacheError;
pub use engine::{CacheEngine, CacheEntry, HealthReport, HealthStatus, LoadError, Loader, WriteKind, WriteOperation};
pub use storage::traits::{BackingStore, NodeInfo, ScanPage, ServerStats, StorageError, WriteBatch, BatchOp};
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats, StateListener};
pub use resilience::adaptive::{AdaptiveCircuitBreaker, BackendCircuits};
pub use sharding::hash_ring::{ConsistentHashRing, KeyMove};
pub use sharding::topology::{Shard, ShardTable, TopologyChange};
pub use stats::Stats;

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
