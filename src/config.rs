// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the cache engine.
//!
//! # Example
//!
//! ```
//! use cache_engine::{CacheEngineConfig, Strategy};
//!
//! // Minimal config (uses defaults)
//! let config = CacheEngineConfig::default();
//! assert_eq!(config.default_ttl_secs, 3600);
//! assert_eq!(config.strategy, Strategy::WriteThrough);
//!
//! // Full config
//! let config = CacheEngineConfig {
//!     addrs: vec!["redis://cache-1:6379".into()],
//!     key_prefix: "myapp:".into(),
//!     strategy: Strategy::WriteBehind,
//!     virtual_nodes: 200,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::error::CacheError;
use crate::resilience::circuit_breaker::CircuitConfig;

/// How writes (and misses) reach the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Synchronous store write on every set
    #[default]
    WriteThrough,
    /// Enqueue and let the background flusher batch writes
    WriteBehind,
    /// Store write with a shortened TTL, keeping cold data short-lived
    WriteAround,
    /// Synchronous writes; misses are filled from the [`crate::Loader`]
    ReadThrough,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteThrough => write!(f, "write_through"),
            Self::WriteBehind => write!(f, "write_behind"),
            Self::WriteAround => write!(f, "write_around"),
            Self::ReadThrough => write!(f, "read_through"),
        }
    }
}

/// Server-side eviction policy hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Ttl,
    Random,
}

impl EvictionPolicy {
    /// Matching Redis `maxmemory-policy` value.
    #[must_use]
    pub fn redis_policy(&self) -> &'static str {
        match self {
            Self::Lru => "allkeys-lru",
            Self::Lfu => "allkeys-lfu",
            Self::Ttl => "volatile-ttl",
            Self::Random => "allkeys-random",
        }
    }
}

/// How the Redis store talks to its seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Cluster client when the seed answers `CLUSTER NODES`, plain pool otherwise
    #[default]
    Auto,
    /// Always a plain connection pool to one seed
    Standalone,
    /// Fail to connect unless the seed is a cluster member
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    #[default]
    Json,
}

/// Write-behind queue and flusher settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteBehindConfig {
    /// Bounded queue size; a full queue falls back to direct writes
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flush early once this many operations are pending
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush early once pending payloads reach this many bytes
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Deadline for one pipelined batch
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

fn default_queue_capacity() -> usize { 1000 }
fn default_batch_size() -> usize { 100 }
fn default_batch_max_bytes() -> usize { 1024 * 1024 } // 1 MB
fn default_flush_interval_ms() -> u64 { 1000 }
fn default_batch_timeout_ms() -> u64 { 30_000 }

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            batch_max_bytes: default_batch_max_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl WriteBehindConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Configuration for the cache engine.
///
/// All fields have sensible defaults. At minimum, set `addrs` when
/// connecting to Redis with [`crate::CacheEngine::connect`].
#[derive(Debug, Clone, Deserialize)]
pub struct CacheEngineConfig {
    /// Seed addresses (e.g., "redis://localhost:6379"); tried in order
    #[serde(default = "default_addrs")]
    pub addrs: Vec<String>,

    /// Prepended to every key (e.g., "myapp:" → "myapp:user:1")
    #[serde(default)]
    pub key_prefix: String,

    #[serde(default)]
    pub cluster_mode: ClusterMode,

    /// Multiplexed connections in the pool (standalone mode)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command deadline inside the store
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// TTL used when a caller passes none (or zero)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Memory budget hint; reported as pressure in health, applied as
    /// `maxmemory` when `apply_eviction_policy` is set
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,

    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// Push the eviction policy to the server with CONFIG SET
    #[serde(default)]
    pub apply_eviction_policy: bool,

    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    /// zstd level, 1..=22
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Payloads smaller than this are stored uncompressed
    #[serde(default = "default_compression_min_bytes")]
    pub compression_min_bytes: usize,
    #[serde(default)]
    pub serialization: SerializationMode,

    #[serde(default = "default_true")]
    pub sharding_enabled: bool,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,

    #[serde(default)]
    pub circuit_breaker: CircuitConfig,

    /// Operations slower than this are logged at warn
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,

    #[serde(default)]
    pub write_behind: WriteBehindConfig,

    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Upper bound on waiting for background tasks in `close`
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Samples kept for the rolling latency summary
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,

    /// Spawn the stats collector that publishes gauges
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_addrs() -> Vec<String> { vec!["redis://127.0.0.1:6379".to_string()] }
fn default_pool_size() -> usize { 10 }
fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 3_000 }
fn default_ttl_secs() -> u64 { 3600 }
fn default_max_memory_bytes() -> u64 { 1024 * 1024 * 1024 } // 1 GB
fn default_true() -> bool { true }
fn default_compression_enabled() -> bool { cfg!(feature = "compression") }
fn default_compression_level() -> i32 { 6 }
fn default_compression_min_bytes() -> usize { 256 }
fn default_virtual_nodes() -> u32 { 150 }
fn default_slow_query_threshold_ms() -> u64 { 100 }
fn default_stats_interval_secs() -> u64 { 30 }
fn default_health_interval_secs() -> u64 { 30 }
fn default_health_timeout_ms() -> u64 { 10_000 }
fn default_shutdown_timeout_ms() -> u64 { 10_000 }
fn default_latency_window() -> usize { 1000 }

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            addrs: default_addrs(),
            key_prefix: String::new(),
            cluster_mode: ClusterMode::default(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            default_ttl_secs: default_ttl_secs(),
            max_memory_bytes: default_max_memory_bytes(),
            strategy: Strategy::default(),
            eviction_policy: EvictionPolicy::default(),
            apply_eviction_policy: false,
            compression_enabled: default_compression_enabled(),
            compression_level: default_compression_level(),
            compression_min_bytes: default_compression_min_bytes(),
            serialization: SerializationMode::default(),
            sharding_enabled: true,
            virtual_nodes: default_virtual_nodes(),
            circuit_breaker: CircuitConfig::default(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
            write_behind: WriteBehindConfig::default(),
            stats_interval_secs: default_stats_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            health_timeout_ms: default_health_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            latency_window: default_latency_window(),
            metrics_enabled: true,
        }
    }
}

impl CacheEngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), CacheError> {
        let fail = |msg: &str| Err(CacheError::Config(msg.to_string()));

        if self.pool_size == 0 {
            return fail("pool_size must be at least 1");
        }
        if self.default_ttl_secs == 0 {
            return fail("default_ttl_secs must be positive");
        }
        if self.sharding_enabled && self.virtual_nodes == 0 {
            return fail("virtual_nodes must be at least 1 when sharding is enabled");
        }

        self.circuit_breaker.validate().map_err(CacheError::Config)?;

        let wb = &self.write_behind;
        if wb.queue_capacity == 0 || wb.batch_size == 0 {
            return fail("write_behind queue_capacity and batch_size must be at least 1");
        }
        if wb.flush_interval_ms == 0 || wb.batch_timeout_ms == 0 {
            return fail("write_behind intervals must be positive");
        }

        if self.stats_interval_secs == 0 || self.health_interval_secs == 0 {
            return fail("background task intervals must be positive");
        }
        if self.latency_window == 0 {
            return fail("latency_window must be at least 1");
        }

        if self.compression_enabled {
            if !(1..=22).contains(&self.compression_level) {
                return fail("compression_level must be within 1..=22");
            }
            if !cfg!(feature = "compression") {
                return fail("compression_enabled requires the `compression` feature");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    #[must_use]
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Config tuned for tests: short intervals, fast-tripping breaker.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            circuit_breaker: CircuitConfig::test(),
            write_behind: WriteBehindConfig {
                flush_interval_ms: 20,
                batch_timeout_ms: 1_000,
                ..Default::default()
            },
            stats_interval_secs: 3600,
            health_interval_secs: 3600,
            shutdown_timeout_ms: 2_000,
            ..Default::default()
        }
    }
}
