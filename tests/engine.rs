//! Engine behaviour tests over the in-memory store.
//!
//! No external services needed; every test builds its own engine over an
//! [`InMemoryStore`] and inspects the store directly where the engine API
//! does not expose enough.
//!
//! # Running Tests
//! ```bash
//! cargo test --test engine
//! ```
//!
//! # Test Organization
//! - `happy_*` - strategies, clear, read-through, stats, health, inspect
//! - `failure_*` - closed engine, empty ring, degraded cluster, bad payloads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cache_engine::{
    BackingStore, CacheEngine, CacheEngineConfig, CacheError, CircuitState, HealthStatus, InMemoryStore,
    LoadError, Loader, NodeInfo, Strategy,
};

// =============================================================================
// Helpers
// =============================================================================

fn config(strategy: Strategy) -> CacheEngineConfig {
    CacheEngineConfig {
        strategy,
        ..CacheEngineConfig::for_tests()
    }
}

/// Write-behind config that only flushes on demand.
fn manual_flush_config() -> CacheEngineConfig {
    let mut config = config(Strategy::WriteBehind);
    config.write_behind.flush_interval_ms = 60_000;
    config
}

async fn engine_with(config: CacheEngineConfig) -> (CacheEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = CacheEngine::new(config, store.clone()).await.expect("engine starts");
    (engine, store)
}

fn node(id: &str) -> NodeInfo {
    NodeInfo {
        id: id.to_string(),
        address: format!("{id}:6379"),
        weight: 1,
        healthy: true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    age: u32,
}

/// Loader backed by a fixed map, counting calls.
struct MapLoader {
    values: std::collections::HashMap<String, Value>,
    calls: AtomicUsize,
}

impl MapLoader {
    fn new(values: &[(&str, Value)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for MapLoader {
    async fn load(&self, key: &str) -> Result<Option<Value>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.get(key).cloned())
    }
}

struct BrokenLoader;

#[async_trait]
impl Loader for BrokenLoader {
    async fn load(&self, _key: &str) -> Result<Option<Value>, LoadError> {
        Err("origin database unreachable".into())
    }
}

// =============================================================================
// Happy Path: Write Strategies
// =============================================================================

#[tokio::test]
async fn happy_write_through_set_get() {
    let (engine, store) = engine_with(config(Strategy::WriteThrough)).await;
    let user = User { name: "Ada".into(), age: 36 };

    engine.set("user:1", &user, Some(Duration::from_secs(3600))).await.unwrap();

    // Written before set returned
    assert!(store.raw("user:1").is_some());
    let loaded: Option<User> = engine.get("user:1").await.unwrap();
    assert_eq!(loaded, Some(user));
    assert!(engine.exists("user:1").await.unwrap());

    let missing: Option<User> = engine.get("user:2").await.unwrap();
    assert!(missing.is_none());

    let stats = engine.get_stats().await;
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.errors, 0);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn happy_zero_ttl_uses_default() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;

    engine.set("k", &json!(1), Some(Duration::ZERO)).await.unwrap();
    engine.set("k2", &json!(2), None).await.unwrap();

    let default = engine.config().default_ttl();
    for key in ["k", "k2"] {
        let entry = engine.inspect(key).await.unwrap().expect("entry exists");
        let ttl = entry.ttl.expect("ttl set");
        assert!(ttl <= default);
        assert!(ttl > default - Duration::from_secs(5), "ttl {ttl:?} for {key}");
    }
}

#[tokio::test]
async fn happy_write_around_stores_short_lived_copy() {
    let (engine, _store) = engine_with(config(Strategy::WriteAround)).await;

    engine.set("report:7", &json!({"rows": 12}), Some(Duration::from_secs(3600))).await.unwrap();

    let ttl = engine.inspect("report:7").await.unwrap().unwrap().ttl.unwrap();
    assert!(ttl <= Duration::from_secs(900));
    assert!(ttl > Duration::from_secs(895), "ttl {ttl:?}");

    // Short TTLs are floored at a minute
    engine.set("report:8", &json!({}), Some(Duration::from_secs(40))).await.unwrap();
    let ttl = engine.inspect("report:8").await.unwrap().unwrap().ttl.unwrap();
    assert!(ttl > Duration::from_secs(55), "ttl {ttl:?}");
}

#[tokio::test]
async fn happy_write_behind_last_write_wins() {
    let (engine, store) = engine_with(manual_flush_config()).await;

    engine.set("counter", &json!(1), None).await.unwrap();
    engine.set("counter", &json!(2), None).await.unwrap();
    engine.set("doomed", &json!("x"), None).await.unwrap();
    engine.set("counter", &json!(3), None).await.unwrap();
    engine.delete("doomed").await.unwrap();

    engine.flush().await.unwrap();

    let value: Option<Value> = engine.get("counter").await.unwrap();
    assert_eq!(value, Some(json!(3)));
    assert!(store.raw("doomed").is_none());
    assert!(store.batches_executed() >= 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn happy_write_behind_flushes_on_interval() {
    let (engine, store) = engine_with(config(Strategy::WriteBehind)).await;

    engine.set("session:1", &json!({"ttl": "short"}), None).await.unwrap();

    let mut written = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if store.raw("session:1").is_some() {
            written = true;
            break;
        }
    }
    assert!(written, "flusher never wrote the queued set");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn happy_write_behind_expire_is_queued() {
    let (engine, store) = engine_with(manual_flush_config()).await;

    engine.set("k", &json!("v"), Some(Duration::from_secs(3600))).await.unwrap();
    engine.expire("k", Duration::from_secs(120)).await.unwrap();
    engine.flush().await.unwrap();

    assert!(store.raw("k").is_some());
    let ttl = engine.inspect("k").await.unwrap().unwrap().ttl.unwrap();
    assert!(ttl <= Duration::from_secs(120));
}

#[tokio::test]
async fn happy_write_behind_full_queue_writes_directly() {
    let mut config = manual_flush_config();
    config.write_behind.queue_capacity = 1;
    let (engine, store) = engine_with(config).await;

    // The single-threaded test runtime does not poll the flusher until this
    // task yields, so the first set fills the queue and the second bypasses it
    engine.set("queued", &json!(1), None).await.unwrap();
    engine.set("direct", &json!(2), None).await.unwrap();

    assert!(store.raw("direct").is_some(), "overflow must be written directly");
    assert!(store.raw("queued").is_none(), "queued write must wait for a flush");

    engine.flush().await.unwrap();
    assert!(store.raw("queued").is_some());

    let stats = engine.get_stats().await;
    assert_eq!(stats.sets, 2);
}

#[tokio::test]
async fn happy_close_drains_write_behind_queue() {
    let (engine, store) = engine_with(manual_flush_config()).await;

    for i in 0..50 {
        engine.set(&format!("item:{i}"), &json!({"i": i}), None).await.unwrap();
    }
    assert_eq!(store.len(), 0);

    engine.close().await.unwrap();

    assert_eq!(store.len(), 50);
    assert!(store.is_closed());
}

#[tokio::test]
async fn happy_flush_is_noop_without_write_behind() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    engine.flush().await.unwrap();
}

// =============================================================================
// Happy Path: Clear
// =============================================================================

#[tokio::test]
async fn happy_clear_pages_through_large_keyspace() {
    let (engine, store) = engine_with(config(Strategy::WriteThrough)).await;
    let ttl = Duration::from_secs(3600);
    for i in 0..2500 {
        store.set(&format!("session:{i}"), b"{}", ttl).await.unwrap();
    }
    for i in 0..10 {
        store.set(&format!("user:{i}"), b"{}", ttl).await.unwrap();
    }

    let deleted = engine.clear("session:*").await.unwrap();

    assert_eq!(deleted, 2500);
    assert_eq!(store.len(), 10);
    assert!(engine.exists("user:3").await.unwrap());
    assert_eq!(engine.get_stats().await.deletes, 2500);

    // Nothing left to match
    assert_eq!(engine.clear("session:*").await.unwrap(), 0);
}

#[tokio::test]
async fn happy_delete_counts_only_existing_keys() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    engine.set("a", &json!(1), None).await.unwrap();

    engine.delete("a").await.unwrap();
    engine.delete("never-existed").await.unwrap();

    assert_eq!(engine.get_stats().await.deletes, 1);
    assert!(!engine.exists("a").await.unwrap());
}

// =============================================================================
// Happy Path: Read-Through
// =============================================================================

#[tokio::test]
async fn happy_read_through_loads_and_caches() {
    let loader = Arc::new(MapLoader::new(&[("user:7", json!({"name": "Grace", "age": 45}))]));
    let store = Arc::new(InMemoryStore::new());
    let engine = CacheEngine::with_loader(config(Strategy::ReadThrough), store.clone(), loader.clone())
        .await
        .unwrap();

    let first: Option<User> = engine.get("user:7").await.unwrap();
    assert_eq!(first, Some(User { name: "Grace".into(), age: 45 }));
    assert_eq!(loader.calls(), 1);
    assert!(store.raw("user:7").is_some(), "loaded value cached");

    let second: Option<User> = engine.get("user:7").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(loader.calls(), 1, "second read served from cache");

    let unknown: Option<User> = engine.get("user:8").await.unwrap();
    assert!(unknown.is_none());
    assert_eq!(loader.calls(), 2);

    let stats = engine.get_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn failure_read_through_loader_errors_trip_loader_breaker() {
    let engine = CacheEngine::with_loader(
        config(Strategy::ReadThrough),
        Arc::new(InMemoryStore::new()),
        Arc::new(BrokenLoader),
    )
    .await
    .unwrap();

    let err = engine.get::<Value>("k").await.unwrap_err();
    assert!(matches!(err, CacheError::Loader(_)), "got {err:?}");

    // Loader threshold is half the store's (2 in tests), so one failure trips it
    assert_eq!(engine.circuits().loader.state(), CircuitState::Open);
    let err = engine.get::<Value>("k").await.unwrap_err();
    assert!(matches!(err, CacheError::CircuitOpen { ref dependency } if dependency == "loader"));

    assert_eq!(engine.circuits().store.state(), CircuitState::Closed);
}

#[tokio::test]
async fn happy_read_through_without_loader_misses() {
    let (engine, _store) = engine_with(config(Strategy::ReadThrough)).await;
    let value: Option<Value> = engine.get("absent").await.unwrap();
    assert!(value.is_none());
}

// =============================================================================
// Happy Path: Stats
// =============================================================================

#[tokio::test]
async fn happy_stats_counters_only_grow_until_reset() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    let mut previous = engine.get_stats().await;

    for i in 0..20 {
        let key = format!("k:{}", i % 5);
        match i % 4 {
            0 => engine.set(&key, &json!(i), None).await.unwrap(),
            1 => {
                let _: Option<Value> = engine.get(&key).await.unwrap();
            }
            2 => engine.delete(&key).await.unwrap(),
            _ => {
                let _ = engine.exists(&key).await.unwrap();
            }
        }

        let current = engine.get_stats().await;
        assert!(current.hits >= previous.hits);
        assert!(current.misses >= previous.misses);
        assert!(current.sets >= previous.sets);
        assert!(current.deletes >= previous.deletes);
        assert!(current.errors >= previous.errors);
        assert!(current.total_operations > previous.total_operations);
        previous = current;
    }

    assert_eq!(previous.total_operations, 20);
    assert!(previous.avg_latency_ms >= 0.0);
    assert_eq!(previous.connection_count, 1);

    engine.reset_stats();
    let reset = engine.get_stats().await;
    assert_eq!(reset.hits, 0);
    assert_eq!(reset.sets, 0);
    assert_eq!(reset.total_operations, 0);
    assert!(reset.last_reset_ms >= previous.last_reset_ms);
}

#[tokio::test]
async fn happy_hit_rate() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    engine.set("a", &json!(1), None).await.unwrap();
    for _ in 0..3 {
        let _: Option<Value> = engine.get("a").await.unwrap();
    }
    let _: Option<Value> = engine.get("b").await.unwrap();

    let stats = engine.get_stats().await;
    assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    assert!(stats.memory_usage_bytes > 0);
}

// =============================================================================
// Happy Path: Sharding and Health
// =============================================================================

#[tokio::test]
async fn happy_health_tracks_node_ratio() {
    let store = Arc::new(InMemoryStore::with_nodes(vec![node("a"), node("b"), node("c"), node("d")]));
    let engine = CacheEngine::new(config(Strategy::WriteThrough), store.clone()).await.unwrap();

    engine.health_check().await.unwrap();
    assert_eq!(engine.health_report().await.status, HealthStatus::Healthy);

    // Half the cluster is still enough
    store.set_node_health("a", false);
    store.set_node_health("b", false);
    engine.health_check().await.unwrap();
    let report = engine.health_report().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!((report.healthy_nodes, report.total_nodes), (2, 4));

    store.set_node_health("c", false);
    let err = engine.health_check().await.unwrap_err();
    assert!(matches!(err, CacheError::ClusterDegraded { healthy: 1, total: 4 }), "got {err:?}");
    assert_eq!(engine.health_report().await.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn happy_topology_refresh_moves_keys_off_unhealthy_node() {
    let store = Arc::new(InMemoryStore::with_nodes(vec![node("a"), node("b"), node("c")]));
    let engine = CacheEngine::new(config(Strategy::WriteThrough), store.clone()).await.unwrap();

    let keys: Vec<String> = (0..300).map(|i| format!("user:{i}")).collect();
    assert!(keys.iter().any(|k| engine.shard_for(k).as_deref() == Some("b")));

    store.set_node_health("b", false);
    let change = engine.refresh_topology().await.unwrap();
    assert_eq!(change.removed, vec!["b".to_string()]);
    assert!(change.added.is_empty());
    assert!(!change.moves.is_empty());
    assert!(change.moves.iter().all(|m| m.from == "b" && m.to != "b"), "{:?}", change.moves);
    let share = change.moved_share();
    assert!(share > 0.15 && share < 0.5, "about a third of the keys leave b, got {share}");

    for key in &keys {
        let owner = engine.shard_for(key).unwrap();
        assert_ne!(owner, "b");
    }
    let shards = engine.shards();
    assert_eq!(shards.len(), 3);
    assert!(shards.iter().any(|s| s.id == "b" && !s.healthy));

    store.set_node_health("b", true);
    let change = engine.refresh_topology().await.unwrap();
    assert_eq!(change.added, vec![("b".to_string(), 1)]);
    assert!(change.moves.iter().all(|m| m.to == "b"));
}

#[tokio::test]
async fn happy_inspect_reports_entry_metadata() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    let big = "x".repeat(4096);

    engine.set("blob", &json!({"data": big}), Some(Duration::from_secs(600))).await.unwrap();

    let entry = engine.inspect("blob").await.unwrap().expect("entry exists");
    assert_eq!(entry.key, "blob");
    assert_eq!(entry.compressed, cfg!(feature = "compression"));
    assert!(entry.size_bytes > 0);
    assert!(entry.ttl.unwrap() <= Duration::from_secs(600));
    assert!(entry.expires_at_ms.is_some());
    assert_eq!(entry.shard.as_deref(), Some("memory-0"));
    assert_eq!(entry.access_count, Some(0));
    assert!(entry.created_at_ms.is_some());

    let _: Option<Value> = engine.get("blob").await.unwrap();
    let entry = engine.inspect("blob").await.unwrap().unwrap();
    assert_eq!(entry.access_count, Some(1), "inspect itself is not an access");

    assert!(engine.inspect("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn happy_small_values_stay_uncompressed() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    engine.set("tiny", &json!({"a": 1}), None).await.unwrap();
    let entry = engine.inspect("tiny").await.unwrap().unwrap();
    assert!(!entry.compressed);
}

#[tokio::test]
async fn happy_sharding_disabled_ignores_empty_topology() {
    let mut config = config(Strategy::WriteThrough);
    config.sharding_enabled = false;
    let store = Arc::new(InMemoryStore::with_nodes(Vec::new()));
    let engine = CacheEngine::new(config, store).await.unwrap();

    engine.set("k", &json!(1), None).await.unwrap();
    let entry = engine.inspect("k").await.unwrap().unwrap();
    assert!(entry.shard.is_none());
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test]
async fn failure_empty_ring_rejects_keyed_operations() {
    let store = Arc::new(InMemoryStore::with_nodes(Vec::new()));
    let engine = CacheEngine::new(config(Strategy::WriteThrough), store.clone()).await.unwrap();

    let err = engine.set("k", &json!(1), None).await.unwrap_err();
    assert!(matches!(err, CacheError::ShardUnavailable { ref key } if key == "k"));
    assert!(engine.get::<Value>("k").await.is_err());
    assert!(store.is_empty(), "store never touched");
    assert_eq!(engine.get_stats().await.errors, 2);

    let err = engine.health_check().await.unwrap_err();
    assert!(matches!(err, CacheError::ClusterDegraded { healthy: 0, total: 0 }));

    // Once a node appears, a refresh brings the ring back
    store.set_nodes(vec![node("late")]);
    engine.refresh_topology().await.unwrap();
    engine.set("k", &json!(1), None).await.unwrap();
}

#[tokio::test]
async fn failure_operations_after_close() {
    let (engine, _store) = engine_with(config(Strategy::WriteThrough)).await;
    engine.close().await.unwrap();
    // Idempotent
    engine.close().await.unwrap();

    assert!(engine.is_closed());
    assert!(matches!(engine.set("k", &json!(1), None).await, Err(CacheError::Closed)));
    assert!(matches!(engine.get::<Value>("k").await, Err(CacheError::Closed)));
    assert!(matches!(engine.delete("k").await, Err(CacheError::Closed)));
    assert!(matches!(engine.exists("k").await, Err(CacheError::Closed)));
    assert!(matches!(engine.clear("*").await, Err(CacheError::Closed)));
    assert!(matches!(engine.flush().await, Err(CacheError::Closed)));
    assert!(matches!(engine.health_check().await, Err(CacheError::Closed)));
}

#[tokio::test]
async fn failure_undecodable_payload_is_local_error() {
    let (engine, store) = engine_with(config(Strategy::WriteThrough)).await;
    store.set("garbage", b"\x00not json at all", Duration::from_secs(60)).await.unwrap();

    let err = engine.get::<Value>("garbage").await.unwrap_err();
    assert!(matches!(err, CacheError::Deserialization(_)), "got {err:?}");
    assert!(!err.is_retryable());

    // Wrong target type is a decode error too
    engine.set("user", &json!({"name": "Ada"}), None).await.unwrap();
    let err = engine.get::<User>("user").await.unwrap_err();
    assert!(matches!(err, CacheError::Deserialization(_)));

    let store_circuit = &engine.circuit_stats()[0];
    assert_eq!(store_circuit.state, CircuitState::Closed);
    assert_eq!(store_circuit.failure_count, 0);
    assert_eq!(engine.get_stats().await.errors, 2);
}

#[tokio::test]
async fn failure_invalid_config_rejected_at_start() {
    let mut config = config(Strategy::WriteThrough);
    config.write_behind.batch_size = 0;
    let err = CacheEngine::new(config, Arc::new(InMemoryStore::new())).await.unwrap_err();
    assert!(matches!(err, CacheError::Config(_)));
}
