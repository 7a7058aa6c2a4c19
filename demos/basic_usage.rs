// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic cache-engine usage example.
//!
//! Demonstrates:
//! 1. Starting an engine (in-memory store, or Redis when `REDIS_URL` is set)
//! 2. Write-through sets and timed gets
//! 3. Write-behind queueing and a manual flush
//! 4. Shard placement, inspection and clearing by pattern
//! 5. Stats, health and raw metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! REDIS_URL=redis://localhost:6379 cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use cache_engine::{CacheEngine, CacheEngineConfig, InMemoryStore, NodeInfo, Strategy};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};

async fn start(config: CacheEngineConfig) -> Result<CacheEngine, Box<dyn std::error::Error>> {
    if let Ok(url) = std::env::var("REDIS_URL") {
        let config = CacheEngineConfig {
            addrs: vec![url],
            key_prefix: "demo:".into(),
            ..config
        };
        return Ok(CacheEngine::connect(config).await?);
    }

    let nodes = ["cache-a", "cache-b", "cache-c"]
        .into_iter()
        .map(|id| NodeInfo {
            id: id.to_string(),
            address: format!("{id}:6379"),
            weight: 1,
            healthy: true,
        })
        .collect();
    Ok(CacheEngine::new(config, Arc::new(InMemoryStore::with_nodes(nodes))).await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the engine emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_engine=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           cache-engine: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Write-through engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Starting write-through engine...");
    let engine = start(CacheEngineConfig::default()).await?;

    let entries = vec![
        ("user:alice", json!({"name": "Alice", "role": "admin"})),
        ("user:bob", json!({"name": "Bob", "role": "user"})),
        ("user:carol", json!({"name": "Carol", "role": "user"})),
        ("config:app", json!({"theme": "dark", "version": "2.0"})),
        ("stats:daily", json!({"requests": 42000, "latency_p99": 12})),
    ];

    for (key, value) in &entries {
        let started = Instant::now();
        engine.set(key, value, Some(Duration::from_secs(3600))).await?;
        println!("   └─ set {} → {} ({:?})", key, value, started.elapsed());
    }

    println!("\n📖 Reading back...");
    for (key, _) in &entries {
        let started = Instant::now();
        let value: Option<Value> = engine.get(key).await?;
        let shard = engine.shard_for(key).unwrap_or_else(|| "-".into());
        match value {
            Some(v) => println!("   └─ {} [{}] → {} ({:?})", key, shard, v, started.elapsed()),
            None => println!("   └─ {} → NOT FOUND", key),
        }
    }
    let missing: Option<Value> = engine.get("user:nobody").await?;
    println!("   └─ user:nobody → {:?}", missing);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Inspect and clear
    // ─────────────────────────────────────────────────────────────────────────
    let report: Vec<Value> = (0..100).map(|i| json!({"row": i, "status": "ok"})).collect();
    engine.set("report:big", &report, None).await?;
    if let Some(entry) = engine.inspect("report:big").await? {
        println!("\n🔍 report:big");
        println!("   └─ {} bytes, compressed: {}", entry.size_bytes, entry.compressed);
        println!("   └─ ttl: {:?}, shard: {:?}", entry.ttl, entry.shard);
    }

    let cleared = engine.clear("user:*").await?;
    println!("\n🧹 clear(\"user:*\") removed {} keys", cleared);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Stats and health
    // ─────────────────────────────────────────────────────────────────────────
    let stats = engine.get_stats().await;
    println!("\n📊 Stats");
    println!("   └─ hits={} misses={} hit_rate={:.2}", stats.hits, stats.misses, stats.hit_rate());
    println!("   └─ sets={} deletes={} errors={}", stats.sets, stats.deletes, stats.errors);
    println!("   └─ avg={:.3}ms p99={:.3}ms", stats.avg_latency_ms, stats.p99_latency_ms);
    println!("   └─ memory={} bytes", stats.memory_usage_bytes);

    let health = engine.health_report().await;
    println!("\n🩺 Health: {} ({}/{} nodes)", health.status, health.healthy_nodes, health.total_nodes);
    engine.close().await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Write-behind engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏳ Starting write-behind engine...");
    let mut config = CacheEngineConfig {
        strategy: Strategy::WriteBehind,
        ..CacheEngineConfig::default()
    };
    config.write_behind.flush_interval_ms = 500;
    let engine = start(config).await?;

    let started = Instant::now();
    for i in 0..1000 {
        engine.set(&format!("event:{i}"), &json!({"seq": i}), None).await?;
    }
    println!("   └─ queued 1000 sets in {:?}", started.elapsed());
    engine.flush().await?;
    println!("   └─ flushed after {:?}", started.elapsed());
    let last: Option<Value> = engine.get("event:999").await?;
    println!("   └─ event:999 → {:?}", last);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.close().await?;
    println!("   ✅ Shutdown complete!");

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print every captured metric, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {} = {}", name, value);
    }
    println!("   ├─ Gauges");
    for (name, value) in &gauges {
        println!("   │  └─ {} = {:.2}", name, value);
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
        println!("      └─ {} count={} avg={:.4}", name, count, avg);
    }
}
