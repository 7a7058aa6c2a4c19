//! Property-based tests (fuzzing) for the cache engine's pure components.
//!
//! Uses proptest to generate random/malformed inputs and verify the codec,
//! the hash ring and glob matching never panic and keep their guarantees.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::Value;

use cache_engine::codec::PayloadCodec;
use cache_engine::storage::memory::glob_match;
use cache_engine::{CacheEngineConfig, ConsistentHashRing};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Distinct node ids
fn node_ids_strategy(range: std::ops::Range<usize>) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z]{1,8}", range).prop_map(|ids| {
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        ids
    })
}

fn codec(min_compress_bytes: usize) -> PayloadCodec {
    let config = CacheEngineConfig {
        compression_min_bytes: min_compress_bytes,
        ..CacheEngineConfig::default()
    };
    PayloadCodec::from_config(&config).unwrap()
}

fn ring_with(ids: &[String]) -> ConsistentHashRing {
    let mut ring = ConsistentHashRing::new(150);
    for id in ids {
        ring.add(id, 1);
    }
    ring
}

fn sample_keys() -> Vec<String> {
    (0..500).map(|i| format!("key:{i}")).collect()
}

/// Escape glob metacharacters so `text` matches only itself.
fn glob_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// =============================================================================
// Codec Fuzz Tests
// =============================================================================

proptest! {
    /// Whatever goes in comes back out, compressed or not
    #[test]
    fn prop_codec_roundtrip(json in arbitrary_json_strategy(), min in prop_oneof![Just(0usize), Just(256usize)]) {
        let codec = codec(min);
        let encoded = codec.encode_value(&json).unwrap();
        prop_assert_eq!(encoded.compressed, codec.compression_enabled() && encoded.raw_len >= min);

        let decoded = codec.decode_value(&encoded.bytes).unwrap();
        prop_assert_eq!(decoded, json);
    }

    /// Decoding garbage returns an error, never panics
    #[test]
    fn fuzz_decode_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let codec = codec(0);
        let _ = codec.decode_value(&bytes);
    }

    /// Garbage behind a zstd frame header is still just an error
    #[test]
    fn fuzz_decode_fake_compressed_frame(tail in prop::collection::vec(any::<u8>(), 0..1024)) {
        let mut bytes = vec![0x28, 0xb5, 0x2f, 0xfd];
        bytes.extend(tail);
        let _ = codec(0).decode_value(&bytes);
    }
}

// =============================================================================
// Hash Ring Properties
// =============================================================================

proptest! {
    /// Same membership, same placement, regardless of insertion order
    #[test]
    fn prop_ring_lookup_deterministic(ids in node_ids_strategy(1..8), key in ".*") {
        let forward = ring_with(&ids);
        let mut reversed_ids = ids.clone();
        reversed_ids.reverse();
        let reversed = ring_with(&reversed_ids);

        let owner = forward.lookup(&key);
        prop_assert!(owner.is_some());
        prop_assert_eq!(owner, reversed.lookup(&key));
        prop_assert!(ids.iter().any(|id| Some(id.as_str()) == owner));
    }

    /// Adding a node only moves keys onto that node
    #[test]
    fn prop_ring_add_moves_keys_only_to_new_node(ids in node_ids_strategy(2..8), extra in "[0-9]{1,4}") {
        let mut ring = ring_with(&ids);
        let keys = sample_keys();
        let before: Vec<String> = keys.iter().map(|k| ring.lookup(k).unwrap().to_string()).collect();

        prop_assert!(ring.add(&extra, 1));
        let mut moved = 0usize;
        for (key, old) in keys.iter().zip(&before) {
            let new = ring.lookup(key).unwrap();
            if new != old.as_str() {
                prop_assert_eq!(new, extra.as_str());
                moved += 1;
            }
        }
        // Roughly 1/(n+1) of the keys; never most of them
        prop_assert!(moved < keys.len() / 2, "{} of {} keys moved", moved, keys.len());
    }

    /// Removing a node only moves that node's keys
    #[test]
    fn prop_ring_remove_moves_only_owned_keys(ids in node_ids_strategy(2..8), victim_index in any::<prop::sample::Index>()) {
        let mut ring = ring_with(&ids);
        let victim = ids[victim_index.index(ids.len())].clone();
        let keys = sample_keys();
        let before: Vec<String> = keys.iter().map(|k| ring.lookup(k).unwrap().to_string()).collect();

        prop_assert!(ring.remove(&victim));
        prop_assert!(!ring.contains(&victim));
        for (key, old) in keys.iter().zip(&before) {
            let new = ring.lookup(key).unwrap();
            prop_assert_ne!(new, victim.as_str());
            if old != &victim {
                prop_assert_eq!(new, old.as_str());
            }
        }
    }

    /// Distribution shares cover the whole ring
    #[test]
    fn prop_ring_distribution_sums_to_one(ids in node_ids_strategy(1..8)) {
        let ring = ring_with(&ids);
        let shares = ring.distribution();
        let members: HashSet<&String> = shares.keys().collect();
        prop_assert!(members.len() <= ids.len());
        let total: f64 = shares.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "total share {}", total);
    }
}

// =============================================================================
// Glob Matching
// =============================================================================

proptest! {
    #[test]
    fn prop_star_matches_everything(text in ".*") {
        prop_assert!(glob_match("*", &text));
    }

    #[test]
    fn prop_escaped_literal_matches_itself(text in ".{0,32}") {
        prop_assert!(glob_match(&glob_escape(&text), &text));
    }

    #[test]
    fn prop_prefix_pattern(prefix in "[a-z]{1,8}", rest in ".{0,16}", other in "[A-Z]{1,8}") {
        let pattern = format!("{prefix}:*");
        let key = format!("{prefix}:{rest}");
        let other_key = format!("{other}:{rest}");
        prop_assert!(glob_match(&pattern, &key));
        prop_assert!(!glob_match(&pattern, &other_key));
    }

    /// Arbitrary patterns never panic
    #[test]
    fn fuzz_glob_random_pattern(pattern in ".{0,16}", text in ".{0,32}") {
        let _ = glob_match(&pattern, &text);
    }
}
