// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consistent-hash ring with virtual nodes.
//!
//! Each node owns `weight × virtual_nodes` positions on a 32-bit ring. A
//! position is the first four bytes (big-endian) of `SHA-256("{node}:{i}")`;
//! a key belongs to the first position at or after its own hash, wrapping
//! past the top of the ring.
//!
//! Adding or removing one node only moves the keys whose owning position
//! changed, roughly 1/N of the key space. [`ConsistentHashRing::rebalance_from`]
//! estimates those moves by sampling evenly spaced points of the ring.
//!
//! The ring is not synchronized. The engine keeps it behind a `RwLock`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Position of `input` on the ring.
#[must_use]
pub fn ring_hash(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Sample points used to estimate key movement after a membership change.
pub const REBALANCE_SAMPLES: usize = 1000;

/// Sampled share of the key space that changed owner from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyMove {
    pub from: String,
    pub to: String,
    /// Sample points that moved along this edge
    pub sampled_points: usize,
    pub total_samples: usize,
}

impl KeyMove {
    /// Estimated fraction of all keys moving along this edge.
    #[must_use]
    pub fn share(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        self.sampled_points as f64 / self.total_samples as f64
    }
}

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    virtual_nodes: u32,
    positions: BTreeMap<u32, String>,
    weights: HashMap<String, u32>,
}

impl ConsistentHashRing {
    #[must_use]
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            positions: BTreeMap::new(),
            weights: HashMap::new(),
        }
    }

    #[must_use]
    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    /// Insert `node_id` with `weight × virtual_nodes` positions.
    ///
    /// Returns false (and changes nothing) if the node is already present.
    pub fn add(&mut self, node_id: &str, weight: u32) -> bool {
        if self.weights.contains_key(node_id) {
            return false;
        }
        let weight = weight.max(1);
        for i in 0..weight.saturating_mul(self.virtual_nodes) {
            self.positions.insert(ring_hash(&format!("{node_id}:{i}")), node_id.to_string());
        }
        self.weights.insert(node_id.to_string(), weight);
        true
    }

    /// Remove every position owned by `node_id`. Returns false if absent.
    pub fn remove(&mut self, node_id: &str) -> bool {
        let Some(weight) = self.weights.remove(node_id) else {
            return false;
        };
        for i in 0..weight.saturating_mul(self.virtual_nodes) {
            let pos = ring_hash(&format!("{node_id}:{i}"));
            // Another node may have won this position on a hash collision
            if self.positions.get(&pos).is_some_and(|owner| owner == node_id) {
                self.positions.remove(&pos);
            }
        }
        true
    }

    /// Node owning `key`, or `None` on an empty ring.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.owner_of(ring_hash(key))
    }

    /// Node owning ring position `hash`.
    #[must_use]
    pub fn owner_of(&self, hash: u32) -> Option<&str> {
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, node)| node.as_str())
    }

    /// Estimate which keys changed owner between `old` and `self`.
    ///
    /// Checks `samples` evenly spaced ring points and groups the ones whose
    /// owner differs by `(from, to)` edge, largest first. Points unowned on
    /// either ring are skipped.
    #[must_use]
    pub fn rebalance_from(&self, old: &ConsistentHashRing, samples: usize) -> Vec<KeyMove> {
        let mut edges: HashMap<(&str, &str), usize> = HashMap::new();
        for i in 0..samples {
            let point = (i as u64 * RING_SIZE / samples as u64) as u32;
            if let (Some(from), Some(to)) = (old.owner_of(point), self.owner_of(point)) {
                if from != to {
                    *edges.entry((from, to)).or_default() += 1;
                }
            }
        }

        let mut moves: Vec<KeyMove> = edges
            .into_iter()
            .map(|((from, to), sampled_points)| KeyMove {
                from: from.to_string(),
                to: to.to_string(),
                sampled_points,
                total_samples: samples,
            })
            .collect();
        moves.sort_by(|a, b| {
            b.sampled_points
                .cmp(&a.sampled_points)
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.to.cmp(&b.to))
        });
        moves
    }

    /// Up to `n` distinct nodes, walking clockwise from `key`'s position.
    #[must_use]
    pub fn lookup_n(&self, key: &str, n: usize) -> Vec<&str> {
        let n = n.min(self.weights.len());
        let mut found: Vec<&str> = Vec::with_capacity(n);
        if n == 0 {
            return found;
        }

        let hash = ring_hash(key);
        let clockwise = self.positions.range(hash..).chain(self.positions.range(..hash));
        for (_, node) in clockwise {
            if !found.contains(&node.as_str()) {
                found.push(node);
                if found.len() == n {
                    break;
                }
            }
        }
        found
    }

    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.weights.contains_key(node_id)
    }

    #[must_use]
    pub fn weight(&self, node_id: &str) -> Option<u32> {
        self.weights.get(node_id).copied()
    }

    /// Member node ids, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.weights.keys().map(String::as_str).collect();
        nodes.sort_unstable();
        nodes
    }

    /// Number of member nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Share of the hash space owned by each node, each in `0.0..=1.0`.
    #[must_use]
    pub fn distribution(&self) -> HashMap<String, f64> {
        let mut owned: HashMap<String, u64> = HashMap::new();
        let Some((&last, _)) = self.positions.iter().next_back() else {
            return HashMap::new();
        };

        // Each position owns the arc (previous, position]; the first one
        // also owns the wrap-around arc above the last position.
        let mut prev: Option<u32> = None;
        for (&pos, node) in &self.positions {
            let arc = match prev {
                Some(p) => u64::from(pos - p),
                None => u64::from(pos) + (RING_SIZE - u64::from(last)),
            };
            *owned.entry(node.clone()).or_default() += arc;
            prev = Some(pos);
        }

        owned
            .into_iter()
            .map(|(node, arc)| (node, arc as f64 / RING_SIZE as f64))
            .collect()
    }
}

const RING_SIZE: u64 = 1 << 32;

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(150)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(nodes: &[&str], vnodes: u32) -> ConsistentHashRing {
        let mut ring = ConsistentHashRing::new(vnodes);
        for node in nodes {
            ring.add(node, 1);
        }
        ring
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user:{i}")).collect()
    }

    #[test]
    fn test_ring_hash_is_sha256_prefix() {
        // SHA-256("") = e3b0c442...
        assert_eq!(ring_hash(""), 0xe3b0_c442);
    }

    #[test]
    fn test_empty_ring_lookup() {
        let ring = ConsistentHashRing::new(10);
        assert!(ring.is_empty());
        assert_eq!(ring.lookup("anything"), None);
        assert!(ring.lookup_n("anything", 3).is_empty());
        assert!(ring.distribution().is_empty());
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = ring_with(&["node-a"], 10);
        for key in keys(50) {
            assert_eq!(ring.lookup(&key), Some("node-a"));
        }
        let dist = ring.distribution();
        assert!((dist["node-a"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let a = ring_with(&["node-a", "node-b", "node-c"], 150);
        let b = ring_with(&["node-c", "node-a", "node-b"], 150);
        for key in keys(500) {
            assert_eq!(a.lookup(&key), b.lookup(&key), "insertion order must not matter");
        }
    }

    #[test]
    fn test_add_existing_node_is_noop() {
        let mut ring = ring_with(&["node-a"], 10);
        assert!(!ring.add("node-a", 5));
        assert_eq!(ring.weight("node-a"), Some(1));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_remove_only_moves_removed_nodes_keys() {
        let mut ring = ring_with(&["node-a", "node-b", "node-c"], 150);
        let before: Vec<_> = keys(2000).into_iter().map(|k| {
            let owner = ring.lookup(&k).unwrap().to_string();
            (k, owner)
        }).collect();

        assert!(ring.remove("node-b"));
        assert!(!ring.remove("node-b"));

        for (key, owner) in &before {
            let now = ring.lookup(key).unwrap();
            if owner != "node-b" {
                assert_eq!(now, owner, "key {key} moved although its node stayed");
            } else {
                assert_ne!(now, "node-b");
            }
        }
    }

    #[test]
    fn test_add_remaps_bounded_fraction() {
        let mut ring = ring_with(&["node-a", "node-b", "node-c"], 150);
        let sample = keys(4000);
        let before: Vec<_> = sample.iter().map(|k| ring.lookup(k).unwrap().to_string()).collect();

        ring.add("node-d", 1);
        let moved = sample
            .iter()
            .zip(&before)
            .filter(|(k, owner)| ring.lookup(k).unwrap() != owner.as_str())
            .count();

        // Expect ~1/4 of keys to move, every one of them to the new node
        let fraction = moved as f64 / sample.len() as f64;
        assert!(fraction > 0.1 && fraction < 0.4, "moved fraction {fraction}");
        for (k, owner) in sample.iter().zip(&before) {
            let now = ring.lookup(k).unwrap();
            assert!(now == owner || now == "node-d");
        }
    }

    #[test]
    fn test_rebalance_after_add_targets_new_node() {
        let old = ring_with(&["node-a", "node-b", "node-c"], 150);
        let mut new = old.clone();
        new.add("node-d", 1);

        let moves = new.rebalance_from(&old, REBALANCE_SAMPLES);
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|m| m.to == "node-d"), "{moves:?}");
        assert!(moves.iter().all(|m| m.from != "node-d"));

        // ~1/(N+1) of the ring moves
        let moved: usize = moves.iter().map(|m| m.sampled_points).sum();
        let fraction = moved as f64 / REBALANCE_SAMPLES as f64;
        assert!(fraction > 0.15 && fraction < 0.35, "moved fraction {fraction}");
        let total_share: f64 = moves.iter().map(KeyMove::share).sum();
        assert!((total_share - fraction).abs() < 1e-9);
    }

    #[test]
    fn test_rebalance_after_remove_drains_node() {
        let old = ring_with(&["node-a", "node-b", "node-c"], 150);
        let mut new = old.clone();
        new.remove("node-b");

        let moves = new.rebalance_from(&old, REBALANCE_SAMPLES);
        assert!(moves.iter().all(|m| m.from == "node-b" && m.to != "node-b"), "{moves:?}");
        assert!(moves.windows(2).all(|w| w[0].sampled_points >= w[1].sampled_points));
    }

    #[test]
    fn test_rebalance_unchanged_or_empty_ring() {
        let ring = ring_with(&["node-a", "node-b"], 50);
        assert!(ring.rebalance_from(&ring.clone(), 500).is_empty());
        assert!(ring.rebalance_from(&ConsistentHashRing::new(50), 500).is_empty());
        assert!(ring.rebalance_from(&ring.clone(), 0).is_empty());
    }

    #[test]
    fn test_weight_increases_share() {
        let mut ring = ConsistentHashRing::new(100);
        ring.add("small", 1);
        ring.add("large", 3);
        let dist = ring.distribution();
        assert!(dist["large"] > dist["small"] * 2.0, "{dist:?}");
    }

    #[test]
    fn test_distribution_sums_to_one() {
        let ring = ring_with(&["node-a", "node-b", "node-c", "node-d"], 150);
        let total: f64 = ring.distribution().values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        for share in ring.distribution().values() {
            assert!(*share > 0.1 && *share < 0.4);
        }
    }

    #[test]
    fn test_lookup_n_returns_distinct_nodes() {
        let ring = ring_with(&["node-a", "node-b", "node-c"], 50);
        let replicas = ring.lookup_n("user:42", 2);
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0], replicas[1]);
        assert_eq!(Some(replicas[0]), ring.lookup("user:42"));

        assert_eq!(ring.lookup_n("user:42", 10).len(), 3);
    }

    #[test]
    fn test_nodes_sorted() {
        let ring = ring_with(&["node-c", "node-a", "node-b"], 5);
        assert_eq!(ring.nodes(), vec!["node-a", "node-b", "node-c"]);
        assert!(ring.contains("node-a"));
        assert!(!ring.contains("node-z"));
    }
}
