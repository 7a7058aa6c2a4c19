// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shard records and ring membership.
//!
//! [`ShardTable::apply`] folds a fresh topology snapshot into the table and
//! returns the ring edits it implies. A node is on the ring exactly when
//! its record exists and is healthy.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::hash_ring::{ConsistentHashRing, KeyMove, REBALANCE_SAMPLES};
use crate::storage::traits::NodeInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shard {
    pub id: String,
    pub address: String,
    pub weight: u32,
    pub healthy: bool,
    /// Last time the node was reported healthy, ms since epoch (0 = never)
    pub last_seen_ms: u64,
}

/// Ring edits produced by one topology refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    pub added: Vec<(String, u32)>,
    pub removed: Vec<String>,
    /// Sampled key movement the edits caused; filled by [`TopologyChange::apply_to`]
    pub moves: Vec<KeyMove>,
}

impl TopologyChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Apply the edits and record the resulting key movement.
    ///
    /// Removals first, so a reweighted node is re-added with its new weight.
    pub fn apply_to(&mut self, ring: &mut ConsistentHashRing) {
        if self.is_empty() {
            return;
        }
        let before = ring.clone();
        for id in &self.removed {
            ring.remove(id);
        }
        for (id, weight) in &self.added {
            ring.add(id, *weight);
        }
        self.moves = ring.rebalance_from(&before, REBALANCE_SAMPLES);
    }

    /// Estimated fraction of all keys that changed owner.
    #[must_use]
    pub fn moved_share(&self) -> f64 {
        self.moves.iter().map(KeyMove::share).sum()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ShardTable {
    shards: HashMap<String, Shard>,
}

impl ShardTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, nodes: &[NodeInfo], now_ms: u64) -> TopologyChange {
        let mut change = TopologyChange::default();
        let reported: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let mut vanished: Vec<String> = self
            .shards
            .keys()
            .filter(|id| !reported.contains(id.as_str()))
            .cloned()
            .collect();
        vanished.sort_unstable();
        for id in vanished {
            if let Some(shard) = self.shards.remove(&id) {
                if shard.healthy {
                    change.removed.push(id);
                }
            }
        }

        for node in nodes {
            let weight = node.weight.max(1);
            let previous = self.shards.get(&node.id);
            let was_on_ring = previous.is_some_and(|s| s.healthy);

            match (was_on_ring, node.healthy) {
                (false, true) => change.added.push((node.id.clone(), weight)),
                (true, false) => change.removed.push(node.id.clone()),
                (true, true) if previous.is_some_and(|s| s.weight != weight) => {
                    change.removed.push(node.id.clone());
                    change.added.push((node.id.clone(), weight));
                }
                _ => {}
            }

            let last_seen_ms = if node.healthy {
                now_ms
            } else {
                previous.map_or(0, |s| s.last_seen_ms)
            };
            self.shards.insert(
                node.id.clone(),
                Shard {
                    id: node.id.clone(),
                    address: node.address.clone(),
                    weight,
                    healthy: node.healthy,
                    last_seen_ms,
                },
            );
        }

        change
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Shard> {
        self.shards.get(id)
    }

    /// All shards, sorted by id.
    #[must_use]
    pub fn shards(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self.shards.values().cloned().collect();
        shards.sort_by(|a, b| a.id.cmp(&b.id));
        shards
    }

    /// `(healthy, total)` node counts.
    #[must_use]
    pub fn health_counts(&self) -> (usize, usize) {
        let healthy = self.shards.values().filter(|s| s.healthy).count();
        (healthy, self.shards.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
