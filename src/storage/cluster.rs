// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Cluster slot bookkeeping.
//!
//! The cluster client routes single-key commands itself. Everything that
//! spans keys (pipelined batches, multi-key DEL) or spans nodes (SCAN, INFO,
//! CONFIG SET) is split here by the master that owns each key's hash slot:
//!
//! ```text
//! keys ─▶ slot (CRC16, hash tags honoured) ─▶ owning master ─▶ one pipeline per master
//! ```
//!
//! A cluster-wide SCAN visits the masters one after another. Its cursor
//! packs the master's index in the top 16 bits and that node's own cursor
//! in the low 48.

use std::collections::HashMap;

use super::traits::StorageError;

/// Bits of a cluster scan cursor holding the node's own cursor.
const NODE_CURSOR_BITS: u32 = 48;
const NODE_CURSOR_MASK: u64 = (1 << NODE_CURSOR_BITS) - 1;

/// Hash slot of an already prefixed key.
#[must_use]
pub fn key_slot(key: &str) -> u16 {
    redis::cluster_routing::get_slot(key.as_bytes())
}

/// Where a group of keys is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRoute {
    /// Master address (`host:port`) owning the keys' slots
    Master(String),
    /// No known owner yet; the client resolves the slot itself
    Slot(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotRange {
    start: u16,
    end: u16,
    master: String,
}

/// Slot ownership as reported by `CLUSTER NODES`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    /// Sorted by `start`, non-overlapping
    ranges: Vec<SlotRange>,
    /// Master addresses (`host:port`), sorted
    masters: Vec<String>,
}

impl SlotMap {
    /// Read master slot ranges out of `CLUSTER NODES` output.
    ///
    /// Failed masters are skipped, as are importing/migrating markers
    /// (`[slot->-node]`).
    #[must_use]
    pub fn from_cluster_nodes(text: &str) -> Self {
        let mut ranges = Vec::new();
        let mut masters = Vec::new();

        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                continue;
            }
            let flags: Vec<&str> = fields[2].split(',').collect();
            if !flags.contains(&"master") || flags.iter().any(|f| *f == "fail" || *f == "fail?") {
                continue;
            }
            let address = fields[1].split('@').next().unwrap_or(fields[1]);
            if split_address(address).is_none() {
                continue;
            }

            let mut owns_slots = false;
            for slot in &fields[8..] {
                if slot.starts_with('[') {
                    continue;
                }
                let (start, end) = match slot.split_once('-') {
                    Some((start, end)) => (start.parse().ok(), end.parse().ok()),
                    None => (slot.parse().ok(), slot.parse().ok()),
                };
                if let (Some(start), Some(end)) = (start, end) {
                    ranges.push(SlotRange { start, end, master: address.to_string() });
                    owns_slots = true;
                }
            }
            if owns_slots {
                masters.push(address.to_string());
            }
        }

        ranges.sort_by_key(|r| r.start);
        masters.sort_unstable();
        masters.dedup();
        Self { ranges, masters }
    }

    /// Address of the master serving `slot`.
    #[must_use]
    pub fn owner(&self, slot: u16) -> Option<&str> {
        let idx = self.ranges.partition_point(|r| r.start <= slot);
        let range = self.ranges.get(idx.checked_sub(1)?)?;
        (slot <= range.end).then_some(range.master.as_str())
    }

    /// Masters owning at least one slot, sorted.
    #[must_use]
    pub fn masters(&self) -> &[String] {
        &self.masters
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Node serving `key`: its master, or the bare slot when no master is
    /// known for it.
    #[must_use]
    pub fn route(&self, key: &str) -> NodeRoute {
        let slot = key_slot(key);
        match self.owner(slot) {
            Some(master) => NodeRoute::Master(master.to_string()),
            None => NodeRoute::Slot(slot),
        }
    }

    /// Split `items` into per-node groups, in order of first appearance.
    /// Items keep their relative order inside a group.
    pub fn group_by_node<T>(&self, items: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<(NodeRoute, Vec<T>)> {
        let mut groups: Vec<(NodeRoute, Vec<T>)> = Vec::new();
        let mut index: HashMap<NodeRoute, usize> = HashMap::new();
        for item in items {
            let route = self.route(key(&item));
            let i = *index.entry(route.clone()).or_insert_with(|| {
                groups.push((route, Vec::new()));
                groups.len() - 1
            });
            groups[i].1.push(item);
        }
        groups
    }

    /// Split keys per node, then per slot inside a node, so each multi-key
    /// command stays within one slot.
    #[must_use]
    pub fn group_keys_by_slot(&self, keys: Vec<String>) -> Vec<(NodeRoute, Vec<Vec<String>>)> {
        self.group_by_node(keys, String::as_str)
            .into_iter()
            .map(|(node, keys)| {
                let mut slots: Vec<(u16, Vec<String>)> = Vec::new();
                for key in keys {
                    let slot = key_slot(&key);
                    match slots.iter_mut().find(|(s, _)| *s == slot) {
                        Some((_, group)) => group.push(key),
                        None => slots.push((slot, vec![key])),
                    }
                }
                (node, slots.into_iter().map(|(_, keys)| keys).collect())
            })
            .collect()
    }
}

/// `host:port` into its parts. IPv6 hosts keep their colons.
#[must_use]
pub fn split_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

/// Cluster scan cursor for `node_cursor` on the master at `node_index`.
pub fn encode_cursor(node_index: usize, node_cursor: u64) -> Result<u64, StorageError> {
    if node_cursor > NODE_CURSOR_MASK || node_index > u16::MAX as usize {
        return Err(StorageError::Backend(format!(
            "scan cursor out of range: node {node_index}, cursor {node_cursor}"
        )));
    }
    Ok(((node_index as u64) << NODE_CURSOR_BITS) | node_cursor)
}

/// `(node_index, node_cursor)` packed in a cluster scan cursor.
#[must_use]
pub fn decode_cursor(cursor: u64) -> (usize, u64) {
    ((cursor >> NODE_CURSOR_BITS) as usize, cursor & NODE_CURSOR_MASK)
}
