// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key placement across backing-store nodes.
//!
//! [`hash_ring::ConsistentHashRing`] maps keys to node ids;
//! [`topology::ShardTable`] keeps the per-node records (address, weight,
//! health) that decide ring membership.

pub mod hash_ring;
pub mod topology;
