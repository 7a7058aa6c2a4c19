// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backing stores the engine caches into.
//!
//! - [`redis::RedisStore`]: the production backend
//! - [`memory::InMemoryStore`]: in-process, for tests and demos
//! - [`cluster`]: hash slot routing for Redis Cluster deployments

pub mod traits;
pub mod memory;
pub mod cluster;
pub mod redis;
