// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch accumulator for the write-behind flusher.
//!
//! The [`WriteBatcher`] collects pending operations and reports when a
//! batch is due: on item count, total bytes, or age (whichever comes
//! first). A batch the store could not take yet is put back at the front
//! with [`WriteBatcher::requeue_front`], so operation order never changes.
//!
//! # Example
//!
//! ```
//! use cache_engine::batching::{BatchConfig, SizedItem, WriteBatcher};
//!
//! struct Op { payload: Vec<u8> }
//! impl SizedItem for Op {
//!     fn size_bytes(&self) -> usize { self.payload.len() }
//! }
//!
//! let mut batcher = WriteBatcher::new(BatchConfig { max_items: 2, max_bytes: 1024, max_age_ms: 1000 });
//! assert!(batcher.add(Op { payload: vec![0; 10] }).is_none());
//! assert!(batcher.add(Op { payload: vec![0; 10] }).is_some()); // count threshold
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::WriteBehindConfig;

/// Why a batch left the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Periodic tick
    Interval,
    /// Item count threshold reached
    Count,
    /// Byte size threshold reached
    Size,
    /// Caller asked for a flush and is waiting on it
    Manual,
    /// Engine is closing
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Count => "count",
            Self::Size => "size",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush after this many items
    pub max_items: usize,
    /// Flush after this many payload bytes
    pub max_bytes: usize,
    /// Flush once the oldest pending item is this old
    pub max_age_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&WriteBehindConfig::default())
    }
}

impl From<&WriteBehindConfig> for BatchConfig {
    fn from(config: &WriteBehindConfig) -> Self {
        Self {
            max_items: config.batch_size.max(1),
            max_bytes: config.batch_max_bytes.max(1),
            max_age_ms: config.flush_interval_ms,
        }
    }
}

/// Items that know their own payload size
pub trait SizedItem {
    #[must_use]
    fn size_bytes(&self) -> usize;
}

/// A batch ready for the store
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub total_bytes: usize,
    pub reason: FlushReason,
}

pub struct WriteBatcher<T> {
    config: BatchConfig,
    items: VecDeque<T>,
    total_bytes: usize,
    oldest: Option<Instant>,
}

impl<T: SizedItem> WriteBatcher<T> {
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            items: VecDeque::new(),
            total_bytes: 0,
            oldest: None,
        }
    }

    /// Append an item. Returns the threshold it crossed, if any.
    pub fn add(&mut self, item: T) -> Option<FlushReason> {
        self.total_bytes += item.size_bytes();
        self.items.push_back(item);
        self.oldest.get_or_insert_with(Instant::now);
        self.due_by_volume()
    }

    /// Put items back ahead of everything pending, keeping their order.
    pub fn requeue_front(&mut self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        for item in items.into_iter().rev() {
            self.total_bytes += item.size_bytes();
            self.items.push_front(item);
        }
        self.oldest = Some(self.oldest.map_or_else(Instant::now, |t| t.min(Instant::now())));
    }

    fn due_by_volume(&self) -> Option<FlushReason> {
        if self.items.len() >= self.config.max_items {
            Some(FlushReason::Count)
        } else if self.total_bytes >= self.config.max_bytes {
            Some(FlushReason::Size)
        } else {
            None
        }
    }

    /// Which threshold, if any, is currently met.
    #[must_use]
    pub fn due(&self) -> Option<FlushReason> {
        self.due_by_volume().or_else(|| {
            self.oldest
                .filter(|t| t.elapsed() >= Duration::from_millis(self.config.max_age_ms))
                .map(|_| FlushReason::Interval)
        })
    }

    /// Take up to `max_items` from the front.
    pub fn take(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let n = self.items.len().min(self.config.max_items);
        let items: Vec<T> = self.items.drain(..n).collect();
        let total_bytes: usize = items.iter().map(SizedItem::size_bytes).sum();
        self.total_bytes = self.total_bytes.saturating_sub(total_bytes);
        if self.items.is_empty() {
            self.oldest = None;
        }
        debug!(count = items.len(), bytes = total_bytes, %reason, "Batch taken for flush");
        Some(FlushBatch { items, total_bytes, reason })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}
