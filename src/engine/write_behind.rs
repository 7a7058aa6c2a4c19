// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-behind queue and its flusher.
//!
//! Producers `try_send` onto a bounded queue; a full (or closed) queue hands
//! the operation back and it is written directly instead, so nothing is
//! dropped at enqueue time.
//!
//! ```text
//! set/delete/expire ─▶ mpsc (bounded) ─▶ Flusher ─▶ WriteBatcher ─▶ group by shard ─▶ exec_batch
//!        │ full                                                        (stable sort)
//!        └─▶ direct write through the breaker
//! ```
//!
//! The flusher holds batches back while the store breaker is open and
//! retries them on the next tick. On shutdown it drains the queue and
//! writes everything once more, breaker or not.
//!
//! A manual flush waits for the next round and learns its [`FlushOutcome`]:
//! only `Written` means everything queued before the request reached the
//! store.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::types::{WriteKind, WriteOperation};
use super::EngineInner;
use crate::batching::{BatchConfig, FlushBatch, FlushReason, WriteBatcher};
use crate::error::CacheError;
use crate::scheduler::PeriodicTask;
use crate::storage::traits::{StorageError, WriteBatch};

/// The queue refused an operation; it comes back for a direct write.
pub(crate) struct BufferFull(pub(crate) WriteOperation);

/// Result of the flush round a manual flush waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FlushOutcome {
    /// Every buffered operation reached the store
    Written,
    /// At least one batch failed and its operations were dropped
    Failed,
    /// The open store breaker held a batch back; it is still queued
    Held,
}

/// Reply channel of one manual flush.
pub(crate) type FlushAck = oneshot::Sender<FlushOutcome>;

/// What happened to one batch.
enum BatchResult {
    Written,
    Failed,
    Held(Vec<WriteOperation>),
}

/// Drain-and-flush rounds per tick. Two rounds cover everything that was
/// queued when the tick started.
const ROUNDS_PER_TICK: usize = 2;

impl EngineInner {
    fn enqueue(&self, op: WriteOperation) -> Result<(), BufferFull> {
        let Some(tx) = &self.write_tx else {
            return Err(BufferFull(op));
        };
        tx.try_send(op).map_err(|e| match e {
            TrySendError::Full(op) | TrySendError::Closed(op) => BufferFull(op),
        })
    }

    /// Queue `op`, or write it now if the queue will not take it.
    pub(crate) async fn submit(&self, op: WriteOperation) -> Result<(), CacheError> {
        match self.enqueue(op) {
            Ok(()) => Ok(()),
            Err(BufferFull(op)) => {
                debug!(key = %op.key, kind = %op.kind, "Write-behind queue full, writing directly");
                crate::metrics::record_write_behind_fallback(op.kind.as_str());
                self.write_direct(op).await
            }
        }
    }

    async fn write_direct(&self, op: WriteOperation) -> Result<(), CacheError> {
        match op.kind {
            WriteKind::Set => {
                let payload = op.payload.as_deref().unwrap_or_default();
                self.call_store("set", self.store.set(&op.key, payload, op.ttl)).await
            }
            WriteKind::Delete => {
                let keys = [op.key];
                self.call_store("delete", self.store.del(&keys)).await.map(|_| ())
            }
            WriteKind::Expire => self.call_store("expire", self.store.expire(&op.key, op.ttl)).await.map(|_| ()),
        }
    }
}

/// Background task draining the write-behind queue.
pub(super) struct Flusher {
    inner: Arc<EngineInner>,
    rx: mpsc::Receiver<WriteOperation>,
    flush_rx: mpsc::Receiver<FlushAck>,
    batcher: WriteBatcher<WriteOperation>,
    /// Manual flush callers waiting for the next write-out
    waiters: Vec<FlushAck>,
    /// Stop pulling from the queue past this many buffered operations
    capacity: usize,
}

impl Flusher {
    pub(super) fn new(
        inner: Arc<EngineInner>,
        rx: mpsc::Receiver<WriteOperation>,
        flush_rx: mpsc::Receiver<FlushAck>,
    ) -> Self {
        let wb = &inner.config.write_behind;
        let batcher = WriteBatcher::new(BatchConfig::from(wb));
        let capacity = wb.queue_capacity.max(wb.batch_size);
        Self {
            inner,
            rx,
            flush_rx,
            batcher,
            waiters: Vec::new(),
            capacity,
        }
    }

    /// Move queued operations into the batcher without waiting.
    fn drain_queue(&mut self) {
        while self.batcher.len() < self.capacity {
            match self.rx.try_recv() {
                Ok(op) => {
                    self.batcher.add(op);
                }
                Err(_) => break,
            }
        }
        while let Ok(waiter) = self.flush_rx.try_recv() {
            self.waiters.push(waiter);
        }
    }

    /// Flush until the batcher is empty, or until the breaker holds a batch
    /// back.
    async fn flush_all(&mut self, reason: FlushReason, shutting_down: bool) -> FlushOutcome {
        let mut outcome = FlushOutcome::Written;
        while let Some(batch) = self.batcher.take(reason) {
            match self.flush_batch(batch, shutting_down).await {
                BatchResult::Written => {}
                BatchResult::Failed => outcome = FlushOutcome::Failed,
                BatchResult::Held(items) => {
                    self.batcher.requeue_front(items);
                    return FlushOutcome::Held;
                }
            }
        }
        outcome
    }

    /// Write one batch as a single pipelined store call.
    async fn flush_batch(&self, batch: FlushBatch<WriteOperation>, shutting_down: bool) -> BatchResult {
        let breaker = &self.inner.circuits.store;
        if !breaker.allow() {
            if !shutting_down {
                debug!(count = batch.items.len(), "Store circuit open, holding write-behind batch");
                return BatchResult::Held(batch.items);
            }
            info!(count = batch.items.len(), "Store circuit open at shutdown, attempting final write anyway");
            breaker.record_request();
        }

        let count = batch.items.len();
        let reason = batch.reason;
        let oldest = batch.items.iter().map(|op| op.enqueued_at).min();
        let store_batch = self.group_by_shard(batch.items);

        let timeout = self.inner.config.write_behind.batch_timeout();
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.inner.store.exec_batch(store_batch)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout { operation: "exec_batch", after: timeout }),
        };

        match outcome {
            Ok(()) => {
                breaker.record_success();
                crate::metrics::record_batch_flush(reason.as_str(), count, started.elapsed());
                debug!(
                    count,
                    %reason,
                    queued_ms = oldest.map_or(0, |t| t.elapsed().as_millis() as u64),
                    "Write-behind batch flushed"
                );
                BatchResult::Written
            }
            Err(e) => {
                breaker.record_failure();
                self.inner.stats.record_error();
                crate::metrics::record_error("flush", "backend");
                crate::metrics::record_write_behind_dropped(count);
                error!(count, %reason, error = %e, "Write-behind batch failed, operations dropped");
                BatchResult::Failed
            }
        }
    }

    /// One store batch with operations grouped by owning shard.
    ///
    /// The sort is stable and a key always maps to one shard, so operations
    /// on the same key keep their submission order.
    fn group_by_shard(&self, items: Vec<WriteOperation>) -> WriteBatch {
        let mut tagged: Vec<(String, WriteOperation)> =
            items.into_iter().map(|op| (self.inner.shard_label(&op.key), op)).collect();
        tagged.sort_by(|a, b| a.0.cmp(&b.0));

        for group in tagged.chunk_by(|a, b| a.0 == b.0) {
            crate::metrics::record_shard_batch(&group[0].0, group.len());
        }

        let mut batch = WriteBatch::with_capacity(tagged.len());
        for (_, op) in tagged {
            op.push_to(&mut batch);
        }
        batch
    }

    fn ack_waiters(&mut self, outcome: FlushOutcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome);
        }
    }
}

#[async_trait]
impl PeriodicTask for Flusher {
    fn name(&self) -> &'static str {
        "write_behind_flusher"
    }

    async fn tick(&mut self) {
        let mut outcome = FlushOutcome::Written;
        for _ in 0..ROUNDS_PER_TICK {
            self.drain_queue();
            if self.batcher.is_empty() {
                break;
            }
            let reason = if self.waiters.is_empty() {
                self.batcher.due().unwrap_or(FlushReason::Interval)
            } else {
                FlushReason::Manual
            };
            outcome = outcome.max(self.flush_all(reason, false).await);
            if outcome == FlushOutcome::Held {
                break;
            }
        }
        self.ack_waiters(outcome);
        crate::metrics::set_write_behind_pending(self.batcher.len());
    }

    async fn wake(&mut self) {
        // Full buffer: leave the rest in the queue until the next tick
        if self.batcher.len() >= self.capacity {
            std::future::pending::<()>().await;
        }
        loop {
            tokio::select! {
                Some(op) = self.rx.recv() => {
                    if self.batcher.add(op).is_some() || self.batcher.len() >= self.capacity {
                        return;
                    }
                }
                Some(waiter) = self.flush_rx.recv() => {
                    self.waiters.push(waiter);
                    return;
                }
                else => std::future::pending::<()>().await,
            }
        }
    }

    async fn on_shutdown(&mut self) {
        self.rx.close();
        self.flush_rx.close();
        while let Ok(op) = self.rx.try_recv() {
            self.batcher.add(op);
        }
        while let Ok(waiter) = self.flush_rx.try_recv() {
            self.waiters.push(waiter);
        }

        let pending = self.batcher.len();
        let outcome = self.flush_all(FlushReason::Shutdown, true).await;
        self.ack_waiters(outcome);
        crate::metrics::set_write_behind_pending(0);
        info!(pending, "Write-behind queue drained");
    }
}
