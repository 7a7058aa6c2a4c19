// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cancellable periodic tasks.
//!
//! Every background loop in the engine has the same shape: wait for the
//! next interval tick (or an early wake-up), do one unit of work, stop when
//! the shutdown signal fires, then run a final hook. [`spawn_periodic`]
//! owns that loop; a [`PeriodicTask`] only supplies the work.
//!
//! ```text
//!              ┌──────── interval tick ────────┐
//!   spawn ──▶ select ◀──── wake() ready ─────▶ tick()
//!              │
//!              └── shutdown ──▶ on_shutdown() ──▶ exit
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[async_trait]
pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> &'static str;

    /// One unit of work. Runs on every tick and after every wake-up.
    async fn tick(&mut self);

    /// Resolves when the task wants to run before its next tick.
    ///
    /// Must be cancel-safe: it is raced against the interval and the
    /// shutdown signal. Never resolves by default.
    async fn wake(&mut self) {
        std::future::pending::<()>().await
    }

    /// Final hook after shutdown is signalled.
    async fn on_shutdown(&mut self) {}
}

/// Spawn `task` on the runtime, ticking every `period` until `shutdown`
/// flips to true (or its sender is dropped).
pub fn spawn_periodic<T: PeriodicTask>(
    mut task: T,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = task.name(), ?period, "Periodic task started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => task.tick().await,
                _ = task.wake() => task.tick().await,
            }
        }

        task.on_shutdown().await;
        debug!(task = task.name(), "Periodic task stopped");
    })
}
