// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker state machine.
//!
//! Protects the engine against cascading failures when the backing store or
//! the read-through loader is unhealthy. Callers ask [`CircuitBreaker::allow`]
//! before each dependency call and report the outcome with
//! [`CircuitBreaker::record_success`] / [`CircuitBreaker::record_failure`].
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency unhealthy, requests fail fast without attempting
//! - HalfOpen: Testing if the dependency recovered, limited trials allowed
//!
//! ```text
//!          failures >= threshold              timeout elapsed
//!  Closed ─────────────────────────▶ Open ───────────────────▶ HalfOpen
//!    ▲                                 ▲                          │
//!    │      successes >= threshold     │       any failure        │
//!    └─────────────────────────────────┼──────────────────────────┤
//!                                      └──────────────────────────┘
//! ```

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long to stay open before admitting a trial
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Trials admitted per half-open period, the transitioning call included
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_success_threshold() -> u32 { 3 }
fn default_recovery_timeout_ms() -> u64 { 30_000 }
fn default_half_open_max_requests() -> u32 { 3 }

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for critical paths (trips faster)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout_ms: 10_000,
            half_open_max_requests: 1,
        }
    }

    /// Lenient config for less critical paths (more tolerant)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 3,
            recovery_timeout_ms: 60_000,
            half_open_max_requests: 5,
        }
    }

    /// Fast config for tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout_ms: 50,
            half_open_max_requests: 1,
        }
    }

    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Reject settings under which the breaker could never close again.
    ///
    /// HalfOpen admits `half_open_max_requests` trials and closes after
    /// `success_threshold` successes, so the trials must be able to reach
    /// the threshold.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err("circuit breaker thresholds must be at least 1".into());
        }
        if self.half_open_max_requests == 0 {
            return Err("half_open_max_requests must be at least 1".into());
        }
        if self.success_threshold > self.half_open_max_requests {
            return Err(format!(
                "success_threshold ({}) exceeds half_open_max_requests ({}); the breaker could never close",
                self.success_threshold, self.half_open_max_requests
            ));
        }
        Ok(())
    }

    /// Raise the trial budget to the success threshold, and zero values to 1.
    fn normalized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.success_threshold = self.success_threshold.max(1);
        self.half_open_max_requests = self.half_open_max_requests.max(self.success_threshold);
        self
    }
}

/// Observer of breaker transitions.
///
/// Invoked on every transition, in the order the transitions happened and
/// after the breaker's lock is released, so an implementation may call back
/// into the breaker. Delivery runs on the transitioning thread unless
/// another thread is already delivering, in which case that thread picks
/// the transition up.
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, circuit: &str, from: CircuitState, to: CircuitState);
}

impl<F> StateListener for F
where
    F: Fn(&str, CircuitState, CircuitState) + Send + Sync,
{
    fn on_state_change(&self, circuit: &str, from: CircuitState, to: CircuitState) {
        self(circuit, from, to)
    }
}

/// Point-in-time view of a breaker, for health reports and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_requests: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub half_open_max_requests: u32,
    pub recovery_timeout_ms: u64,
    pub secs_since_transition: f64,
    pub calls_total: u64,
    pub rejections_total: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    half_open_requests: u32,
    last_transition: Instant,
}

type Transition = (CircuitState, CircuitState);

/// Transitions waiting for delivery, in the order they were made.
#[derive(Debug, Default)]
struct Dispatch {
    pending: VecDeque<Transition>,
    delivering: bool,
}

/// Clears `delivering` if a listener panics mid-delivery.
struct DeliveryGuard<'a> {
    dispatch: &'a Mutex<Dispatch>,
    finished: bool,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.dispatch.lock().delivering = false;
        }
    }
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            half_open_requests: 0,
            last_transition: Instant::now(),
        }
    }

    /// Moves to `to`, resetting the per-state counters. Returns the edge taken.
    fn transition(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        self.successes = 0;
        self.half_open_requests = 0;
        match to {
            CircuitState::Closed => self.failures = 0,
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
        (from != to).then_some((from, to))
    }
}

/// A named circuit breaker guarding one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: RwLock<BreakerState>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    dispatch: Mutex<Dispatch>,
    calls_total: AtomicU64,
    rejections_total: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config.
    ///
    /// A config that fails [`CircuitConfig::validate`] is normalized: the
    /// half-open trial budget is raised to `success_threshold`.
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        if let Err(reason) = config.validate() {
            warn!(circuit = %name, %reason, "Normalizing circuit breaker config");
        }
        let config = config.normalized();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);
        Self {
            name,
            config,
            state: RwLock::new(BreakerState::new()),
            listeners: RwLock::new(Vec::new()),
            dispatch: Mutex::new(Dispatch::default()),
            calls_total: AtomicU64::new(0),
            rejections_total: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Register a transition listener. Listeners run in registration order.
    pub fn on_state_change(&self, listener: impl StateListener + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Ask whether a call may proceed.
    ///
    /// In Open, the first call after the recovery timeout moves the breaker
    /// to HalfOpen and is itself the first trial.
    pub fn allow(&self) -> bool {
        let mut guard = self.state.write();
        let (allowed, change) = match guard.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                if guard.last_transition.elapsed() >= self.config.recovery_timeout() {
                    let change = guard.transition(CircuitState::HalfOpen);
                    guard.half_open_requests = 1;
                    (true, change)
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if guard.half_open_requests < self.config.half_open_max_requests {
                    guard.half_open_requests += 1;
                    (true, None)
                } else {
                    (false, None)
                }
            }
        };
        self.commit(guard, change);

        self.calls_total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            crate::metrics::record_circuit_call(&self.name, "allowed");
        } else {
            self.rejections_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_circuit_call(&self.name, "rejected");
            debug!(circuit = %self.name, "Circuit breaker rejected call");
        }
        allowed
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut guard = self.state.write();
        let change = match guard.state {
            CircuitState::Closed => {
                guard.failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                guard.successes += 1;
                if guard.successes >= self.config.success_threshold {
                    guard.transition(CircuitState::Closed)
                } else {
                    None
                }
            }
            CircuitState::Open => {
                debug!(circuit = %self.name, "Ignoring success reported while open");
                None
            }
        };
        self.commit(guard, change);
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        let mut guard = self.state.write();
        let change = match guard.state {
            CircuitState::Closed => {
                guard.failures += 1;
                if guard.failures >= self.config.failure_threshold {
                    guard.transition(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                guard.failures += 1;
                guard.transition(CircuitState::Open)
            }
            // Cooldown runs from the transition, not from the latest failure
            CircuitState::Open => {
                guard.failures += 1;
                None
            }
        };
        self.commit(guard, change);
    }

    /// Give back a half-open trial slot whose call never reported an outcome.
    pub fn release_trial(&self) {
        let mut guard = self.state.write();
        match guard.state {
            CircuitState::HalfOpen => {
                guard.half_open_requests = guard.half_open_requests.saturating_sub(1);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Force the breaker closed and zero every counter. Idempotent.
    pub fn reset(&self) {
        let mut guard = self.state.write();
        let change = guard.transition(CircuitState::Closed);
        guard.failures = 0;
        self.commit(guard, change);
    }

    /// Operator override: trip the breaker immediately.
    pub fn force_open(&self) {
        let mut guard = self.state.write();
        let change = guard.transition(CircuitState::Open);
        self.commit(guard, change);
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        let guard = self.state.read();
        CircuitStats {
            name: self.name.clone(),
            state: guard.state,
            failure_count: guard.failures,
            success_count: guard.successes,
            half_open_requests: guard.half_open_requests,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            half_open_max_requests: self.config.half_open_max_requests,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
            secs_since_transition: guard.last_transition.elapsed().as_secs_f64(),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            rejections_total: self.rejections_total.load(Ordering::Relaxed),
        }
    }

    /// Queue `change` while the state lock is still held, release the lock,
    /// then deliver.
    fn commit(&self, guard: RwLockWriteGuard<'_, BreakerState>, change: Option<Transition>) {
        if let Some(change) = change {
            self.dispatch.lock().pending.push_back(change);
        }
        drop(guard);
        self.deliver();
    }

    /// Publish queued transitions in order. Only one thread delivers at a
    /// time; the others leave their transitions to it.
    fn deliver(&self) {
        {
            let mut dispatch = self.dispatch.lock();
            if dispatch.delivering || dispatch.pending.is_empty() {
                return;
            }
            dispatch.delivering = true;
        }
        let mut guard = DeliveryGuard { dispatch: &self.dispatch, finished: false };

        loop {
            let next = {
                let mut dispatch = self.dispatch.lock();
                let next = dispatch.pending.pop_front();
                if next.is_none() {
                    dispatch.delivering = false;
                }
                next
            };
            let Some((from, to)) = next else { break };
            self.publish(from, to);
        }
        guard.finished = true;
    }

    fn publish(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(circuit = %self.name, %from, "Circuit breaker opened"),
            CircuitState::HalfOpen => info!(circuit = %self.name, "Circuit breaker half-open, probing"),
            CircuitState::Closed => info!(circuit = %self.name, %from, "Circuit breaker closed"),
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
        crate::metrics::record_circuit_transition(&self.name, &to.to_string());

        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_state_change(&self.name, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread::sleep;

    fn config(failures: u32, successes: u32, timeout_ms: u64, trials: u32) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: failures,
            success_threshold: successes,
            recovery_timeout_ms: timeout_ms,
            half_open_max_requests: trials,
        }
    }

    fn tripped(cfg: CircuitConfig) -> CircuitBreaker {
        let cb = CircuitBreaker::new("test", cfg);
        for _ in 0..cb.config().failure_threshold {
            assert!(cb.allow());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::with_defaults("test");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
        assert_eq!(cb.name(), "test");
    }

    #[test]
    fn test_trips_at_failure_threshold() {
        let cb = CircuitBreaker::new("test", config(5, 3, 30_000, 3));

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow(), "open breaker must reject before the timeout");
    }

    #[test]
    fn test_success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new("test", config(3, 1, 30_000, 1));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 2);
    }

    #[test]
    fn test_recovery_admits_exactly_max_trials() {
        let cb = tripped(config(5, 3, 20, 3));
        sleep(Duration::from_millis(30));

        // First allow transitions to HalfOpen and counts as trial #1
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow());
        assert!(cb.allow());
        assert!(!cb.allow(), "fourth trial must be rejected");
        assert_eq!(cb.stats().half_open_requests, 3);
    }

    #[test]
    fn test_half_open_successes_close() {
        let cb = tripped(config(2, 3, 10, 3));
        sleep(Duration::from_millis(20));

        for _ in 0..3 {
            assert!(cb.allow());
        }
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.half_open_requests, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = tripped(config(2, 3, 10, 3));
        sleep(Duration::from_millis(20));

        assert!(cb.allow());
        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow(), "cooldown restarts from the reopen");
    }

    #[test]
    fn test_reset_is_idempotent() {
        let cb = tripped(CircuitConfig::test());
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_success_while_open_is_ignored() {
        let cb = tripped(CircuitConfig::test());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_release_trial_frees_slot() {
        let cb = tripped(config(1, 1, 10, 1));
        sleep(Duration::from_millis(20));

        assert!(cb.allow());
        assert!(!cb.allow());
        cb.release_trial();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow(), "released slot can be reused");
    }

    #[test]
    fn test_force_open() {
        let cb = CircuitBreaker::with_defaults("test");
        cb.force_open();
        assert!(cb.is_open());
        assert!(!cb.allow());
    }

    #[test]
    fn test_listeners_see_every_transition() {
        let seen: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(Mutex::new(Vec::new()));
        let cb = CircuitBreaker::new("test", config(1, 1, 10, 1));

        let log = seen.clone();
        cb.on_state_change(move |_: &str, from: CircuitState, to: CircuitState| log.lock().push((from, to)));

        cb.record_failure();
        sleep(Duration::from_millis(20));
        assert!(cb.allow());
        cb.record_success();

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_listener_may_query_breaker() {
        let cb = Arc::new(CircuitBreaker::new("test", config(1, 1, 10, 1)));
        let observed = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&cb);
        let slot = observed.clone();
        cb.on_state_change(move |_: &str, _: CircuitState, _: CircuitState| {
            if let Some(cb) = weak.upgrade() {
                *slot.lock() = Some(cb.stats().state);
            }
        });

        cb.record_failure();
        assert_eq!(*observed.lock(), Some(CircuitState::Open));
    }

    #[test]
    fn test_reset_from_closed_fires_nothing() {
        let count = Arc::new(AtomicU64::new(0));
        let cb = CircuitBreaker::with_defaults("test");
        let c = count.clone();
        cb.on_state_change(move |_: &str, _: CircuitState, _: CircuitState| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        cb.reset();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unclosable_config_is_normalized() {
        let cfg = config(1, 3, 10, 1);
        assert!(cfg.validate().is_err());

        let cb = CircuitBreaker::new("test", cfg);
        assert_eq!(cb.config().half_open_max_requests, 3);

        cb.record_failure();
        sleep(Duration::from_millis(20));
        for _ in 0..3 {
            assert!(cb.allow(), "every trial needed to close must be admitted");
            cb.record_success();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_config_validate() {
        assert!(CircuitConfig::default().validate().is_ok());
        assert!(CircuitConfig::aggressive().validate().is_ok());
        assert!(CircuitConfig::lenient().validate().is_ok());
        assert!(CircuitConfig::test().validate().is_ok());
        assert!(config(0, 1, 10, 1).validate().is_err());
        assert!(config(1, 1, 10, 0).validate().is_err());
        assert!(config(1, 2, 10, 1).validate().is_err());
    }

    #[test]
    fn test_concurrent_transitions_delivered_in_order() {
        let cb = Arc::new(CircuitBreaker::with_defaults("test"));
        let seen: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        cb.on_state_change(move |_: &str, from: CircuitState, to: CircuitState| log.lock().push((from, to)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            cb.force_open();
                        } else {
                            cb.reset();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let seen = seen.lock();
        assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "transition delivered out of order: {pair:?}");
        }
        assert_eq!(seen.last().map(|t| t.1), Some(cb.state()), "last delivered state is current");
    }

    #[test]
    fn test_stats_count_rejections() {
        let cb = tripped(CircuitConfig::test());
        assert!(!cb.allow());
        assert!(!cb.allow());

        let stats = cb.stats();
        assert_eq!(stats.rejections_total, 2);
        assert_eq!(stats.calls_total, 4);
        assert_eq!(stats.state, CircuitState::Open);
    }

    #[test]
    fn test_concurrent_failures_trip_once() {
        let cb = Arc::new(CircuitBreaker::new("test", config(50, 1, 60_000, 1)));
        let opened = Arc::new(AtomicU64::new(0));
        let o = opened.clone();
        cb.on_state_change(move |_: &str, _: CircuitState, to: CircuitState| {
            if to == CircuitState::Open {
                o.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_presets() {
        let aggressive = CircuitConfig::aggressive();
        let lenient = CircuitConfig::lenient();
        assert!(aggressive.failure_threshold < lenient.failure_threshold);
        assert!(aggressive.recovery_timeout() < lenient.recovery_timeout());
        assert_eq!(CircuitConfig::default().half_open_max_requests, 3);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: CircuitConfig = serde_json::from_str(r#"{"failure_threshold": 7}"#).unwrap();
        assert_eq!(cfg.failure_threshold, 7);
        assert_eq!(cfg.success_threshold, 3);
        assert_eq!(cfg.recovery_timeout(), Duration::from_secs(30));
    }
}
