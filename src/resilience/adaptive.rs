// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker with a rolling failure-rate window.
//!
//! The window only observes: trip decisions stay with the wrapped
//! [`CircuitBreaker`]. [`AdaptiveCircuitBreaker::suggested_threshold`] turns
//! the observed rate into a threshold an external policy may choose to apply.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    failures: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, horizon: Duration) {
        let now = Instant::now();
        for queue in [&mut self.requests, &mut self.failures] {
            while queue.front().is_some_and(|t| now.duration_since(*t) > horizon) {
                queue.pop_front();
            }
        }
    }
}

#[derive(Debug)]
pub struct AdaptiveCircuitBreaker {
    breaker: CircuitBreaker,
    window: RwLock<Window>,
    horizon: Duration,
}

impl AdaptiveCircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self::with_window(name, config, DEFAULT_WINDOW)
    }

    pub fn with_window(name: impl Into<String>, config: CircuitConfig, horizon: Duration) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, config),
            window: RwLock::new(Window::default()),
            horizon,
        }
    }

    /// The wrapped breaker, for listeners and operator overrides.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Ask the wrapped breaker; an admitted call counts as a request in the
    /// window, a rejected one does not.
    pub fn allow(&self) -> bool {
        let admitted = self.breaker.allow();
        if admitted {
            self.record_request();
        }
        admitted
    }

    pub fn record_request(&self) {
        let mut window = self.window.write();
        window.requests.push_back(Instant::now());
        window.prune(self.horizon);
    }

    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    pub fn record_failure(&self) {
        {
            let mut window = self.window.write();
            window.failures.push_back(Instant::now());
            window.prune(self.horizon);
        }
        self.breaker.record_failure();
    }

    pub fn release_trial(&self) {
        self.breaker.release_trial();
    }

    /// Failures over requests inside the window; 0 with no requests.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let now = Instant::now();
        let window = self.window.read();
        let live = |q: &VecDeque<Instant>| {
            q.iter().filter(|t| now.duration_since(**t) <= self.horizon).count()
        };

        let requests = live(&window.requests);
        if requests == 0 {
            return 0.0;
        }
        (live(&window.failures) as f64 / requests as f64).min(1.0)
    }

    /// Threshold an adaptive policy would use at the current failure rate:
    /// halved above 50%, doubled below 10%.
    #[must_use]
    pub fn suggested_threshold(&self) -> u32 {
        let base = self.breaker.config().failure_threshold;
        let rate = self.failure_rate();
        if rate > 0.5 {
            (base / 2).max(1)
        } else if rate < 0.1 {
            base.saturating_mul(2)
        } else {
            base
        }
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        self.breaker.stats()
    }
}

/// The engine's two gated dependencies.
#[derive(Debug)]
pub struct BackendCircuits {
    /// The backing store
    pub store: AdaptiveCircuitBreaker,
    /// The read-through source; more aggressive, a slow origin should not
    /// be hammered
    pub loader: AdaptiveCircuitBreaker,
}

impl BackendCircuits {
    /// Store breaker from `config`; the loader trips twice as fast.
    #[must_use]
    pub fn new(config: &CircuitConfig) -> Self {
        let loader_config = CircuitConfig {
            failure_threshold: (config.failure_threshold / 2).max(1),
            ..config.clone()
        };
        Self {
            store: AdaptiveCircuitBreaker::new("store", config.clone()),
            loader: AdaptiveCircuitBreaker::new("loader", loader_config),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Vec<CircuitStats> {
        vec![self.store.stats(), self.loader.stats()]
    }
}
