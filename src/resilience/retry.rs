// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Only the connection handshake retries. Per-command calls never do: a
//! failed command is reported to the circuit breaker once and surfaced, so
//! the breaker sees the real failure rate.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::connect()
    }
}

impl RetryConfig {
    /// Connection handshake at engine start: 5 attempts, ~3s worst case,
    /// so a wrong address fails construction quickly.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        self.initial_delay.mul_f64(self.factor.powi(exp)).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached,
/// returning the last error.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!(operation = operation_name, retries = attempt, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    warn!(operation = operation_name, attempts = attempt, error = %err, "Giving up");
                    return Err(err);
                }

                let delay = config.backoff(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
