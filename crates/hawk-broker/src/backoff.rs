//! Exponential backoff without jitter.
//!
//! `delay_n = min(initial * multiplier^n, max_interval)`. A sequence is
//! exhausted once the time elapsed since its first `next_delay` call exceeds
//! `max_elapsed_time`. Every retry sequence starts from a fresh
//! [`ExponentialBackoff`]; instances are never shared between sequences.

use std::time::Duration;

use hawk_core::BrokerError;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl BackoffConfig {
    /// Re-subscription after the consumer loses its connection.
    pub const fn consumer_reconnect() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(3 * 60),
        }
    }

    /// Retry of a single publish.
    pub const fn publish_retry() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(15),
            max_elapsed_time: Duration::from_secs(60),
        }
    }

    /// Delay before the `attempt`-th retry (0-based), capped at `max_interval`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Start a new retry sequence.
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self)
    }
}

/// State of one retry sequence.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    started_at: Option<Instant>,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            started_at: None,
            attempts: 0,
        }
    }

    /// Next delay to wait, or `None` once the elapsed-time budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let started_at = *self.started_at.get_or_insert(now);
        if now.duration_since(started_at) > self.config.max_elapsed_time {
            return None;
        }

        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|started_at| started_at.elapsed())
            .unwrap_or_default()
    }

    /// Error describing the exhaustion of this sequence.
    pub fn exhausted(&self, operation: &'static str) -> BrokerError {
        BrokerError::BackoffExhausted {
            operation,
            attempts: self.attempts,
            elapsed: self.elapsed(),
        }
    }
}
