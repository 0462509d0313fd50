//! Exponential backoff for failed deliveries.
//!
//! After a transient failure the queue stops draining for a while instead of
//! hammering a collector that is down. Consecutive failures double the pause
//! up to a cap; one success resets it.
//!
//! - Transient: 5s, 10s, 20s, ... capped at 5 minutes
//! - Permanent (auth, bad request): a flat 15 minute pause

use std::time::Duration;

/// Backoff configuration for delivery failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Pause after the first transient failure.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Multiplier per consecutive failure (typically 2.0).
    pub backoff_multiplier: f64,

    /// Pause after a permanent failure.
    pub permanent_delay: Duration,
}

impl BackoffConfig {
    pub const DEFAULT: Self = Self {
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5 * 60),
        backoff_multiplier: 2.0,
        permanent_delay: Duration::from_secs(15 * 60),
    };

    /// Computes the pause after `failures` consecutive transient failures
    /// (1-indexed; 0 means no pause).
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
