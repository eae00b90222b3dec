//! Exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Tracks consecutive failures for one retry loop.
///
/// Each publisher creates its own; nothing about retry state is shared.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay,
            multiplier: config.multiplier,
            max: config.max_delay,
            jitter: config.jitter,
            attempt: 0,
        }
    }

    /// Failures seen since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay after `attempt` consecutive failures (0-based)
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(64) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Delay before the next retry; advances the failure count
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter > 0.0 {
            delay.mul_f64(1.0 - self.jitter * rng.gen::<f64>())
        } else {
            delay
        }
    }
}
