//! Exponential backoff for automatic reconnects.
//!
//! The first reconnect after a healthy connection goes out immediately.
//! Each further consecutive reconnect waits `base * factor^(n-1)`, capped
//! at `max` and randomized by `±jitter`. A completed handshake resets the
//! count.

use discorator_core::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    /// 0 means unlimited.
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64, jitter: f64, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            config.factor,
            config.jitter,
            config.max_attempts,
        )
    }

    /// Delay before the next reconnect, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.attempt >= self.max_attempts {
            return None;
        }

        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        if attempt == 0 {
            return Some(Duration::ZERO);
        }

        // Capped in f64 before converting, so long unlimited runs cannot overflow Duration
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        let delay = if secs.is_finite() && secs < self.max.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max
        };

        if self.jitter == 0.0 {
            return Some(delay);
        }
        let jitter_factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Some(delay.mul_f64(jitter_factor))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive reconnects so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts > 0 && self.attempt >= self.max_attempts
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
