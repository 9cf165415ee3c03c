//! Reconnect delay calculation: exponential growth from an initial delay,
//! randomized by a symmetric jitter fraction, capped at a maximum.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    /// Fraction (0.0..=1.0) of the computed delay that may be added or removed.
    jitter: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
            config.jitter,
        )
    }
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Fixed delay with no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0, 0.0)
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before reconnect attempt `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        if !factor.is_finite() {
            return self.max;
        }
        let millis = self.initial.as_millis() as f64 * factor;
        if millis >= self.max.as_millis() as f64 {
            self.max
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), jittered and capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        self.apply_jitter(base).min(self.max)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let range_ms = (delay.as_millis() as f64 * self.jitter) as u64;
        if range_ms == 0 {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = Duration::from_millis(rng.gen_range(0..=range_ms));
        if rng.gen_bool(0.5) {
            delay.saturating_add(jitter)
        } else {
            delay.saturating_sub(jitter)
        }
    }
}
