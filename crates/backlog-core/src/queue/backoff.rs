//! Exponential retry backoff with jitter

use rand::Rng;

use crate::config::QueueConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exhausted_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for BackoffPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            exhausted_delay_ms: config.exhausted_delay_ms,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^(attempts-1), max)` without jitter
    pub fn base_delay(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(63);
        let factor = 1_u64 << exponent;
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Delay before the next attempt, jitter drawn from the thread RNG
    pub fn delay(&self, attempts: u32, max_attempts: u32) -> u64 {
        let fraction = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_jitter(attempts, max_attempts, fraction)
    }

    /// Delay before the next attempt with jitter at `fraction` of its bound
    ///
    /// Exhausted items get the fixed exhausted delay and no jitter.
    pub fn delay_with_jitter(&self, attempts: u32, max_attempts: u32, fraction: f64) -> u64 {
        if attempts >= max_attempts {
            return self.exhausted_delay_ms;
        }
        let delay = self.base_delay(attempts);
        delay.saturating_add(jitter_ms(delay, self.jitter_ratio * fraction.clamp(0.0, 1.0)))
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn jitter_ms(delay: u64, ratio: f64) -> u64 {
    (delay as f64 * ratio).floor() as u64
}
