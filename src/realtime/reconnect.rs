//! Reconnect policy for the push channel.
//!
//! Exponential backoff with jitter, capped at a maximum delay, optionally
//! giving up after a number of consecutive failed attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap for the exponential growth.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Relative random spread applied to each delay, in `[0, 1]`.
    pub jitter: f64,
    /// Consecutive failures after which the channel stops reconnecting.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
            max_attempts: settings.max_attempts,
        }
    }

    /// Retry forever every `delay`, no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based), without
    /// jitter: `initial_delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// [`Self::base_delay`] spread by up to `jitter` in either direction,
    /// never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let millis = (base.as_millis() as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Whether reconnect attempt number `attempt` (1-based) may happen.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectSettings::default())
    }
}
