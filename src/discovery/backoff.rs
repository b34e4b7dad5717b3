//! Bounded exponential reconnect delay.

use crate::config::{RECONNECT_INITIAL_MS, RECONNECT_MAX_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: RECONNECT_INITIAL_MS,
            max_ms: RECONNECT_MAX_MS,
        }
    }
}

/// Doubles on every failure, capped at `max_ms`; reset on success.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    config: BackoffConfig,
    current_ms: u64,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current_ms: config.initial_ms,
        }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> u64 {
        let delay = self.current_ms.min(self.config.max_ms);
        self.current_ms = delay.saturating_mul(2).min(self.config.max_ms).max(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
    }
}
