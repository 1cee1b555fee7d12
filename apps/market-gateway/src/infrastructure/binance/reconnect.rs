//! Reconnection Backoff Policy
//!
//! Exponential backoff with full jitter for websocket reconnection.
//! The deterministic envelope grows by a configurable multiplier per
//! attempt up to a cap; the actual delay is drawn uniformly from
//! `0..=envelope`, which spreads simultaneous reconnecting clients
//! instead of synchronizing them into thundering herds.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Envelope for the first attempt.
    pub initial_delay: Duration,
    /// Hard cap on the envelope.
    pub max_delay: Duration,
    /// Envelope growth factor per attempt (>= 1.0).
    pub multiplier: f64,
    /// Attempt limit; 0 means retry forever.
    pub max_attempts: u32,
}

impl From<&StreamSettings> for ReconnectConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Stateful backoff tracker for one connection.
///
/// Call [`next_delay`](Self::next_delay) before each reconnection
/// attempt and [`reset`](Self::reset) once a connection is established.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    envelope: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy starting at the initial envelope.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let envelope = config.initial_delay;
        Self {
            config,
            envelope,
            attempts: 0,
        }
    }

    /// Draw the delay for the next attempt, or `None` when the attempt
    /// limit is exhausted.
    ///
    /// The delay is sampled uniformly from `0..=envelope`; the envelope
    /// then grows by the multiplier, capped at the configured maximum.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let envelope_ms = u64::try_from(self.envelope.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(rand::rng().random_range(0..=envelope_ms));

        let grown = self.envelope.as_secs_f64() * self.config.multiplier;
        self.envelope = Duration::from_secs_f64(grown).min(self.config.max_delay);

        Some(delay)
    }

    /// Attempts drawn since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Restore the initial envelope after a successful connection.
    pub const fn reset(&mut self) {
        self.envelope = self.config.initial_delay;
        self.attempts = 0;
    }
}
