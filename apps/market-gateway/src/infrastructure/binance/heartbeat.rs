//! Connection Liveness Tracking
//!
//! Tracks inbound activity on the websocket so the session loop can
//! detect silent half-open connections. Any inbound frame counts as
//! liveness, not just pongs; client pings exist only to provoke traffic
//! on an otherwise quiet connection.
//!
//! The state is shared between the reader (recording activity) and the
//! session loop (checking staleness on an interval), so it is internally
//! synchronized and methods take `&self`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::infrastructure::config::StreamSettings;

/// Liveness parameters.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Quiet period after which a client ping is sent.
    pub ping_interval: Duration,
    /// Quiet period after which the connection is considered dead.
    pub idle_timeout: Duration,
}

impl From<&StreamSettings> for HeartbeatConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            idle_timeout: settings.heartbeat_timeout,
        }
    }
}

/// Shared liveness state for one connection.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    awaiting_pong: AtomicBool,
}

impl HeartbeatState {
    /// Create state considering the connection live as of now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            awaiting_pong: AtomicBool::new(false),
        }
    }

    /// Record an inbound frame of any kind.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.awaiting_pong.store(false, Ordering::Release);
    }

    /// Record that a client ping went out and its reply is outstanding.
    pub fn mark_ping_sent(&self) {
        self.awaiting_pong.store(true, Ordering::Release);
    }

    /// Whether the quiet period warrants a client ping.
    ///
    /// Returns `false` while a ping is already outstanding.
    pub fn needs_ping(&self, ping_interval: Duration) -> bool {
        !self.awaiting_pong.load(Ordering::Acquire)
            && self.last_activity.read().elapsed() >= ping_interval
    }

    /// Whether the connection has been silent past the idle timeout.
    pub fn is_stale(&self, idle_timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > idle_timeout
    }

    /// Restart liveness tracking, e.g. after a reconnect.
    pub fn reset(&self) {
        *self.last_activity.write() = Instant::now();
        self.awaiting_pong.store(false, Ordering::Release);
    }
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fresh_state_is_not_stale() {
        let state = HeartbeatState::new();
        assert!(!state.is_stale(Duration::from_secs(60)));
        assert!(!state.needs_ping(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_interval_warrants_ping() {
        let state = HeartbeatState::new();
        advance(Duration::from_secs(31)).await;
        assert!(state.needs_ping(Duration::from_secs(30)));

        state.mark_ping_sent();
        assert!(!state.needs_ping(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_activity_clears_outstanding_ping() {
        let state = HeartbeatState::new();
        advance(Duration::from_secs(31)).await;
        state.mark_ping_sent();

        state.record_activity();
        assert!(!state.is_stale(Duration::from_secs(60)));
        advance(Duration::from_secs(31)).await;
        assert!(state.needs_ping(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_timeout_is_stale() {
        let state = HeartbeatState::new();
        advance(Duration::from_secs(61)).await;
        assert!(state.is_stale(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_liveness() {
        let state = HeartbeatState::new();
        advance(Duration::from_secs(120)).await;
        assert!(state.is_stale(Duration::from_secs(60)));

        state.reset();
        assert!(!state.is_stale(Duration::from_secs(60)));
    }
}
