//! Channel Health Telemetry
//!
//! Per-channel rolling latency and outcome windows with a derived state
//! used by the router to gate channel selection.
//!
//! # Design
//!
//! Each channel owns exactly one [`ChannelHealth`] and is the only writer;
//! the router reads derived values (state, error rate, average latency)
//! from atomics that are refreshed on every mutation, so routing decisions
//! never contend on the window lock. Slightly stale reads are acceptable
//! because the router re-evaluates on every decision.
//!
//! The circuit breaker follows the half-open probe pattern: once opened,
//! the channel is excluded for a cool-down period, then a single trial
//! request is admitted. Success closes the circuit and clears the windows;
//! failure reopens it and grows the cool-down by a capped multiplier.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::market::ChannelKind;

/// Minimum outcome samples before an error rate can mark a channel
/// degraded. Keeps a single early failure from flagging a fresh channel.
const MIN_RATE_SAMPLES: usize = 5;

// =============================================================================
// State
// =============================================================================

/// Derived health state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Error rate below the degraded threshold.
    Healthy,
    /// Error rate elevated but the circuit is still closed; the channel
    /// is used but data from it is flagged.
    Degraded,
    /// Circuit open: excluded from new requests until a half-open probe
    /// succeeds.
    CircuitOpen,
}

impl ChannelState {
    /// Short snake_case name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::CircuitOpen => "circuit_open",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::CircuitOpen => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Degraded,
            2 => Self::CircuitOpen,
            _ => Self::Healthy,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds governing state derivation and circuit breaking.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Number of latency samples kept in the rolling window.
    pub latency_window: usize,
    /// Number of call outcomes kept in the rolling window.
    pub outcome_window: usize,
    /// Rolling error rate at which the channel is flagged degraded.
    pub degraded_error_rate: f64,
    /// Rolling error rate (over a full window) that opens the circuit.
    pub open_error_rate: f64,
    /// Consecutive failures that open the circuit regardless of rate.
    pub circuit_failure_threshold: u32,
    /// Cool-down before the first half-open probe.
    pub cooldown_initial: Duration,
    /// Upper bound for the cool-down as it backs off.
    pub cooldown_max: Duration,
    /// Cool-down growth factor applied on every reopen.
    pub cooldown_multiplier: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            latency_window: 32,
            outcome_window: 20,
            degraded_error_rate: 0.3,
            open_error_rate: 0.6,
            circuit_failure_threshold: 10,
            cooldown_initial: Duration::from_secs(5),
            cooldown_max: Duration::from_secs(60),
            cooldown_multiplier: 2.0,
        }
    }
}

// =============================================================================
// Channel Health
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct HealthInner {
    latencies: VecDeque<Duration>,
    latency_sum: Duration,
    outcomes: VecDeque<bool>,
    failure_count: usize,
    consecutive_failures: u32,
    phase: CircuitPhase,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

/// Health telemetry for a single channel.
///
/// Mutated only by the owning channel via [`record_success`] and
/// [`record_failure`]; read by the router via the cached accessors.
///
/// [`record_success`]: ChannelHealth::record_success
/// [`record_failure`]: ChannelHealth::record_failure
#[derive(Debug)]
pub struct ChannelHealth {
    channel: ChannelKind,
    config: HealthConfig,
    inner: Mutex<HealthInner>,
    cached_state: AtomicU8,
    cached_error_rate_bp: AtomicU32,
    cached_avg_latency_us: AtomicU64,
}

impl ChannelHealth {
    /// Create health telemetry for a channel.
    #[must_use]
    pub fn new(channel: ChannelKind, config: HealthConfig) -> Self {
        let cooldown = config.cooldown_initial;
        Self {
            channel,
            config,
            inner: Mutex::new(HealthInner {
                latencies: VecDeque::new(),
                latency_sum: Duration::ZERO,
                outcomes: VecDeque::new(),
                failure_count: 0,
                consecutive_failures: 0,
                phase: CircuitPhase::Closed,
                opened_at: None,
                cooldown,
            }),
            cached_state: AtomicU8::new(ChannelState::Healthy.to_u8()),
            cached_error_rate_bp: AtomicU32::new(0),
            cached_avg_latency_us: AtomicU64::new(0),
        }
    }

    /// The channel this telemetry belongs to.
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Record a successful call and its latency.
    ///
    /// A success while half-open closes the circuit and clears the rolling
    /// windows so the recovered channel starts from a clean slate.
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;

        if inner.phase == CircuitPhase::HalfOpen {
            inner.phase = CircuitPhase::Closed;
            inner.opened_at = None;
            inner.cooldown = self.config.cooldown_initial;
            inner.outcomes.clear();
            inner.failure_count = 0;
            inner.latencies.clear();
            inner.latency_sum = Duration::ZERO;
            tracing::info!(channel = %self.channel, "circuit closed after successful probe");
        }

        self.push_latency(&mut inner, latency);
        self.push_outcome(&mut inner, true);
        self.refresh_cache(&inner);
    }

    /// Record a failed call.
    ///
    /// `latency` is included when the attempt consumed measurable time
    /// (e.g. a timed-out request); pass `None` for failures that never
    /// left the process.
    pub fn record_failure(&self, latency: Option<Duration>) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if let Some(latency) = latency {
            self.push_latency(&mut inner, latency);
        }
        self.push_outcome(&mut inner, false);

        match inner.phase {
            CircuitPhase::HalfOpen => {
                // Failed probe: reopen and back off the cool-down.
                inner.phase = CircuitPhase::Open;
                inner.opened_at = Some(Instant::now());
                inner.cooldown = grow_cooldown(
                    inner.cooldown,
                    self.config.cooldown_multiplier,
                    self.config.cooldown_max,
                );
                tracing::warn!(
                    channel = %self.channel,
                    cooldown_ms = inner.cooldown.as_millis(),
                    "probe failed, circuit reopened"
                );
            }
            CircuitPhase::Closed => {
                let consecutive_tripped =
                    inner.consecutive_failures >= self.config.circuit_failure_threshold;
                let window_full = inner.outcomes.len() >= self.config.outcome_window;
                let rate_tripped =
                    window_full && error_rate_of(&inner) >= self.config.open_error_rate;
                if consecutive_tripped || rate_tripped {
                    inner.phase = CircuitPhase::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        channel = %self.channel,
                        consecutive_failures = inner.consecutive_failures,
                        error_rate = error_rate_of(&inner),
                        cooldown_ms = inner.cooldown.as_millis(),
                        "circuit opened"
                    );
                }
            }
            CircuitPhase::Open => {}
        }

        self.refresh_cache(&inner);
    }

    /// Gate a request against the circuit breaker.
    ///
    /// Returns `true` for a closed circuit, and exactly once per cool-down
    /// expiry while open (the half-open probe). All other requests while
    /// open or half-open are rejected without touching the wire.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::HalfOpen => false,
            CircuitPhase::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= inner.cooldown {
                    inner.phase = CircuitPhase::HalfOpen;
                    self.refresh_cache(&inner);
                    tracing::info!(channel = %self.channel, "admitting half-open probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Derived state, read from the mutation-time cache.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.cached_state.load(Ordering::Relaxed))
    }

    /// Rolling error rate in `0.0..=1.0`, read from the cache.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        f64::from(self.cached_error_rate_bp.load(Ordering::Relaxed)) / 10_000.0
    }

    /// Rolling average latency, read from the cache.
    ///
    /// Returns `None` until at least one sample has been recorded.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        match self.cached_avg_latency_us.load(Ordering::Relaxed) {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    /// Point-in-time snapshot for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> ChannelHealthSnapshot {
        let inner = self.inner.lock();
        ChannelHealthSnapshot {
            channel: self.channel,
            state: self.derive_state(&inner),
            error_rate: error_rate_of(&inner),
            average_latency_ms: average_latency_of(&inner)
                .map(|d| d.as_secs_f64() * 1_000.0),
            consecutive_failures: inner.consecutive_failures,
            samples: inner.outcomes.len(),
        }
    }

    fn push_latency(&self, inner: &mut HealthInner, latency: Duration) {
        inner.latencies.push_back(latency);
        inner.latency_sum += latency;
        while inner.latencies.len() > self.config.latency_window {
            if let Some(evicted) = inner.latencies.pop_front() {
                inner.latency_sum = inner.latency_sum.saturating_sub(evicted);
            }
        }
    }

    fn push_outcome(&self, inner: &mut HealthInner, success: bool) {
        inner.outcomes.push_back(success);
        if !success {
            inner.failure_count += 1;
        }
        while inner.outcomes.len() > self.config.outcome_window {
            if let Some(evicted) = inner.outcomes.pop_front()
                && !evicted
            {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
        }
    }

    fn derive_state(&self, inner: &HealthInner) -> ChannelState {
        match inner.phase {
            CircuitPhase::Open | CircuitPhase::HalfOpen => ChannelState::CircuitOpen,
            CircuitPhase::Closed => {
                if inner.outcomes.len() >= MIN_RATE_SAMPLES
                    && error_rate_of(inner) >= self.config.degraded_error_rate
                {
                    ChannelState::Degraded
                } else {
                    ChannelState::Healthy
                }
            }
        }
    }

    fn refresh_cache(&self, inner: &HealthInner) {
        let state = self.derive_state(inner);
        self.cached_state.store(state.to_u8(), Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        self.cached_error_rate_bp
            .store((error_rate_of(inner) * 10_000.0) as u32, Ordering::Relaxed);
        let avg_us = average_latency_of(inner)
            .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX));
        self.cached_avg_latency_us.store(avg_us, Ordering::Relaxed);
    }
}

#[allow(clippy::cast_precision_loss)]
fn error_rate_of(inner: &HealthInner) -> f64 {
    if inner.outcomes.is_empty() {
        0.0
    } else {
        inner.failure_count as f64 / inner.outcomes.len() as f64
    }
}

fn average_latency_of(inner: &HealthInner) -> Option<Duration> {
    if inner.latencies.is_empty() {
        None
    } else {
        Some(inner.latency_sum / u32::try_from(inner.latencies.len()).unwrap_or(u32::MAX))
    }
}

fn grow_cooldown(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let grown = current.mul_f64(multiplier);
    grown.min(max)
}

// =============================================================================
// Snapshot
// =============================================================================

/// Read-only view of one channel's health for `health_snapshot()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelHealthSnapshot {
    /// Channel this snapshot describes.
    pub channel: ChannelKind,
    /// Derived state at snapshot time.
    pub state: ChannelState,
    /// Rolling error rate in `0.0..=1.0`.
    pub error_rate: f64,
    /// Rolling average latency in milliseconds, if any samples exist.
    pub average_latency_ms: Option<f64>,
    /// Current consecutive-failure count.
    pub consecutive_failures: u32,
    /// Number of outcomes in the rolling window.
    pub samples: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> HealthConfig {
        HealthConfig {
            cooldown_initial: Duration::from_millis(10),
            cooldown_max: Duration::from_millis(80),
            ..HealthConfig::default()
        }
    }

    fn health() -> ChannelHealth {
        ChannelHealth::new(ChannelKind::Rest, fast_config())
    }

    #[test]
    fn test_fresh_channel_is_healthy() {
        let health = health();
        assert_eq!(health.state(), ChannelState::Healthy);
        assert_eq!(health.error_rate(), 0.0);
        assert!(health.average_latency().is_none());
        assert!(health.allow_request());
    }

    #[test]
    fn test_average_latency_tracks_window() {
        let health = health();
        health.record_success(Duration::from_millis(10));
        health.record_success(Duration::from_millis(30));
        assert_eq!(health.average_latency(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_elevated_error_rate_marks_degraded() {
        let health = health();
        for _ in 0..6 {
            health.record_success(Duration::from_millis(5));
        }
        for _ in 0..4 {
            health.record_failure(None);
        }
        // 4 failures over 10 outcomes = 40% >= 30% degraded threshold.
        assert_eq!(health.state(), ChannelState::Degraded);
        assert!(health.allow_request());
    }

    #[test]
    fn test_consecutive_failures_open_circuit() {
        let health = health();
        for _ in 0..9 {
            health.record_failure(None);
        }
        assert_ne!(health.state(), ChannelState::CircuitOpen);
        health.record_failure(None);
        assert_eq!(health.state(), ChannelState::CircuitOpen);
        assert!(!health.allow_request());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let health = health();
        for _ in 0..9 {
            health.record_failure(None);
        }
        health.record_success(Duration::from_millis(5));
        for _ in 0..9 {
            health.record_failure(None);
        }
        assert_ne!(health.state(), ChannelState::CircuitOpen);
    }

    #[test]
    fn test_full_window_error_rate_opens_circuit() {
        let health = health();
        // Alternate so consecutive failures never reach the threshold,
        // but the full-window error rate does: 14/20 = 70% >= 60%.
        for _ in 0..7 {
            health.record_failure(None);
            health.record_failure(None);
            health.record_success(Duration::from_millis(5));
        }
        assert_eq!(health.state(), ChannelState::CircuitOpen);
    }

    #[test]
    fn test_probe_admitted_after_cooldown() {
        let health = health();
        for _ in 0..10 {
            health.record_failure(None);
        }
        assert!(!health.allow_request());

        std::thread::sleep(Duration::from_millis(15));
        assert!(health.allow_request());
        // Only a single probe until its outcome is recorded.
        assert!(!health.allow_request());
    }

    #[test]
    fn test_successful_probe_closes_circuit() {
        let health = health();
        for _ in 0..10 {
            health.record_failure(None);
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(health.allow_request());

        health.record_success(Duration::from_millis(5));
        assert_eq!(health.state(), ChannelState::Healthy);
        assert!(health.allow_request());
    }

    #[test]
    fn test_failed_probe_reopens_with_longer_cooldown() {
        let health = health();
        for _ in 0..10 {
            health.record_failure(None);
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(health.allow_request());

        health.record_failure(None);
        assert_eq!(health.state(), ChannelState::CircuitOpen);

        // The original cool-down has elapsed but the grown one has not.
        std::thread::sleep(Duration::from_millis(15));
        assert!(!health.allow_request());
        std::thread::sleep(Duration::from_millis(15));
        assert!(health.allow_request());
    }

    #[test]
    fn test_cooldown_growth_is_capped() {
        assert_eq!(
            grow_cooldown(
                Duration::from_millis(60),
                2.0,
                Duration::from_millis(80)
            ),
            Duration::from_millis(80)
        );
    }

    #[test]
    fn test_snapshot_reports_window_contents() {
        let health = health();
        health.record_success(Duration::from_millis(10));
        health.record_failure(None);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.channel, ChannelKind::Rest);
        assert_eq!(snapshot.samples, 2);
        assert!((snapshot.error_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[test]
    fn test_outcome_window_evicts_old_failures() {
        let health = ChannelHealth::new(
            ChannelKind::Rest,
            HealthConfig {
                outcome_window: 4,
                ..fast_config()
            },
        );
        health.record_failure(None);
        health.record_failure(None);
        for _ in 0..4 {
            health.record_success(Duration::from_millis(5));
        }
        // Both failures have been evicted from the window.
        assert_eq!(health.error_rate(), 0.0);
    }
}
