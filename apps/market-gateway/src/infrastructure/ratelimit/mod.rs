//! Proactive Rate Budget
//!
//! Token bucket with continuous refill, consulted before every REST
//! call. When the budget is empty the call fails fast with the time
//! until headroom returns; this layer never sleeps on the caller's
//! behalf.
//!
//! The bucket runs on [`tokio::time::Instant`] so tests drive it with
//! the paused clock instead of wall-time sleeps.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use market_gateway::infrastructure::ratelimit::RateBudget;
//!
//! let budget = RateBudget::new(10, Duration::from_secs(60));
//! assert!(budget.try_acquire(1).is_ok());
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Continuously refilling request budget shared by REST callers.
///
/// Costs are expressed in exchange request weight, so heavyweight
/// endpoints drain the budget faster than cheap ones.
#[derive(Debug)]
pub struct RateBudget {
    capacity: f64,
    refill_per_sec: f64,
    inner: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    updated_at: Instant,
    /// Hard hold imposed after an upstream rate-limit response.
    held_until: Option<Instant>,
}

impl RateBudget {
    /// Creates a budget allowing `max_weight` units per `window`,
    /// starting full.
    #[must_use]
    pub fn new(max_weight: u32, window: Duration) -> Self {
        let capacity = f64::from(max_weight.max(1));
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec: capacity / window_secs,
            inner: Mutex::new(BucketState {
                tokens: capacity,
                updated_at: Instant::now(),
                held_until: None,
            }),
        }
    }

    /// Consumes `cost` units if available.
    ///
    /// On rejection returns the estimated wait until the acquisition
    /// would succeed. Costs above capacity are clamped so the estimate
    /// stays finite.
    pub fn try_acquire(&self, cost: u32) -> Result<(), Duration> {
        let now = Instant::now();
        let cost = f64::from(cost).min(self.capacity);
        let mut state = self.inner.lock();

        if let Some(held_until) = state.held_until {
            if now < held_until {
                return Err(held_until - now);
            }
            state.held_until = None;
        }

        self.refill(&mut state, now);

        if state.tokens >= cost {
            state.tokens -= cost;
            return Ok(());
        }

        let deficit = cost - state.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }

    /// Empties the bucket in response to an upstream rate-limit
    /// rejection, optionally holding all acquisitions until the
    /// advertised retry time.
    pub fn drain(&self, hold: Option<Duration>) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.tokens = 0.0;
        state.updated_at = now;
        if let Some(hold) = hold {
            let held_until = now + hold;
            state.held_until = Some(
                state
                    .held_until
                    .map_or(held_until, |existing| existing.max(held_until)),
            );
        }
    }

    /// Whole units currently available, for health snapshots.
    #[must_use]
    pub fn available(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.inner.lock();
        if state.held_until.is_some_and(|until| now < until) {
            return 0;
        }
        self.refill(&mut state, now);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            state.tokens.floor() as u32
        }
    }

    /// Budget capacity in weight units.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.updated_at);
        state.tokens = refilled_tokens(
            state.tokens,
            self.capacity,
            self.refill_per_sec,
            elapsed.as_secs_f64(),
        );
        state.updated_at = now;
    }
}

/// Pure refill step shared by the bucket and its property tests.
fn refilled_tokens(tokens: f64, capacity: f64, refill_per_sec: f64, elapsed_secs: f64) -> f64 {
    refill_per_sec
        .mul_add(elapsed_secs, tokens)
        .min(capacity)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_full_bucket_serves_up_to_capacity() {
        let budget = RateBudget::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(budget.try_acquire(1).is_ok());
        }
        assert!(budget.try_acquire(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_reports_time_until_headroom() {
        let budget = RateBudget::new(60, Duration::from_secs(60));
        assert!(budget.try_acquire(60).is_ok());

        // Refill rate is one unit per second, so a weight-2 call needs
        // two seconds of headroom.
        let wait = budget.try_acquire(2).unwrap_err();
        assert!(wait > Duration::from_millis(1900), "wait was {wait:?}");
        assert!(wait <= Duration::from_secs(2), "wait was {wait:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_refill_continuously() {
        let budget = RateBudget::new(60, Duration::from_secs(60));
        assert!(budget.try_acquire(60).is_ok());
        assert!(budget.try_acquire(1).is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(budget.try_acquire(3).is_ok());
        assert!(budget.try_acquire(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empties_the_bucket() {
        let budget = RateBudget::new(100, Duration::from_secs(60));
        budget.drain(None);

        assert_eq!(budget.available(), 0);
        assert!(budget.try_acquire(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_hold_blocks_until_retry_time() {
        let budget = RateBudget::new(100, Duration::from_secs(60));
        budget.drain(Some(Duration::from_secs(30)));

        // Normal refill would allow a cheap call well before the hold
        // expires; the hold must win.
        tokio::time::advance(Duration::from_secs(10)).await;
        let wait = budget.try_acquire(1).unwrap_err();
        assert_eq!(wait, Duration::from_secs(20));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(budget.try_acquire(1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_cost_is_clamped_to_capacity() {
        let budget = RateBudget::new(10, Duration::from_secs(10));
        assert!(budget.try_acquire(50).is_ok());
        assert!(budget.try_acquire(1).is_err());
    }

    proptest! {
        #[test]
        fn prop_refill_never_exceeds_capacity(
            tokens in 0.0f64..5000.0,
            capacity in 1.0f64..5000.0,
            rate in 0.01f64..1000.0,
            elapsed in 0.0f64..86_400.0,
        ) {
            let tokens = tokens.min(capacity);
            let refilled = refilled_tokens(tokens, capacity, rate, elapsed);
            prop_assert!(refilled <= capacity);
            prop_assert!(refilled >= tokens);
        }

        #[test]
        fn prop_refill_is_monotone_in_elapsed_time(
            tokens in 0.0f64..100.0,
            rate in 0.01f64..100.0,
            shorter in 0.0f64..3600.0,
            extra in 0.0f64..3600.0,
        ) {
            let capacity = 100.0;
            let tokens = tokens.min(capacity);
            let a = refilled_tokens(tokens, capacity, rate, shorter);
            let b = refilled_tokens(tokens, capacity, rate, shorter + extra);
            prop_assert!(b >= a);
        }
    }
}
