//! Channel selection for one-shot requests.
//!
//! Routing is a pure read over channel health: static suitability first,
//! then the circuit-breaker gate, then a live-performance tie-break when
//! more than one channel remains. The decision is re-evaluated on every
//! request, so a channel that recovers or speeds up wins traffic back
//! without any explicit rebalancing step.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::health::ChannelHealth;
use crate::domain::market::ChannelKind;
use crate::domain::routing::{ChannelDecision, RequestKind};
use crate::errors::{GatewayError, GatewayResult};

// =============================================================================
// Channel Router
// =============================================================================

/// Picks the channel(s) to serve a request, per current health.
pub struct ChannelRouter {
    rest: Arc<ChannelHealth>,
    stream: Arc<ChannelHealth>,
}

impl ChannelRouter {
    /// Create a router over the two channel health trackers.
    #[must_use]
    pub const fn new(rest: Arc<ChannelHealth>, stream: Arc<ChannelHealth>) -> Self {
        Self { rest, stream }
    }

    /// Decide which channel serves a request of the given kind.
    ///
    /// `stream_can_serve` reports whether the streaming channel holds a
    /// servable cached tick for the requested symbol; it only matters for
    /// one-shot ticker requests, the sole kind both channels can answer.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ChannelUnavailable`] when every statically
    /// suitable channel is excluded, with the exclusion reasons joined in
    /// the message. Callers fail fast instead of queueing.
    pub fn select_channel(
        &self,
        kind: RequestKind,
        stream_can_serve: bool,
    ) -> GatewayResult<ChannelDecision> {
        let needs_cached_tick = matches!(kind, RequestKind::Ticker { .. });
        let mut viable: Vec<ChannelKind> = Vec::with_capacity(2);
        let mut excluded: Vec<String> = Vec::new();

        for &candidate in kind.static_candidates() {
            if candidate == ChannelKind::Stream && needs_cached_tick && !stream_can_serve {
                excluded.push(format!("{candidate}: no servable cached tick"));
                continue;
            }
            if !self.health_of(candidate).allow_request() {
                excluded.push(format!("{candidate}: circuit open"));
                continue;
            }
            viable.push(candidate);
        }

        let decision = match viable.as_slice() {
            [] => {
                let reason = if excluded.is_empty() {
                    "no statically suitable channel".to_string()
                } else {
                    excluded.join(", ")
                };
                return Err(GatewayError::ChannelUnavailable {
                    request: kind.as_str(),
                    reason,
                });
            }
            [only] => ChannelDecision::only(*only),
            [first, second, ..] => {
                let primary = self.pick_primary(kind, *first, *second);
                ChannelDecision::with_alternate(primary, primary.other())
            }
        };

        tracing::debug!(
            request = %kind,
            primary = %decision.primary,
            alternate = ?decision.alternate.map(ChannelKind::as_str),
            "channel selected"
        );
        Ok(decision)
    }

    /// Order two viable channels: explicit preference first, then lower
    /// rolling-average latency.
    fn pick_primary(
        &self,
        kind: RequestKind,
        first: ChannelKind,
        second: ChannelKind,
    ) -> ChannelKind {
        if let Some(preferred) = kind.preferred()
            && (preferred == first || preferred == second)
        {
            return preferred;
        }

        // Live-performance tie-break. An unsampled channel is treated as
        // fastest so a fresh channel gets traffic.
        let latency_of = |channel: ChannelKind| {
            self.health_of(channel)
                .average_latency()
                .unwrap_or(Duration::ZERO)
        };
        if latency_of(second) < latency_of(first) {
            second
        } else {
            first
        }
    }

    const fn health_of(&self, channel: ChannelKind) -> &Arc<ChannelHealth> {
        match channel {
            ChannelKind::Rest => &self.rest,
            ChannelKind::Stream => &self.stream,
        }
    }
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("rest", &self.rest.state())
            .field("stream", &self.stream.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
