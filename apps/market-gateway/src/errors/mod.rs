//! Unified Error Taxonomy
//!
//! Every failure surfaced by the gateway is one of the [`GatewayError`]
//! kinds below; callers never see channel-specific error codes or payload
//! shapes. Channel failures are stringified at the mapping boundary
//! ([`unify`]) so the error stays `Clone` and can be broadcast to
//! coalesced callers.

use std::time::Duration;

use thiserror::Error;

use crate::domain::market::{ChannelKind, IntegrityViolation};

pub mod unify;

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Connection or timeout failure. Retried internally with bounded
    /// backoff before surfacing.
    #[error("transient network failure on {channel} channel: {message}")]
    TransientNetwork {
        /// Originating channel.
        channel: ChannelKind,
        /// Human-readable failure description.
        message: String,
    },

    /// The proactive budget was empty or the exchange rejected the call
    /// with a rate-limit status. Surfaced immediately, never silently
    /// retried by this layer.
    #[error("rate limit exceeded on {channel} channel")]
    RateLimitExceeded {
        /// Originating channel.
        channel: ChannelKind,
        /// Estimated wait until the budget allows another call.
        retry_after: Option<Duration>,
    },

    /// Authentication rejected. Requires external credential action, so
    /// it is never retried.
    #[error("authentication failed on {channel} channel: {message}")]
    Auth {
        /// Originating channel.
        channel: ChannelKind,
        /// Human-readable failure description.
        message: String,
    },

    /// Well-formed transport, unexpected payload shape. The raw payload
    /// is logged at the detection site.
    #[error("protocol violation on {channel} channel: {message}")]
    Protocol {
        /// Originating channel.
        channel: ChannelKind,
        /// Human-readable failure description.
        message: String,
    },

    /// A canonical invariant was violated. The offending data is never
    /// delivered.
    #[error("data integrity violation on {channel} channel: {violation}")]
    DataIntegrity {
        /// Originating channel.
        channel: ChannelKind,
        /// The violated invariant.
        violation: IntegrityViolation,
    },

    /// Caller error. Surfaced immediately, never retried.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// No healthy channel can serve the request; failing fast instead of
    /// attempting a call that is known to be doomed.
    #[error("no available channel for {request} request: {reason}")]
    ChannelUnavailable {
        /// Request kind that could not be routed.
        request: &'static str,
        /// Why every candidate was excluded.
        reason: String,
    },

    /// The facade has been shut down.
    #[error("gateway is shut down")]
    Shutdown,
}

impl GatewayError {
    /// The channel this failure originated on, if any.
    #[must_use]
    pub const fn channel(&self) -> Option<ChannelKind> {
        match self {
            Self::TransientNetwork { channel, .. }
            | Self::RateLimitExceeded { channel, .. }
            | Self::Auth { channel, .. }
            | Self::Protocol { channel, .. }
            | Self::DataIntegrity { channel, .. } => Some(*channel),
            Self::InvalidRequest { .. } | Self::ChannelUnavailable { .. } | Self::Shutdown => None,
        }
    }

    /// Whether the facade may transparently retry this failure on an
    /// alternate channel.
    ///
    /// Rate-limit rejections are deliberately excluded: they surface
    /// immediately so the caller decides whether to wait.
    #[must_use]
    pub const fn retryable_on_alternate(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. }
                | Self::Protocol { .. }
                | Self::DataIntegrity { .. }
        )
    }

    /// Short kind name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork { .. } => "transient_network",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Auth { .. } => "auth",
            Self::Protocol { .. } => "protocol",
            Self::DataIntegrity { .. } => "data_integrity",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::ChannelUnavailable { .. } => "channel_unavailable",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_eligibility_matches_taxonomy() {
        let transient = GatewayError::TransientNetwork {
            channel: ChannelKind::Rest,
            message: "connection reset".into(),
        };
        let rate_limited = GatewayError::RateLimitExceeded {
            channel: ChannelKind::Rest,
            retry_after: Some(Duration::from_secs(1)),
        };
        let invalid = GatewayError::InvalidRequest {
            message: "count too large".into(),
        };

        assert!(transient.retryable_on_alternate());
        assert!(!rate_limited.retryable_on_alternate());
        assert!(!invalid.retryable_on_alternate());
    }

    #[test]
    fn test_channel_attribution() {
        let auth = GatewayError::Auth {
            channel: ChannelKind::Stream,
            message: "bad key".into(),
        };
        assert_eq!(auth.channel(), Some(ChannelKind::Stream));
        assert_eq!(GatewayError::Shutdown.channel(), None);
    }

    #[test]
    fn test_display_never_leaks_wire_shapes() {
        let err = GatewayError::Protocol {
            channel: ChannelKind::Rest,
            message: "missing field `lastPrice`".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("protocol violation on rest channel"));
    }
}
