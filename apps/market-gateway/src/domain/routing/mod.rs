//! Routing Types
//!
//! Request classification and the channel decisions produced by the
//! router. The static suitability table lives here: it encodes which
//! channels can serve a request kind at all, before any health or latency
//! considerations apply.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::market::ChannelKind;

/// The shape of a caller request, as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// One-shot current ticker lookup.
    Ticker {
        /// Caller bias toward the streaming channel when both are viable.
        prefer_realtime: bool,
    },
    /// Historical candle backfill.
    Candles,
    /// Orderbook depth snapshot.
    Orderbook,
    /// Continuous ticker subscription.
    TickerStream,
}

impl RequestKind {
    /// Short snake_case name for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker { .. } => "ticker",
            Self::Candles => "candles",
            Self::Orderbook => "orderbook",
            Self::TickerStream => "ticker_stream",
        }
    }

    /// Channels that can serve this request kind at all.
    ///
    /// Candle backfills and depth snapshots are request/response shapes
    /// the stream does not replay; subscriptions only exist on the
    /// stream. Single-ticker lookups can come from either side.
    #[must_use]
    pub const fn static_candidates(self) -> &'static [ChannelKind] {
        match self {
            Self::Ticker { .. } => &[ChannelKind::Rest, ChannelKind::Stream],
            Self::Candles | Self::Orderbook => &[ChannelKind::Rest],
            Self::TickerStream => &[ChannelKind::Stream],
        }
    }

    /// Caller channel bias, applied when both candidates survive the
    /// health gate.
    ///
    /// Only an explicit realtime preference creates a bias; without one
    /// the live latency tie-break picks the channel.
    #[must_use]
    pub const fn preferred(self) -> Option<ChannelKind> {
        match self {
            Self::Ticker {
                prefer_realtime: true,
            } => Some(ChannelKind::Stream),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The router's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDecision {
    /// Channel to attempt first.
    pub primary: ChannelKind,
    /// Remaining viable channel for transparent fallback, if any.
    pub alternate: Option<ChannelKind>,
}

impl ChannelDecision {
    /// Decision with a single viable channel.
    #[must_use]
    pub const fn only(primary: ChannelKind) -> Self {
        Self {
            primary,
            alternate: None,
        }
    }

    /// Decision with a fallback channel.
    #[must_use]
    pub const fn with_alternate(primary: ChannelKind, alternate: ChannelKind) -> Self {
        Self {
            primary,
            alternate: Some(alternate),
        }
    }
}
