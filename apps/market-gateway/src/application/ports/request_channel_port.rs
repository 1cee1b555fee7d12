//! Request Channel Port (Driven Port)
//!
//! Abstracts a request/response market-data channel so the facade and
//! router can be exercised against scripted implementations in tests.
//! The production implementation is the Binance REST adapter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::health::ChannelHealth;
use crate::domain::market::{
    CanonicalCandle, CanonicalOrderbook, CanonicalTicker, Confidence, DataType, Symbol, Timeframe,
};
use crate::domain::routing::RequestKind;
use crate::errors::GatewayResult;

// =============================================================================
// Request / Payload DTOs
// =============================================================================

/// A validated one-shot market-data request.
///
/// Construction happens in the facade after symbol parsing and bounds
/// checks, so a value of this type is always dispatchable. It doubles as
/// the key for request coalescing and the short-TTL cache, which is why
/// the realtime preference is part of the ticker variant: requests that
/// may route differently must never share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketRequest {
    /// Current 24h ticker for one symbol.
    Ticker {
        /// Trading pair symbol.
        symbol: Symbol,
        /// Bias routing toward the streaming channel when viable.
        prefer_realtime: bool,
    },
    /// Historical candles, newest last.
    Candles {
        /// Trading pair symbol.
        symbol: Symbol,
        /// Candle timeframe.
        timeframe: Timeframe,
        /// Number of candles, already validated against the page limit.
        count: u32,
    },
    /// Orderbook depth snapshot.
    Orderbook {
        /// Trading pair symbol.
        symbol: Symbol,
        /// Levels per side, already validated against the depth limit.
        depth: u32,
    },
}

impl MarketRequest {
    /// Routing classification for this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Ticker {
                prefer_realtime, ..
            } => RequestKind::Ticker {
                prefer_realtime: *prefer_realtime,
            },
            Self::Candles { .. } => RequestKind::Candles,
            Self::Orderbook { .. } => RequestKind::Orderbook,
        }
    }

    /// The symbol this request is about.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Ticker { symbol, .. }
            | Self::Candles { symbol, .. }
            | Self::Orderbook { symbol, .. } => symbol,
        }
    }
}

/// Canonical payload answering a [`MarketRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum MarketPayload {
    /// A 24h ticker.
    Ticker(CanonicalTicker),
    /// Candles sorted ascending by open time (newest last).
    Candles(Vec<CanonicalCandle>),
    /// An orderbook snapshot.
    Orderbook(CanonicalOrderbook),
}

impl MarketPayload {
    /// The kind of data carried.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Ticker(_) => DataType::Ticker,
            Self::Candles(_) => DataType::Candles,
            Self::Orderbook(_) => DataType::Orderbook,
        }
    }
}

// =============================================================================
// Port Trait
// =============================================================================

/// Driven port for a one-shot market-data channel.
#[async_trait]
pub trait RequestChannelPort: Send + Sync {
    /// Execute one request and return the canonical payload with its
    /// quality grade.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::errors::GatewayError`] already translated into
    /// the unified taxonomy; callers never see transport-level types.
    async fn fetch(&self, request: &MarketRequest) -> GatewayResult<(MarketPayload, Confidence)>;

    /// Health telemetry handle for this channel.
    fn health(&self) -> Arc<ChannelHealth>;

    /// Largest candle count a single request may ask for.
    fn max_candles(&self) -> u32;

    /// Largest orderbook depth a single request may ask for.
    fn max_depth(&self) -> u32;
}
