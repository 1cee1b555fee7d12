//! Canonical Market Data Model
//!
//! The single normalized representation of market data returned to all
//! callers, independent of the channel that produced it. Prices and
//! quantities are exact decimals, timestamps are UTC, and every object
//! carries enough provenance (source channel, confidence) for callers to
//! reason about data quality without seeing channel payloads.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Violation of a hard canonical invariant.
///
/// Objects carrying one of these are never delivered to callers; the
/// offending payload is logged and counted as a channel failure instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    /// Best bid is at or above best ask.
    #[error("crossed orderbook: best bid {bid} >= best ask {ask}")]
    CrossedBook {
        /// Best bid price.
        bid: Decimal,
        /// Best ask price.
        ask: Decimal,
    },

    /// Ask levels are not strictly ascending or bid levels not strictly
    /// descending.
    #[error("orderbook levels out of order on the {side} side")]
    UnsortedBook {
        /// Offending side, "bid" or "ask".
        side: &'static str,
    },

    /// Candle open or close falls outside the low..=high range.
    #[error("candle range violated: low {low}, high {high}, open {open}, close {close}")]
    CandleRange {
        /// Candle low.
        low: Decimal,
        /// Candle high.
        high: Decimal,
        /// Candle open.
        open: Decimal,
        /// Candle close.
        close: Decimal,
    },

    /// A volume or quantity is negative.
    #[error("negative quantity: {value}")]
    NegativeQuantity {
        /// The offending value.
        value: Decimal,
    },
}

/// Rejection of a caller-supplied symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,

    /// Symbol exceeds the maximum accepted length.
    #[error("symbol '{0}' exceeds maximum length")]
    TooLong(String),

    /// Symbol contains characters outside A-Z and 0-9.
    #[error("symbol '{0}' contains invalid characters")]
    InvalidCharacters(String),
}

// =============================================================================
// Symbol
// =============================================================================

/// Maximum accepted symbol length.
const MAX_SYMBOL_LEN: usize = 20;

/// A trading pair symbol, normalized to uppercase (e.g. "BTCUSDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a caller-supplied symbol.
    ///
    /// Input is trimmed and uppercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty, too long, or contains
    /// characters outside A-Z / 0-9.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, SymbolError> {
        let normalized = value.as_ref().trim().to_uppercase();
        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(normalized));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacters(normalized));
        }
        Ok(Self(normalized))
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in wire stream names.
    #[must_use]
    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }

    /// Consume and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a set of caller-supplied symbols, rejecting the whole set on the
/// first invalid entry.
///
/// # Errors
///
/// Returns the first [`SymbolError`] encountered.
pub fn parse_symbols<I, S>(symbols: I) -> Result<BTreeSet<Symbol>, SymbolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    symbols.into_iter().map(Symbol::parse).collect()
}

// =============================================================================
// Channel and Data Kinds
// =============================================================================

/// One of the two independent communication paths to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Rate-limited HTTP request/response channel.
    Rest,
    /// Persistent WebSocket streaming channel.
    Stream,
}

impl ChannelKind {
    /// Short lowercase name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Stream => "stream",
        }
    }

    /// The other channel, if any alternate exists.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Rest => Self::Stream,
            Self::Stream => Self::Rest,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of market data carried by a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 24h rolling ticker.
    Ticker,
    /// OHLCV candles.
    Candles,
    /// Orderbook depth snapshot.
    Orderbook,
}

impl DataType {
    /// Short lowercase name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Candles => "candles",
            Self::Orderbook => "orderbook",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle timeframe supported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// One minute.
    M1,
    /// Five minutes.
    M5,
    /// Fifteen minutes.
    M15,
    /// Thirty minutes.
    M30,
    /// One hour.
    H1,
    /// Four hours.
    H4,
    /// One day.
    D1,
}

impl Timeframe {
    /// Exchange interval string (e.g. "1m", "4h").
    #[must_use]
    pub const fn interval(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Timeframe duration in seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interval())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

// =============================================================================
// Confidence
// =============================================================================

/// Quality grade attached to delivered data.
///
/// Rejected payloads never materialize as canonical objects, so delivered
/// data is either high confidence or explicitly degraded (stale, served
/// from a fallback channel in a degraded state, or violating a soft
/// invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Fresh data from a healthy channel with all invariants intact.
    High,
    /// Structurally valid but stale, soft-invariant flagged, or produced
    /// by a degraded channel.
    Degraded,
}

impl Confidence {
    /// Short lowercase name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Degraded => "degraded",
        }
    }

    /// Combine two grades, keeping the worse one.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::High, Self::High) => Self::High,
            _ => Self::Degraded,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Canonical Ticker
// =============================================================================

/// Normalized 24h rolling ticker for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTicker {
    /// Trading pair symbol.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: Decimal,
    /// Absolute price change over the trailing 24h.
    pub change_abs: Decimal,
    /// Percentage price change over the trailing 24h.
    pub change_pct: Decimal,
    /// Highest traded price over the trailing 24h.
    pub high_24h: Decimal,
    /// Lowest traded price over the trailing 24h.
    pub low_24h: Decimal,
    /// Base-asset volume over the trailing 24h.
    pub volume_24h: Decimal,
    /// Event time, normalized to UTC.
    pub timestamp: DateTime<Utc>,
    /// Channel that produced this object.
    pub source: ChannelKind,
    /// Quality grade.
    pub confidence: Confidence,
}

impl CanonicalTicker {
    /// Whether the last price sits inside the reported 24h range.
    ///
    /// This is a soft invariant: exchanges violate it momentarily around
    /// range updates, so a breach downgrades confidence instead of
    /// rejecting the payload.
    #[must_use]
    pub fn price_within_range(&self) -> bool {
        self.low_24h <= self.price && self.price <= self.high_24h
    }
}

// =============================================================================
// Canonical Candle
// =============================================================================

/// Normalized OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCandle {
    /// Trading pair symbol.
    pub symbol: Symbol,
    /// Candle timeframe.
    pub timeframe: Timeframe,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base-asset volume.
    pub volume: Decimal,
    /// Candle open time, normalized to UTC.
    pub timestamp: DateTime<Utc>,
}

impl CanonicalCandle {
    /// Check the hard candle invariants.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityViolation`] if open or close fall outside
    /// `low..=high`, or if the volume is negative.
    pub fn validate(&self) -> Result<(), IntegrityViolation> {
        if self.volume < Decimal::ZERO {
            return Err(IntegrityViolation::NegativeQuantity {
                value: self.volume,
            });
        }
        let in_range = |p: Decimal| self.low <= p && p <= self.high;
        if !in_range(self.open) || !in_range(self.close) {
            return Err(IntegrityViolation::CandleRange {
                low: self.low,
                high: self.high,
                open: self.open,
                close: self.close,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Canonical Orderbook
// =============================================================================

/// One price level of an orderbook side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    /// Level price.
    pub price: Decimal,
    /// Quantity resting at this price.
    pub quantity: Decimal,
}

/// Normalized orderbook depth snapshot.
///
/// Asks are ordered by ascending price, bids by descending price, so the
/// first element of each side is the best level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrderbook {
    /// Trading pair symbol.
    pub symbol: Symbol,
    /// Ask levels, price ascending.
    pub asks: Vec<OrderbookLevel>,
    /// Bid levels, price descending.
    pub bids: Vec<OrderbookLevel>,
    /// Snapshot time, normalized to UTC.
    pub timestamp: DateTime<Utc>,
}

impl CanonicalOrderbook {
    /// Best (highest) bid price, if any bids exist.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best (lowest) ask price, if any asks exist.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Check the hard orderbook invariants: both sides sorted, all
    /// quantities non-negative, and the book not crossed.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityViolation`] describing the first violation
    /// found.
    pub fn validate(&self) -> Result<(), IntegrityViolation> {
        for level in self.asks.iter().chain(self.bids.iter()) {
            if level.quantity < Decimal::ZERO {
                return Err(IntegrityViolation::NegativeQuantity {
                    value: level.quantity,
                });
            }
        }
        if !self.asks.windows(2).all(|w| w[0].price < w[1].price) {
            return Err(IntegrityViolation::UnsortedBook { side: "ask" });
        }
        if !self.bids.windows(2).all(|w| w[0].price > w[1].price) {
            return Err(IntegrityViolation::UnsortedBook { side: "bid" });
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask())
            && bid >= ask
        {
            return Err(IntegrityViolation::CrossedBook { bid, ask });
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
