//! Data Normalization Layer
//!
//! Converts raw channel payloads into the canonical model with a quality
//! grade. Field names are remapped from the wire schemas, prices and
//! quantities are parsed into exact [`Decimal`]s (never floats), and
//! timestamps are normalized from exchange epoch milliseconds to UTC.
//!
//! Every payload comes out one of three ways:
//!
//! - **High**: structurally valid, fresh, from a healthy channel.
//! - **Degraded**: structurally valid but stale, soft-invariant flagged,
//!   or produced by a channel currently in a degraded state.
//! - **Reject** ([`RejectReason`]): missing required fields, unparsable
//!   numerics, a bad timestamp, or a hard invariant violation. Rejected
//!   payloads are never delivered; the caller logs them and counts them
//!   as channel failures.
//!
//! Staleness grading applies to tickers only. Candle timestamps are
//! historical by construction and orderbook snapshots are stamped at
//! receive time, so neither carries a meaningful wall-clock age here.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use super::messages::{KlineRow, RawPayload, RestDepth, RestTicker, TickerEvent};
use crate::domain::health::ChannelState;
use crate::domain::market::{
    CanonicalCandle, CanonicalOrderbook, CanonicalTicker, ChannelKind, Confidence,
    IntegrityViolation, OrderbookLevel, Symbol, Timeframe,
};
use crate::errors::GatewayError;

// =============================================================================
// Reject Reasons
// =============================================================================

/// Why a raw payload was refused normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// A required field is absent from the payload.
    #[error("required field '{0}' missing")]
    MissingField(&'static str),

    /// A numeric field could not be parsed as an exact decimal.
    #[error("unparsable numeric field '{field}': '{value}'")]
    UnparsableDecimal {
        /// Wire name of the offending field.
        field: &'static str,
        /// Raw value as received.
        value: String,
    },

    /// An epoch-millisecond timestamp is non-positive or unrepresentable.
    #[error("timestamp {0} outside representable range")]
    BadTimestamp(i64),

    /// A hard canonical invariant is violated.
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    /// The payload names a different symbol than the request.
    #[error("payload symbol '{actual}' does not match requested '{expected}'")]
    SymbolMismatch {
        /// Symbol the caller asked for.
        expected: Symbol,
        /// Symbol the payload carries.
        actual: String,
    },

    /// The payload's symbol is not a valid symbol at all.
    #[error("payload carries invalid symbol '{0}'")]
    InvalidSymbol(String),
}

impl RejectReason {
    /// Stable metric label for this rejection class.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::UnparsableDecimal { .. } => "unparsable_decimal",
            Self::BadTimestamp(_) => "bad_timestamp",
            Self::Integrity(_) => "integrity",
            Self::SymbolMismatch { .. } => "symbol_mismatch",
            Self::InvalidSymbol(_) => "invalid_symbol",
        }
    }

    /// Convert into the unified error taxonomy.
    ///
    /// Hard invariant violations become [`GatewayError::DataIntegrity`];
    /// every other rejection is a malformed payload and becomes
    /// [`GatewayError::Protocol`].
    #[must_use]
    pub fn into_error(self, channel: ChannelKind) -> GatewayError {
        match self {
            Self::Integrity(violation) => GatewayError::DataIntegrity { channel, violation },
            other => GatewayError::Protocol {
                channel,
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Normalized Output
// =============================================================================

/// A payload successfully normalized into the canonical model.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A 24h ticker.
    Ticker(CanonicalTicker),
    /// Candles sorted ascending by open time (newest last).
    Candles(Vec<CanonicalCandle>),
    /// An orderbook snapshot.
    Orderbook(CanonicalOrderbook),
}

// =============================================================================
// Unifier
// =============================================================================

/// Converts raw channel payloads into canonical objects.
///
/// Stateless apart from the ticker freshness threshold; safe to share
/// across channels.
#[derive(Debug, Clone, Copy)]
pub struct DataUnifier {
    ticker_freshness: Duration,
}

impl DataUnifier {
    /// Create a unifier with the given ticker freshness threshold.
    ///
    /// A structurally valid ticker older than the threshold is graded
    /// [`Confidence::Degraded`] instead of rejected.
    #[must_use]
    pub const fn new(ticker_freshness: Duration) -> Self {
        Self { ticker_freshness }
    }

    /// Normalize a raw payload into a canonical object with a quality
    /// grade.
    ///
    /// `source_state` is the producing channel's health state at the time
    /// the payload arrived; anything other than [`ChannelState::Healthy`]
    /// downgrades the grade. For tickers the embedded confidence field
    /// always matches the returned grade.
    ///
    /// # Errors
    ///
    /// Returns a [`RejectReason`] when the payload is structurally
    /// unusable or violates a hard invariant. Callers must not deliver
    /// anything from a rejected payload.
    pub fn normalize(
        &self,
        payload: &RawPayload,
        source_state: ChannelState,
    ) -> Result<(Normalized, Confidence), RejectReason> {
        match payload {
            RawPayload::StreamTicker(event) => {
                let mut ticker = normalize_stream_ticker(event)?;
                let confidence = self.grade_ticker(&ticker, source_state);
                ticker.confidence = confidence;
                Ok((Normalized::Ticker(ticker), confidence))
            }
            RawPayload::RestTicker { requested, payload } => {
                let mut ticker = normalize_rest_ticker(requested, payload)?;
                let confidence = self.grade_ticker(&ticker, source_state);
                ticker.confidence = confidence;
                Ok((Normalized::Ticker(ticker), confidence))
            }
            RawPayload::RestCandles {
                symbol,
                timeframe,
                rows,
            } => {
                let candles = normalize_candles(symbol, *timeframe, rows)?;
                Ok((Normalized::Candles(candles), grade_channel(source_state)))
            }
            RawPayload::RestOrderbook { symbol, payload } => {
                let book = normalize_orderbook(symbol, payload)?;
                Ok((Normalized::Orderbook(book), grade_channel(source_state)))
            }
        }
    }

    /// Grade a normalized ticker: channel state, soft price-range
    /// invariant, and wall-clock staleness all downgrade.
    fn grade_ticker(&self, ticker: &CanonicalTicker, source_state: ChannelState) -> Confidence {
        let mut confidence = grade_channel(source_state);
        if !ticker.price_within_range() {
            confidence = confidence.worst(Confidence::Degraded);
        }
        let age = Utc::now().signed_duration_since(ticker.timestamp);
        if age.to_std().is_ok_and(|a| a > self.ticker_freshness) {
            confidence = confidence.worst(Confidence::Degraded);
        }
        confidence
    }
}

const fn grade_channel(source_state: ChannelState) -> Confidence {
    match source_state {
        ChannelState::Healthy => Confidence::High,
        ChannelState::Degraded | ChannelState::CircuitOpen => Confidence::Degraded,
    }
}

// =============================================================================
// Ticker Normalization
// =============================================================================

fn normalize_stream_ticker(event: &TickerEvent) -> Result<CanonicalTicker, RejectReason> {
    let symbol = Symbol::parse(&event.symbol)
        .map_err(|_| RejectReason::InvalidSymbol(event.symbol.clone()))?;
    Ok(CanonicalTicker {
        symbol,
        price: non_negative(require_decimal("c", event.last_price.as_deref())?)?,
        change_abs: require_decimal("p", event.price_change.as_deref())?,
        change_pct: require_decimal("P", event.price_change_pct.as_deref())?,
        high_24h: non_negative(require_decimal("h", event.high_price.as_deref())?)?,
        low_24h: non_negative(require_decimal("l", event.low_price.as_deref())?)?,
        volume_24h: non_negative(require_decimal("v", event.volume.as_deref())?)?,
        timestamp: timestamp_from_millis(event.event_time)?,
        source: ChannelKind::Stream,
        confidence: Confidence::High,
    })
}

fn normalize_rest_ticker(
    requested: &Symbol,
    payload: &RestTicker,
) -> Result<CanonicalTicker, RejectReason> {
    let symbol = Symbol::parse(&payload.symbol)
        .map_err(|_| RejectReason::InvalidSymbol(payload.symbol.clone()))?;
    if symbol != *requested {
        return Err(RejectReason::SymbolMismatch {
            expected: requested.clone(),
            actual: payload.symbol.clone(),
        });
    }
    Ok(CanonicalTicker {
        symbol,
        price: non_negative(require_decimal("lastPrice", payload.last_price.as_deref())?)?,
        change_abs: require_decimal("priceChange", payload.price_change.as_deref())?,
        change_pct: require_decimal("priceChangePercent", payload.price_change_pct.as_deref())?,
        high_24h: non_negative(require_decimal("highPrice", payload.high_price.as_deref())?)?,
        low_24h: non_negative(require_decimal("lowPrice", payload.low_price.as_deref())?)?,
        volume_24h: non_negative(require_decimal("volume", payload.volume.as_deref())?)?,
        timestamp: timestamp_from_millis(payload.close_time)?,
        source: ChannelKind::Rest,
        confidence: Confidence::High,
    })
}

// =============================================================================
// Candle Normalization
// =============================================================================

/// Normalize kline rows, sorted ascending by open time (newest last).
///
/// One malformed row rejects the whole payload; a partially usable
/// candle series would silently misrepresent history.
fn normalize_candles(
    symbol: &Symbol,
    timeframe: Timeframe,
    rows: &[KlineRow],
) -> Result<Vec<CanonicalCandle>, RejectReason> {
    let mut candles: Vec<CanonicalCandle> = rows
        .iter()
        .map(|row| normalize_candle(symbol, timeframe, row))
        .collect::<Result<_, _>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn normalize_candle(
    symbol: &Symbol,
    timeframe: Timeframe,
    row: &KlineRow,
) -> Result<CanonicalCandle, RejectReason> {
    let open_time = row.first().ok_or(RejectReason::MissingField("openTime"))?;
    let millis = open_time
        .as_i64()
        .ok_or_else(|| RejectReason::UnparsableDecimal {
            field: "openTime",
            value: open_time.to_string(),
        })?;
    let candle = CanonicalCandle {
        symbol: symbol.clone(),
        timeframe,
        open: kline_decimal(row, 1, "open")?,
        high: kline_decimal(row, 2, "high")?,
        low: kline_decimal(row, 3, "low")?,
        close: kline_decimal(row, 4, "close")?,
        volume: kline_decimal(row, 5, "volume")?,
        timestamp: timestamp_from_millis(millis)?,
    };
    candle.validate()?;
    Ok(candle)
}

fn kline_decimal(
    row: &KlineRow,
    index: usize,
    field: &'static str,
) -> Result<Decimal, RejectReason> {
    let value = row.get(index).ok_or(RejectReason::MissingField(field))?;
    let raw = value.as_str().ok_or_else(|| RejectReason::UnparsableDecimal {
        field,
        value: value.to_string(),
    })?;
    parse_decimal(field, raw)
}

// =============================================================================
// Orderbook Normalization
// =============================================================================

fn normalize_orderbook(
    symbol: &Symbol,
    payload: &RestDepth,
) -> Result<CanonicalOrderbook, RejectReason> {
    let book = CanonicalOrderbook {
        symbol: symbol.clone(),
        asks: parse_levels(&payload.asks, "ask price", "ask quantity")?,
        bids: parse_levels(&payload.bids, "bid price", "bid quantity")?,
        // Depth snapshots carry a sequence number, not a clock.
        timestamp: Utc::now(),
    };
    book.validate()?;
    Ok(book)
}

fn parse_levels(
    levels: &[(String, String)],
    price_field: &'static str,
    qty_field: &'static str,
) -> Result<Vec<OrderbookLevel>, RejectReason> {
    levels
        .iter()
        .map(|(price, quantity)| {
            Ok(OrderbookLevel {
                price: parse_decimal(price_field, price)?,
                quantity: parse_decimal(qty_field, quantity)?,
            })
        })
        .collect()
}

// =============================================================================
// Field Helpers
// =============================================================================

fn require_decimal(field: &'static str, value: Option<&str>) -> Result<Decimal, RejectReason> {
    let raw = value.ok_or(RejectReason::MissingField(field))?;
    parse_decimal(field, raw)
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, RejectReason> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| RejectReason::UnparsableDecimal {
            field,
            value: raw.to_string(),
        })
}

fn non_negative(value: Decimal) -> Result<Decimal, RejectReason> {
    if value < Decimal::ZERO {
        return Err(RejectReason::Integrity(
            IntegrityViolation::NegativeQuantity { value },
        ));
    }
    Ok(value)
}

fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>, RejectReason> {
    if millis <= 0 {
        return Err(RejectReason::BadTimestamp(millis));
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(RejectReason::BadTimestamp(millis))
}
