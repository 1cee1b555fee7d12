//! Binance Wire Message Types
//!
//! Wire format types for the exchange's REST responses and websocket
//! stream frames. These map directly to Binance's JSON schemas.
//!
//! Price and quantity fields arrive as JSON strings and are kept as
//! strings here; decimal parsing and field-presence policy live in the
//! normalization layer, so a payload with a missing or malformed price
//! still deserializes and is rejected with full context downstream.
//!
//! # Message Types
//!
//! ## Stream (websocket)
//! - `TickerEvent`: 24h rolling ticker pushed per subscribed symbol
//! - `CommandAck`: acknowledgment of a SUBSCRIBE/UNSUBSCRIBE request
//! - `StreamErrorFrame`: error response to a malformed request
//!
//! ## REST
//! - `RestTicker`: 24h ticker statistics for one symbol
//! - `KlineRow`: one candlestick as a positional JSON array
//! - `RestDepth`: orderbook snapshot with bid/ask levels
//! - `ExchangeErrorBody`: error body (`{"code": .., "msg": ..}`)
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)
//! - [REST API](https://developers.binance.com/docs/binance-spot-api-docs/rest-api)

use serde::{Deserialize, Serialize};

use crate::domain::market::{ChannelKind, DataType, Symbol, Timeframe};

// =============================================================================
// Stream Names and Outbound Requests
// =============================================================================

/// Stream name for a symbol's 24h ticker feed (e.g. `btcusdt@ticker`).
#[must_use]
pub fn ticker_stream(symbol: &Symbol) -> String {
    format!("{}@ticker", symbol.to_lowercase())
}

/// Subscription management request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    /// Action: "SUBSCRIBE" or "UNSUBSCRIBE"
    pub method: &'static str,

    /// Stream names the request applies to
    pub params: Vec<String>,

    /// Request id echoed back in the acknowledgment
    pub id: u64,
}

impl StreamRequest {
    /// Create a subscribe request.
    #[must_use]
    pub const fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params,
            id,
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params,
            id,
        }
    }
}

// =============================================================================
// Inbound Stream Frames
// =============================================================================

/// 24h rolling ticker event pushed for a subscribed symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "24hrTicker",
///   "E": 1672515782136,
///   "s": "BTCUSDT",
///   "p": "250.00000000",
///   "P": "1.500",
///   "o": "16500.00000000",
///   "h": "16800.00000000",
///   "l": "16400.00000000",
///   "c": "16750.00000000",
///   "v": "12000.50000000",
///   "q": "200000000.00000000"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerEvent {
    /// Event type (always "24hrTicker")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time in epoch milliseconds
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Absolute price change over the window
    #[serde(rename = "p", default)]
    pub price_change: Option<String>,

    /// Percentage price change over the window
    #[serde(rename = "P", default)]
    pub price_change_pct: Option<String>,

    /// Open price at the start of the window
    #[serde(rename = "o", default)]
    pub open_price: Option<String>,

    /// Highest traded price in the window
    #[serde(rename = "h", default)]
    pub high_price: Option<String>,

    /// Lowest traded price in the window
    #[serde(rename = "l", default)]
    pub low_price: Option<String>,

    /// Last traded price
    #[serde(rename = "c", default)]
    pub last_price: Option<String>,

    /// Base-asset volume in the window
    #[serde(rename = "v", default)]
    pub volume: Option<String>,

    /// Quote-asset volume in the window
    #[serde(rename = "q", default)]
    pub quote_volume: Option<String>,
}

/// Acknowledgment of a subscription management request.
///
/// A `null` result signals success.
///
/// # Wire Format (JSON)
/// ```json
/// {"result": null, "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Result payload, `null` on success
    pub result: Option<serde_json::Value>,

    /// Id of the request being acknowledged
    pub id: u64,
}

/// Error response to a malformed subscription request.
///
/// # Wire Format (JSON)
/// ```json
/// {"error": {"code": 2, "msg": "Invalid request: ..."}, "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorFrame {
    /// Error code and message
    pub error: ExchangeErrorBody,

    /// Id of the offending request, if attributable
    #[serde(default)]
    pub id: Option<u64>,
}

// =============================================================================
// REST Payloads
// =============================================================================

/// 24h ticker statistics for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "symbol": "BTCUSDT",
///   "priceChange": "250.00000000",
///   "priceChangePercent": "1.500",
///   "lastPrice": "16750.00000000",
///   "highPrice": "16800.00000000",
///   "lowPrice": "16400.00000000",
///   "volume": "12000.50000000",
///   "closeTime": 1672515782136
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestTicker {
    /// Trading pair symbol
    pub symbol: String,

    /// Absolute price change over the window
    #[serde(rename = "priceChange", default)]
    pub price_change: Option<String>,

    /// Percentage price change over the window
    #[serde(rename = "priceChangePercent", default)]
    pub price_change_pct: Option<String>,

    /// Last traded price
    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<String>,

    /// Highest traded price in the window
    #[serde(rename = "highPrice", default)]
    pub high_price: Option<String>,

    /// Lowest traded price in the window
    #[serde(rename = "lowPrice", default)]
    pub low_price: Option<String>,

    /// Base-asset volume in the window
    #[serde(default)]
    pub volume: Option<String>,

    /// Window close time in epoch milliseconds
    #[serde(rename = "closeTime")]
    pub close_time: i64,
}

/// One candlestick row from the klines endpoint.
///
/// Klines arrive as positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices and volume string-encoded.
pub type KlineRow = Vec<serde_json::Value>;

/// Orderbook snapshot.
///
/// Levels arrive as `["price", "quantity"]` pairs, bids sorted best
/// (highest) first and asks sorted best (lowest) first.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "lastUpdateId": 1027024,
///   "bids": [["4.00000000", "431.00000000"]],
///   "asks": [["4.00000200", "12.00000000"]]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestDepth {
    /// Snapshot sequence number
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Bid levels, best first
    pub bids: Vec<(String, String)>,

    /// Ask levels, best first
    pub asks: Vec<(String, String)>,
}

/// Error body returned by the exchange on both channels.
///
/// # Wire Format (JSON)
/// ```json
/// {"code": -1121, "msg": "Invalid symbol."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeErrorBody {
    /// Exchange error code (negative)
    pub code: i64,

    /// Human-readable message
    pub msg: String,
}

// =============================================================================
// Raw Payload Union
// =============================================================================

/// Raw payload handed from a channel to the normalization layer.
///
/// The variant carries the source channel and data type implicitly,
/// plus whatever request context the wire payload itself lacks.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// 24h ticker from the REST channel.
    RestTicker {
        /// Symbol the caller asked for, checked against the payload.
        requested: Symbol,
        /// The wire payload.
        payload: RestTicker,
    },

    /// Candles from the REST channel.
    RestCandles {
        /// Symbol the rows belong to (the wire rows do not repeat it).
        symbol: Symbol,
        /// Timeframe the rows were requested at.
        timeframe: Timeframe,
        /// Raw kline rows.
        rows: Vec<KlineRow>,
    },

    /// Orderbook snapshot from the REST channel.
    RestOrderbook {
        /// Symbol the snapshot belongs to.
        symbol: Symbol,
        /// The wire payload.
        payload: RestDepth,
    },

    /// Ticker event from the stream channel.
    StreamTicker(TickerEvent),
}

impl RawPayload {
    /// Channel this payload came from.
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        match self {
            Self::RestTicker { .. } | Self::RestCandles { .. } | Self::RestOrderbook { .. } => {
                ChannelKind::Rest
            }
            Self::StreamTicker(_) => ChannelKind::Stream,
        }
    }

    /// Data type this payload carries.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::RestTicker { .. } | Self::StreamTicker(_) => DataType::Ticker,
            Self::RestCandles { .. } => DataType::Candles,
            Self::RestOrderbook { .. } => DataType::Orderbook,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_ticker_event() {
        let json = r#"{
            "e": "24hrTicker",
            "E": 1672515782136,
            "s": "BTCUSDT",
            "p": "250.00000000",
            "P": "1.500",
            "o": "16500.00000000",
            "h": "16800.00000000",
            "l": "16400.00000000",
            "c": "16750.00000000",
            "v": "12000.50000000",
            "q": "200000000.00000000"
        }"#;
        let event: TickerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, "24hrTicker");
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.last_price.as_deref(), Some("16750.00000000"));
        assert_eq!(event.event_time, 1_672_515_782_136);
    }

    #[test]
    fn test_ticker_event_with_missing_price_still_deserializes() {
        let json = r#"{"e":"24hrTicker","E":1672515782136,"s":"BTCUSDT","h":"1.0","l":"0.5"}"#;
        let event: TickerEvent = serde_json::from_str(json).unwrap();
        assert!(event.last_price.is_none());
        assert_eq!(event.high_price.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_deserialize_command_ack() {
        let json = r#"{"result":null,"id":7}"#;
        let ack: CommandAck = serde_json::from_str(json).unwrap();
        assert!(ack.result.is_none());
        assert_eq!(ack.id, 7);
    }

    #[test]
    fn test_deserialize_stream_error_frame() {
        let json = r#"{"error":{"code":2,"msg":"Invalid request: property 'params' missing"},"id":3}"#;
        let frame: StreamErrorFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.error.code, 2);
        assert_eq!(frame.id, Some(3));
    }

    #[test]
    fn test_deserialize_rest_ticker() {
        let json = r#"{
            "symbol": "ETHUSDT",
            "priceChange": "-50.00000000",
            "priceChangePercent": "-3.100",
            "lastPrice": "1550.00000000",
            "highPrice": "1620.00000000",
            "lowPrice": "1540.00000000",
            "volume": "98000.00000000",
            "closeTime": 1672515782136
        }"#;
        let ticker: RestTicker = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.symbol, "ETHUSDT");
        assert_eq!(ticker.last_price.as_deref(), Some("1550.00000000"));
        assert_eq!(ticker.price_change.as_deref(), Some("-50.00000000"));
    }

    #[test]
    fn test_deserialize_rest_depth_levels() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"], ["3.99000000", "9.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;
        let depth: RestDepth = serde_json::from_str(json).unwrap();
        assert_eq!(depth.last_update_id, 1_027_024);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.bids[0].0, "4.00000000");
        assert_eq!(depth.asks[0].1, "12.00000000");
    }

    #[test]
    fn test_deserialize_kline_rows() {
        let json = r#"[
            [1672502400000, "16500.0", "16600.0", "16450.0", "16550.0", "1200.5", 1672505999999, "0", 100, "0", "0", "0"],
            [1672506000000, "16550.0", "16800.0", "16500.0", "16750.0", "900.2", 1672509599999, "0", 80, "0", "0", "0"]
        ]"#;
        let rows: Vec<KlineRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1].as_str(), Some("16500.0"));
        assert_eq!(rows[1][0].as_i64(), Some(1_672_506_000_000));
    }

    #[test]
    fn test_serialize_subscribe_request() {
        let req = StreamRequest::subscribe(vec!["btcusdt@ticker".to_string()], 1);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""method":"SUBSCRIBE""#));
        assert!(json.contains(r#""params":["btcusdt@ticker"]"#));
        assert!(json.contains(r#""id":1"#));
    }

    #[test]
    fn test_ticker_stream_name_is_lowercase() {
        let symbol = Symbol::parse("BTCUSDT").unwrap();
        assert_eq!(ticker_stream(&symbol), "btcusdt@ticker");
    }

    #[test]
    fn test_raw_payload_channel_attribution() {
        let event: TickerEvent =
            serde_json::from_str(r#"{"e":"24hrTicker","E":1,"s":"BTCUSDT"}"#).unwrap();
        let payload = RawPayload::StreamTicker(event);
        assert_eq!(payload.channel(), ChannelKind::Stream);
        assert_eq!(payload.data_type(), DataType::Ticker);
    }
}
