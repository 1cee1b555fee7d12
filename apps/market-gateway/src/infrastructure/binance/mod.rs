//! Binance Exchange Adapters
//!
//! Implements the two channels the gateway fronts:
//!
//! - **REST**: rate-budgeted request/response calls (JSON over HTTPS)
//! - **Stream**: the websocket ticker session with subscription replay
//!
//! plus the shared wire types, the stream codec and the normalization
//! layer that turns either channel's payloads into canonical objects.

pub mod adapter;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;
pub mod unifier;

pub use adapter::BinanceMarketAdapter;
pub use codec::{CodecError, StreamCodec, StreamFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatState};
pub use messages::{
    CommandAck, ExchangeErrorBody, KlineRow, RawPayload, RestDepth, RestTicker, StreamErrorFrame,
    StreamRequest, TickerEvent, ticker_stream,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{DEPTH_BUCKETS, MAX_KLINE_LIMIT, RestChannel, RestEndpoint, depth_bucket};
pub use stream::{SessionState, StreamSessionManager, TickerSubscription};
pub use unifier::{DataUnifier, Normalized, RejectReason};
