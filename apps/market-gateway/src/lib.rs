#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Gateway - Unified Exchange Data Access
//!
//! A unified market-data access layer over Binance's two channels: the
//! rate-limited REST API and the websocket ticker stream. Consumers ask
//! for data; the gateway decides which channel answers, normalizes every
//! payload into one canonical model, and degrades predictably when a
//! channel misbehaves instead of queueing or silently retrying.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: exchange-independent rules
//!   - `market`: symbols, timeframes, canonical data objects
//!   - `health`: per-channel telemetry and the circuit breaker
//!   - `routing`: request kinds and static channel suitability
//!   - `subscription`: the registry reconnects replay from
//!
//! - **Application**: orchestration over the ports
//!   - `ports`: the request-channel interface adapters implement
//!   - `router`: health-aware channel selection per request
//!   - `facade`: coalescing, caching, fallback and shutdown
//!
//! - **Infrastructure**: adapters touching the outside world
//!   - `binance`: REST channel, websocket session, normalization
//!   - `ratelimit`: the proactive token-bucket budget
//!   - `config`, `telemetry`, `metrics`: process wiring
//!
//! # Data Flow
//!
//! ```text
//! get_ticker ────┐                            ┌──► RestChannel ────► REST API
//!                │    ┌──────────────────┐    │
//! get_candles ───┼───►│ MarketDataFacade │────┤
//! get_orderbook ─┤    │  + ChannelRouter │    │
//!                │    └──────────────────┘    └──► StreamSession ──► WebSocket
//! stream_ticker ─┘                                      │
//!                        subscription queues ◄── fan-out┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - exchange-independent market rules.
pub mod domain;

/// Application layer - routing, coalescing and the public facade.
pub mod application;

/// Error taxonomy and the channel-error unifier.
pub mod errors;

/// Infrastructure layer - exchange adapters and process wiring.
pub mod infrastructure;

use std::sync::Arc;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::health::{ChannelHealth, ChannelHealthSnapshot, ChannelState, HealthConfig};
pub use domain::market::{
    CanonicalCandle, CanonicalOrderbook, CanonicalTicker, ChannelKind, Confidence, DataType,
    OrderbookLevel, Symbol, Timeframe,
};

// Application surface
pub use application::{
    GatewayHealthSnapshot, MarketDataFacade, MarketPayload, MarketRequest, RequestChannelPort,
};

// Errors
pub use errors::{GatewayError, GatewayResult};

// Infrastructure (for the binary and integration tests)
pub use infrastructure::binance::{
    BinanceMarketAdapter, DataUnifier, SessionState, StreamSessionManager, TickerSubscription,
};
pub use infrastructure::config::{ConfigError, GatewayConfig};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::ratelimit::RateBudget;
pub use infrastructure::telemetry;

// =============================================================================
// Composition Root
// =============================================================================

/// The facade concretized over the Binance REST adapter.
pub type BinanceGateway = MarketDataFacade<BinanceMarketAdapter>;

/// Wire the full gateway object graph from configuration.
///
/// Both channels share nothing except the configuration; each gets its
/// own health tracker so one channel's failures never shade the other.
///
/// # Errors
///
/// Fails when the REST HTTP client cannot be constructed.
pub fn build_gateway(config: &GatewayConfig) -> anyhow::Result<Arc<BinanceGateway>> {
    let budget = Arc::new(RateBudget::new(
        config.rate_limit.max_weight,
        config.rate_limit.window,
    ));
    let rest_health = Arc::new(ChannelHealth::new(ChannelKind::Rest, config.health.clone()));
    let stream_health = Arc::new(ChannelHealth::new(
        ChannelKind::Stream,
        config.health.clone(),
    ));

    let channel = infrastructure::binance::RestChannel::new(config, budget, rest_health)?;
    let unifier = DataUnifier::new(config.stream.fresh_tick_max_age);
    let adapter = Arc::new(BinanceMarketAdapter::new(channel, unifier));
    let stream = StreamSessionManager::new(config.stream.clone(), stream_health);

    Ok(Arc::new(MarketDataFacade::new(
        adapter,
        stream,
        config.facade.clone(),
    )))
}
