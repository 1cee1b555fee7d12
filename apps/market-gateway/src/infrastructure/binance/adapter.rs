//! Binance REST adapter for the request-channel port.
//!
//! Maps validated requests onto typed REST endpoints, runs them through
//! the rate-budgeted channel, and normalizes the wire payload into the
//! canonical model. Payloads the unifier rejects are logged, counted as
//! channel failures and surfaced as errors; they never reach a caller
//! as data.

use std::sync::Arc;

use async_trait::async_trait;

use super::rest::{DEPTH_BUCKETS, MAX_KLINE_LIMIT, RestChannel, RestEndpoint, depth_bucket};
use super::unifier::{DataUnifier, Normalized};
use crate::application::ports::{MarketPayload, MarketRequest, RequestChannelPort};
use crate::domain::health::ChannelHealth;
use crate::domain::market::{CanonicalOrderbook, ChannelKind, Confidence};
use crate::errors::GatewayResult;
use crate::infrastructure::metrics;

/// REST-side implementation of [`RequestChannelPort`].
#[derive(Debug)]
pub struct BinanceMarketAdapter {
    channel: RestChannel,
    unifier: DataUnifier,
}

impl BinanceMarketAdapter {
    /// Wrap a REST channel and a payload unifier.
    #[must_use]
    pub const fn new(channel: RestChannel, unifier: DataUnifier) -> Self {
        Self { channel, unifier }
    }

    /// The endpoint serving a request, with depth rounded up to an
    /// exchange bucket.
    fn endpoint_for(request: &MarketRequest) -> RestEndpoint {
        match request {
            MarketRequest::Ticker { symbol, .. } => RestEndpoint::Ticker24h {
                symbol: symbol.clone(),
            },
            MarketRequest::Candles {
                symbol,
                timeframe,
                count,
            } => RestEndpoint::Klines {
                symbol: symbol.clone(),
                timeframe: *timeframe,
                limit: *count,
            },
            MarketRequest::Orderbook { symbol, depth } => RestEndpoint::Depth {
                symbol: symbol.clone(),
                limit: depth_bucket(*depth),
            },
        }
    }

    /// Count a rejected payload as a channel failure.
    fn record_reject(&self) {
        let health = self.channel.health();
        let before = health.state();
        health.record_failure(None);
        let after = health.state();
        if before != after {
            metrics::record_circuit_transition(ChannelKind::Rest, after);
        }
    }
}

/// Trim a snapshot fetched at bucket granularity back to the depth the
/// caller asked for.
#[allow(clippy::cast_possible_truncation)]
fn clip_depth(mut orderbook: CanonicalOrderbook, depth: u32) -> CanonicalOrderbook {
    orderbook.asks.truncate(depth as usize);
    orderbook.bids.truncate(depth as usize);
    orderbook
}

#[async_trait]
impl RequestChannelPort for BinanceMarketAdapter {
    async fn fetch(&self, request: &MarketRequest) -> GatewayResult<(MarketPayload, Confidence)> {
        let endpoint = Self::endpoint_for(request);
        let raw = self.channel.call(&endpoint).await?;

        match self.unifier.normalize(&raw, self.channel.health().state()) {
            Ok((normalized, confidence)) => {
                let payload = match normalized {
                    Normalized::Ticker(ticker) => MarketPayload::Ticker(ticker),
                    Normalized::Candles(candles) => MarketPayload::Candles(candles),
                    Normalized::Orderbook(orderbook) => {
                        if let MarketRequest::Orderbook { depth, .. } = request {
                            MarketPayload::Orderbook(clip_depth(orderbook, *depth))
                        } else {
                            MarketPayload::Orderbook(orderbook)
                        }
                    }
                };
                Ok((payload, confidence))
            }
            Err(reject) => {
                metrics::record_rejected_payload(ChannelKind::Rest, reject.as_label());
                self.record_reject();
                tracing::warn!(reason = %reject, payload = ?raw, "rejected REST payload");
                Err(reject.into_error(ChannelKind::Rest))
            }
        }
    }

    fn health(&self) -> Arc<ChannelHealth> {
        self.channel.health()
    }

    fn max_candles(&self) -> u32 {
        MAX_KLINE_LIMIT
    }

    fn max_depth(&self) -> u32 {
        DEPTH_BUCKETS[DEPTH_BUCKETS.len() - 1]
    }
}
