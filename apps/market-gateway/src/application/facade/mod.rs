//! Unified Market Data Facade
//!
//! Single entry point for market-data consumers. The facade validates
//! input at the boundary, coalesces concurrent identical requests into
//! one underlying call, serves repeats from a short-TTL cache, routes
//! each request through the [`ChannelRouter`], and falls back to the
//! alternate channel when the primary fails with a retryable error.
//! Callers only ever see canonical domain objects and [`GatewayError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::application::ports::{MarketPayload, MarketRequest, RequestChannelPort};
use crate::application::router::ChannelRouter;
use crate::domain::health::ChannelHealthSnapshot;
use crate::domain::market::{
    CanonicalCandle, CanonicalOrderbook, CanonicalTicker, ChannelKind, Confidence, Symbol,
    Timeframe, parse_symbols,
};
use crate::domain::routing::RequestKind;
use crate::errors::{GatewayError, GatewayResult, unify};
use crate::infrastructure::binance::{SessionState, StreamSessionManager, TickerSubscription};
use crate::infrastructure::config::FacadeSettings;
use crate::infrastructure::metrics;

/// Outcome of one dispatched request, as shared with coalesced waiters.
type FetchResult = GatewayResult<(MarketPayload, Confidence)>;

// =============================================================================
// Health Snapshot
// =============================================================================

/// Point-in-time view of the whole gateway for `health_snapshot()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayHealthSnapshot {
    /// REST channel health.
    pub rest: ChannelHealthSnapshot,
    /// Streaming channel health.
    pub stream: ChannelHealthSnapshot,
    /// Streaming session lifecycle state.
    pub session: SessionState,
    /// Number of live ticker subscriptions.
    pub active_subscriptions: usize,
    /// Number of distinct streamed symbols.
    pub streamed_symbols: usize,
}

// =============================================================================
// Facade
// =============================================================================

/// One cached response with its storage time.
struct CacheEntry {
    payload: MarketPayload,
    confidence: Confidence,
    stored: Instant,
}

/// Unified access to exchange market data over both channels.
///
/// Generic over the request/response channel so tests can script
/// outcomes; the streaming side is held concretely because its cached
/// ticks and session lifecycle are part of routing itself.
pub struct MarketDataFacade<R: RequestChannelPort> {
    rest: Arc<R>,
    stream: Arc<StreamSessionManager>,
    router: ChannelRouter,
    settings: FacadeSettings,
    cache: Mutex<HashMap<MarketRequest, CacheEntry>>,
    inflight: Mutex<HashMap<MarketRequest, broadcast::Sender<FetchResult>>>,
    closed: AtomicBool,
}

impl<R: RequestChannelPort> MarketDataFacade<R> {
    /// Wire a facade over an already-constructed channel pair.
    #[must_use]
    pub fn new(rest: Arc<R>, stream: Arc<StreamSessionManager>, settings: FacadeSettings) -> Self {
        let router = ChannelRouter::new(rest.health(), stream.health());
        Self {
            rest,
            stream,
            router,
            settings,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Current 24h ticker for a symbol.
    ///
    /// With `prefer_realtime` set, routing biases toward the streaming
    /// channel's cached tick when one is servable; otherwise the faster
    /// healthy channel wins.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for a malformed symbol, or any
    /// channel error after routing and fallback are exhausted.
    pub async fn get_ticker(
        &self,
        symbol: &str,
        prefer_realtime: bool,
    ) -> GatewayResult<CanonicalTicker> {
        let symbol = Symbol::parse(symbol).map_err(|e| unify::symbol(&e))?;
        let request = MarketRequest::Ticker {
            symbol,
            prefer_realtime,
        };
        let (payload, _) = self.execute(request).await?;
        match payload {
            MarketPayload::Ticker(ticker) => Ok(ticker),
            other => Err(Self::mismatched(&other, "ticker")),
        }
    }

    /// Historical candles, oldest first and newest last.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for a malformed symbol or a
    /// `count` of zero or beyond the exchange page limit; otherwise any
    /// channel error.
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: u32,
    ) -> GatewayResult<Vec<CanonicalCandle>> {
        let symbol = Symbol::parse(symbol).map_err(|e| unify::symbol(&e))?;
        let max = self.rest.max_candles();
        if count == 0 || count > max {
            return Err(GatewayError::InvalidRequest {
                message: format!("candle count must be within 1..={max}, got {count}"),
            });
        }
        let request = MarketRequest::Candles {
            symbol,
            timeframe,
            count,
        };
        let (payload, _) = self.execute(request).await?;
        match payload {
            MarketPayload::Candles(candles) => Ok(candles),
            other => Err(Self::mismatched(&other, "candles")),
        }
    }

    /// Orderbook snapshot with up to `depth` levels per side.
    ///
    /// The wire request is rounded up to an exchange-supported bucket;
    /// the returned snapshot is trimmed back to `depth`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for a malformed symbol or a
    /// depth of zero or beyond the exchange limit; otherwise any channel
    /// error.
    pub async fn get_orderbook(
        &self,
        symbol: &str,
        depth: u32,
    ) -> GatewayResult<CanonicalOrderbook> {
        let symbol = Symbol::parse(symbol).map_err(|e| unify::symbol(&e))?;
        let max = self.rest.max_depth();
        if depth == 0 || depth > max {
            return Err(GatewayError::InvalidRequest {
                message: format!("orderbook depth must be within 1..={max}, got {depth}"),
            });
        }
        let request = MarketRequest::Orderbook { symbol, depth };
        let (payload, _) = self.execute(request).await?;
        match payload {
            MarketPayload::Orderbook(orderbook) => Ok(orderbook),
            other => Err(Self::mismatched(&other, "orderbook")),
        }
    }

    /// Open a continuous ticker subscription for a set of symbols.
    ///
    /// The returned handle yields ticks indefinitely and survives
    /// reconnects; dropping or cancelling it releases the symbols.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for an empty set or a malformed
    /// symbol, [`GatewayError::ChannelUnavailable`] while the streaming
    /// circuit is open, [`GatewayError::Shutdown`] after shutdown.
    pub fn stream_ticker<I, S>(&self, symbols: I) -> GatewayResult<TickerSubscription>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Shutdown);
        }
        let symbols = parse_symbols(symbols).map_err(|e| unify::symbol(&e))?;
        self.router.select_channel(RequestKind::TickerStream, false)?;
        self.stream.subscribe(symbols)
    }

    /// Current health of both channels and the streaming session.
    #[must_use]
    pub fn health_snapshot(&self) -> GatewayHealthSnapshot {
        GatewayHealthSnapshot {
            rest: self.rest.health().snapshot(),
            stream: self.stream.health().snapshot(),
            session: self.stream.session_state(),
            active_subscriptions: self.stream.subscription_count(),
            streamed_symbols: self.stream.symbol_count(),
        }
    }

    /// Shut the gateway down, bounded by the configured grace period.
    ///
    /// New requests fail with [`GatewayError::Shutdown`] immediately;
    /// coalesced waiters are released. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("gateway shutting down");

        if tokio::time::timeout(self.settings.shutdown_grace, self.stream.shutdown())
            .await
            .is_err()
        {
            tracing::warn!(
                grace = ?self.settings.shutdown_grace,
                "stream session did not close within the grace period"
            );
        }

        // Dropping the senders wakes every coalesced waiter, which then
        // observes the closed flag.
        self.inflight.lock().clear();
        self.cache.lock().clear();
        tracing::info!("gateway shutdown complete");
    }

    // =========================================================================
    // Request Pipeline
    // =========================================================================

    /// Run one request through cache, coalescing and dispatch.
    async fn execute(&self, request: MarketRequest) -> FetchResult {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(GatewayError::Shutdown);
            }
            if let Some(hit) = self.cache_lookup(&request) {
                metrics::record_cache_hit(request.kind().as_str());
                tracing::debug!(request = %request.kind(), "served from cache");
                return Ok(hit);
            }

            let waiter = {
                let mut inflight = self.inflight.lock();
                if let Some(tx) = inflight.get(&request) {
                    Some(tx.subscribe())
                } else {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(request.clone(), tx);
                    None
                }
            };

            if let Some(mut rx) = waiter {
                metrics::record_coalesced(request.kind().as_str());
                match rx.recv().await {
                    Ok(result) => return result,
                    // Leader vanished without publishing; retry as leader.
                    Err(_) => continue,
                }
            }

            let guard = InflightGuard {
                inflight: &self.inflight,
                request: &request,
                published: false,
            };
            let result = self.dispatch(&request).await;
            if let Ok((payload, confidence)) = &result {
                self.cache_store(&request, payload.clone(), *confidence);
            }
            guard.publish(result.clone());
            return result;
        }
    }

    /// Route and attempt a request, falling back once when eligible.
    async fn dispatch(&self, request: &MarketRequest) -> FetchResult {
        let kind = request.kind();
        let operation = kind.as_str();
        let cached_tick = match request {
            MarketRequest::Ticker { symbol, .. } => self.stream.serve_ticker(symbol),
            MarketRequest::Candles { .. } | MarketRequest::Orderbook { .. } => None,
        };
        let decision = self.router.select_channel(kind, cached_tick.is_some())?;

        match self
            .attempt(decision.primary, request, cached_tick.as_ref())
            .await
        {
            Ok(outcome) => {
                metrics::record_request(operation, decision.primary, "success");
                Ok(outcome)
            }
            Err(error) => {
                metrics::record_request(operation, decision.primary, error.kind());
                let Some(alternate) = decision
                    .alternate
                    .filter(|_| error.retryable_on_alternate())
                else {
                    return Err(error);
                };
                tracing::warn!(
                    request = %kind,
                    primary = %decision.primary,
                    alternate = %alternate,
                    %error,
                    "primary channel failed, retrying on alternate"
                );
                match self.attempt(alternate, request, cached_tick.as_ref()).await {
                    Ok(outcome) => {
                        metrics::record_request(operation, alternate, "fallback_success");
                        Ok(outcome)
                    }
                    Err(second) => {
                        metrics::record_request(operation, alternate, second.kind());
                        Err(second)
                    }
                }
            }
        }
    }

    /// Attempt one channel. The streaming channel answers one-shot
    /// requests purely from its cached tick.
    async fn attempt(
        &self,
        channel: ChannelKind,
        request: &MarketRequest,
        cached_tick: Option<&CanonicalTicker>,
    ) -> FetchResult {
        match channel {
            ChannelKind::Rest => self.rest.fetch(request).await,
            ChannelKind::Stream => cached_tick.map_or_else(
                || {
                    Err(GatewayError::ChannelUnavailable {
                        request: request.kind().as_str(),
                        reason: "cached tick expired".to_string(),
                    })
                },
                |tick| {
                    let confidence = tick.confidence;
                    Ok((MarketPayload::Ticker(tick.clone()), confidence))
                },
            ),
        }
    }

    fn cache_lookup(&self, request: &MarketRequest) -> Option<(MarketPayload, Confidence)> {
        if self.settings.cache_ttl.is_zero() {
            return None;
        }
        let guard = self.cache.lock();
        let entry = guard.get(request)?;
        (entry.stored.elapsed() <= self.settings.cache_ttl)
            .then(|| (entry.payload.clone(), entry.confidence))
    }

    fn cache_store(&self, request: &MarketRequest, payload: MarketPayload, confidence: Confidence) {
        if self.settings.cache_ttl.is_zero() {
            return;
        }
        let ttl = self.settings.cache_ttl;
        let mut guard = self.cache.lock();
        guard.retain(|_, entry| entry.stored.elapsed() <= ttl);
        guard.insert(
            request.clone(),
            CacheEntry {
                payload,
                confidence,
                stored: Instant::now(),
            },
        );
    }

    fn mismatched(payload: &MarketPayload, expected: &str) -> GatewayError {
        GatewayError::Protocol {
            channel: ChannelKind::Rest,
            message: format!(
                "{} payload returned for {expected} request",
                payload.data_type()
            ),
        }
    }
}

impl<R: RequestChannelPort> std::fmt::Debug for MarketDataFacade<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataFacade")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Removes the in-flight entry for a request once its leader finishes,
/// or when the leader's future is dropped mid-dispatch.
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<MarketRequest, broadcast::Sender<FetchResult>>>,
    request: &'a MarketRequest,
    published: bool,
}

impl InflightGuard<'_> {
    /// Remove the entry and wake waiters with the final result.
    fn publish(mut self, result: FetchResult) {
        if let Some(tx) = self.inflight.lock().remove(self.request) {
            let _ = tx.send(result);
        }
        self.published = true;
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            // Abandoned mid-flight; waking peers lets one of them lead.
            self.inflight.lock().remove(self.request);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
