//! REST Market Data Channel
//!
//! Rate-budgeted request/response access to the exchange REST API over a
//! shared connection pool.
//!
//! The budget is consulted before every attempt and a token is consumed
//! only for calls actually sent; an empty bucket fails the call
//! immediately with the estimated wait, never by sleeping. Transient
//! failures get a bounded internal retry with doubled backoff, each
//! retry paying for a fresh token. An upstream `429`/`418` is surfaced
//! immediately and drains the local budget so subsequent calls fail fast
//! until the refill catches up.
//!
//! Every completed attempt records its latency and outcome into the
//! channel's health telemetry. Caller mistakes ([`GatewayError::InvalidRequest`])
//! are not counted against the channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use super::messages::{ExchangeErrorBody, KlineRow, RawPayload, RestDepth, RestTicker};
use crate::domain::health::{ChannelHealth, ChannelState};
use crate::domain::market::{ChannelKind, Symbol, Timeframe};
use crate::errors::{GatewayError, GatewayResult, unify};
use crate::infrastructure::config::{GatewayConfig, RestSettings};
use crate::infrastructure::metrics;
use crate::infrastructure::ratelimit::RateBudget;

/// Largest candle count the klines endpoint returns in one page.
pub const MAX_KLINE_LIMIT: u32 = 1000;

/// Depth limits the exchange serves; other values round up to the next
/// bucket.
pub const DEPTH_BUCKETS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Smallest supported depth bucket covering `requested` levels.
///
/// Requests beyond the largest bucket clamp to it.
#[must_use]
pub fn depth_bucket(requested: u32) -> u32 {
    DEPTH_BUCKETS
        .iter()
        .copied()
        .find(|bucket| *bucket >= requested)
        .unwrap_or(DEPTH_BUCKETS[DEPTH_BUCKETS.len() - 1])
}

// =============================================================================
// Endpoints
// =============================================================================

/// A typed REST endpoint with its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestEndpoint {
    /// 24h rolling ticker for one symbol.
    Ticker24h {
        /// Trading pair.
        symbol: Symbol,
    },
    /// Historical candles, newest last after normalization.
    Klines {
        /// Trading pair.
        symbol: Symbol,
        /// Candle timeframe.
        timeframe: Timeframe,
        /// Row count, at most [`MAX_KLINE_LIMIT`].
        limit: u32,
    },
    /// Orderbook snapshot at one of the [`DEPTH_BUCKETS`].
    Depth {
        /// Trading pair.
        symbol: Symbol,
        /// Depth bucket.
        limit: u32,
    },
}

impl RestEndpoint {
    /// URL path of this endpoint.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Ticker24h { .. } => "/api/v3/ticker/24hr",
            Self::Klines { .. } => "/api/v3/klines",
            Self::Depth { .. } => "/api/v3/depth",
        }
    }

    /// Query parameters for this endpoint.
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Ticker24h { symbol } => vec![("symbol", symbol.to_string())],
            Self::Klines {
                symbol,
                timeframe,
                limit,
            } => vec![
                ("symbol", symbol.to_string()),
                ("interval", timeframe.interval().to_string()),
                ("limit", limit.to_string()),
            ],
            Self::Depth { symbol, limit } => vec![
                ("symbol", symbol.to_string()),
                ("limit", limit.to_string()),
            ],
        }
    }

    /// Request weight charged against the rate budget, per the
    /// exchange's published weight table.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        match self {
            Self::Ticker24h { .. } | Self::Klines { .. } => 2,
            Self::Depth { limit, .. } => match limit {
                0..=100 => 5,
                101..=500 => 25,
                501..=1000 => 50,
                _ => 250,
            },
        }
    }

    /// Operation label for logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Ticker24h { .. } => "ticker",
            Self::Klines { .. } => "candles",
            Self::Depth { .. } => "orderbook",
        }
    }
}

// =============================================================================
// Channel
// =============================================================================

/// The REST market data channel.
///
/// Owns the HTTP connection pool; shares the rate budget and health
/// telemetry with the rest of the gateway.
#[derive(Debug)]
pub struct RestChannel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    budget: Arc<RateBudget>,
    health: Arc<ChannelHealth>,
    settings: RestSettings,
}

impl RestChannel {
    /// Build the channel from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        config: &GatewayConfig,
        budget: Arc<RateBudget>,
        health: Arc<ChannelHealth>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.rest.request_timeout)
            .connect_timeout(config.rest.connect_timeout)
            .build()
            .context("failed to build REST client")?;
        Ok(Self {
            client,
            base_url: config.rest.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .credentials
                .as_ref()
                .map(|c| c.api_key().to_string()),
            budget,
            health,
            settings: config.rest.clone(),
        })
    }

    /// Health telemetry handle for this channel.
    #[must_use]
    pub fn health(&self) -> Arc<ChannelHealth> {
        Arc::clone(&self.health)
    }

    /// Issue one call, paying the endpoint's weight from the budget.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::RateLimitExceeded`] when the local budget is
    ///   empty (with the estimated wait) or the exchange answers
    ///   `429`/`418` (after draining the local budget). Never retried
    ///   here.
    /// - [`GatewayError::TransientNetwork`] once the bounded internal
    ///   retries are exhausted.
    /// - [`GatewayError::Auth`], [`GatewayError::InvalidRequest`] or
    ///   [`GatewayError::Protocol`] as classified from the response.
    pub async fn call(&self, endpoint: &RestEndpoint) -> GatewayResult<RawPayload> {
        let weight = endpoint.weight();
        let mut backoff = self.settings.retry_backoff_initial;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.acquire_budget(endpoint, weight)?;

            let started = Instant::now();
            let outcome = self.attempt(endpoint).await;
            let elapsed = started.elapsed();
            metrics::record_request_duration(endpoint.operation(), ChannelKind::Rest, elapsed);

            let error = match outcome {
                Ok(payload) => {
                    self.record_success(elapsed);
                    return Ok(payload);
                }
                Err(error) => error,
            };

            // A rejected request reflects the caller, not the channel.
            if !matches!(error, GatewayError::InvalidRequest { .. }) {
                self.record_failure(elapsed);
            }

            if let GatewayError::RateLimitExceeded { retry_after, .. } = &error {
                self.budget.drain(*retry_after);
                metrics::record_rate_limited("upstream");
                tracing::warn!(
                    endpoint = endpoint.operation(),
                    retry_after_ms = retry_after.map(|d| d.as_millis()),
                    "upstream rate limit hit, budget drained"
                );
                return Err(error);
            }

            let transient = matches!(error, GatewayError::TransientNetwork { .. });
            if !transient || attempt > self.settings.transient_retries {
                return Err(error);
            }

            tracing::warn!(
                endpoint = endpoint.operation(),
                attempt,
                backoff_ms = backoff.as_millis(),
                %error,
                "transient failure, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    fn record_success(&self, elapsed: Duration) {
        let before = self.health.state();
        self.health.record_success(elapsed);
        self.emit_transition(before);
    }

    fn record_failure(&self, elapsed: Duration) {
        let before = self.health.state();
        self.health.record_failure(Some(elapsed));
        self.emit_transition(before);
    }

    fn emit_transition(&self, before: ChannelState) {
        let after = self.health.state();
        if before != after {
            metrics::record_circuit_transition(ChannelKind::Rest, after);
        }
    }

    /// Consult the budget; fail fast with the estimated wait if empty.
    fn acquire_budget(&self, endpoint: &RestEndpoint, weight: u32) -> GatewayResult<()> {
        if let Err(wait) = self.budget.try_acquire(weight) {
            metrics::record_rate_limited("proactive");
            tracing::warn!(
                endpoint = endpoint.operation(),
                weight,
                wait_ms = wait.as_millis(),
                "rate budget exhausted before call"
            );
            return Err(GatewayError::RateLimitExceeded {
                channel: ChannelKind::Rest,
                retry_after: Some(wait),
            });
        }
        metrics::set_rate_budget_available(self.budget.available());
        Ok(())
    }

    /// One wire attempt: send, classify non-success, decode.
    async fn attempt(&self, endpoint: &RestEndpoint) -> GatewayResult<RawPayload> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let mut request = self.client.get(&url).query(&endpoint.query());
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| unify::transport(ChannelKind::Rest, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = unify::retry_after_header(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = endpoint.operation(),
                status = status.as_u16(),
                body = %truncate(&body, 256),
                "exchange returned error status"
            );
            return Err(classify_status(status.as_u16(), retry_after, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unify::transport(ChannelKind::Rest, &e))?;
        decode_payload(endpoint, &body)
    }
}

/// Classify a non-success status, preferring the exchange's own error
/// code for plain request rejections.
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> GatewayError {
    match status {
        401 | 403 | 408 | 418 | 429 | 500..=599 => {
            unify::http_status(ChannelKind::Rest, status, retry_after, &truncate(body, 256))
        }
        _ => serde_json::from_str::<ExchangeErrorBody>(body).map_or_else(
            |_| unify::http_status(ChannelKind::Rest, status, retry_after, &truncate(body, 256)),
            |exchange| unify::exchange_code(ChannelKind::Rest, exchange.code, &exchange.msg),
        ),
    }
}

/// Decode a success body into the raw payload for this endpoint.
fn decode_payload(endpoint: &RestEndpoint, body: &str) -> GatewayResult<RawPayload> {
    let decoded = match endpoint {
        RestEndpoint::Ticker24h { symbol } => {
            serde_json::from_str::<RestTicker>(body).map(|payload| RawPayload::RestTicker {
                requested: symbol.clone(),
                payload,
            })
        }
        RestEndpoint::Klines {
            symbol, timeframe, ..
        } => serde_json::from_str::<Vec<KlineRow>>(body).map(|rows| RawPayload::RestCandles {
            symbol: symbol.clone(),
            timeframe: *timeframe,
            rows,
        }),
        RestEndpoint::Depth { symbol, .. } => {
            serde_json::from_str::<RestDepth>(body).map(|payload| RawPayload::RestOrderbook {
                symbol: symbol.clone(),
                payload,
            })
        }
    };
    decoded.map_err(|error| {
        tracing::warn!(
            endpoint = endpoint.operation(),
            %error,
            body = %truncate(body, 256),
            "undecodable response payload"
        );
        GatewayError::Protocol {
            channel: ChannelKind::Rest,
            message: format!("undecodable {} response: {error}", endpoint.operation()),
        }
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn symbol() -> Symbol {
        Symbol::parse("BTCUSDT").unwrap()
    }

    #[test]
    fn test_klines_query_includes_interval_and_limit() {
        let endpoint = RestEndpoint::Klines {
            symbol: symbol(),
            timeframe: Timeframe::H1,
            limit: 200,
        };
        assert_eq!(endpoint.path(), "/api/v3/klines");
        let query = endpoint.query();
        assert!(query.contains(&("symbol", "BTCUSDT".to_string())));
        assert!(query.contains(&("interval", "1h".to_string())));
        assert!(query.contains(&("limit", "200".to_string())));
    }

    #[test_case(5, 5; "minimum bucket")]
    #[test_case(100, 5; "top of small bucket")]
    #[test_case(101, 25; "first mid bucket")]
    #[test_case(500, 25)]
    #[test_case(1000, 50)]
    #[test_case(5000, 250; "maximum bucket")]
    fn test_depth_weight_scales_with_bucket(limit: u32, expected: u32) {
        let endpoint = RestEndpoint::Depth {
            symbol: symbol(),
            limit,
        };
        assert_eq!(endpoint.weight(), expected);
    }

    #[test_case(1, 5)]
    #[test_case(5, 5)]
    #[test_case(6, 10)]
    #[test_case(42, 50)]
    #[test_case(101, 500)]
    #[test_case(4999, 5000)]
    fn test_depth_bucket_rounds_up(requested: u32, expected: u32) {
        assert_eq!(depth_bucket(requested), expected);
    }

    #[test]
    fn test_depth_bucket_clamps_oversized() {
        assert_eq!(depth_bucket(100_000), 5000);
    }

    #[test]
    fn test_ticker_weight_is_flat() {
        let endpoint = RestEndpoint::Ticker24h { symbol: symbol() };
        assert_eq!(endpoint.weight(), 2);
        assert_eq!(endpoint.operation(), "ticker");
    }

    #[test]
    fn test_classify_prefers_exchange_code_on_plain_rejection() {
        let err = classify_status(400, None, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn test_classify_rate_limit_keeps_retry_after() {
        let err = classify_status(429, Some(Duration::from_secs(7)), "");
        assert_eq!(
            err,
            GatewayError::RateLimitExceeded {
                channel: ChannelKind::Rest,
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[test]
    fn test_classify_undecodable_rejection_falls_back_to_status() {
        let err = classify_status(400, None, "<html>nope</html>");
        assert!(matches!(err, GatewayError::Protocol { .. }));
    }

    #[test]
    fn test_decode_payload_reports_protocol_error() {
        let endpoint = RestEndpoint::Ticker24h { symbol: symbol() };
        let err = decode_payload(&endpoint, "[1,2,3]").unwrap_err();
        assert!(matches!(err, GatewayError::Protocol { .. }));
    }
}
