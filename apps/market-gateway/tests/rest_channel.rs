//! REST Channel Integration Tests
//!
//! Exercises the budgeted REST channel and payload normalization against
//! a scripted HTTP exchange.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use market_gateway::infrastructure::binance::RestChannel;
use market_gateway::{
    BinanceMarketAdapter, ChannelHealth, ChannelKind, ChannelState, Confidence, DataUnifier,
    GatewayConfig, GatewayError, MarketPayload, MarketRequest, RateBudget, RequestChannelPort,
    Symbol, Timeframe,
};

/// Build an adapter pointed at the mock exchange with fast retries.
fn setup_adapter(
    server: &MockServer,
    transient_retries: u32,
    max_weight: u32,
) -> (BinanceMarketAdapter, Arc<ChannelHealth>, Arc<RateBudget>) {
    let mut config = GatewayConfig::default();
    config.rest.base_url = server.uri();
    config.rest.transient_retries = transient_retries;
    config.rest.retry_backoff_initial = Duration::from_millis(5);
    config.rate_limit.max_weight = max_weight;

    let budget = Arc::new(RateBudget::new(
        config.rate_limit.max_weight,
        config.rate_limit.window,
    ));
    let health = Arc::new(ChannelHealth::new(ChannelKind::Rest, config.health.clone()));
    let channel = RestChannel::new(&config, Arc::clone(&budget), Arc::clone(&health)).unwrap();
    let adapter =
        BinanceMarketAdapter::new(channel, DataUnifier::new(config.stream.fresh_tick_max_age));
    (adapter, health, budget)
}

fn make_ticker_request(symbol: &str) -> MarketRequest {
    MarketRequest::Ticker {
        symbol: Symbol::parse(symbol).unwrap(),
        prefer_realtime: false,
    }
}

fn make_ticker_body(symbol: &str, last_price: &str) -> serde_json::Value {
    json!({
        "symbol": symbol,
        "priceChange": "120.50",
        "priceChangePercent": "0.75",
        "lastPrice": last_price,
        "highPrice": "16900.00",
        "lowPrice": "16100.00",
        "volume": "12345.67",
        "closeTime": Utc::now().timestamp_millis(),
    })
}

/// Kline rows newest-first; normalization sorts them ascending.
fn make_kline_body(count: i64) -> serde_json::Value {
    let newest = Utc::now().timestamp_millis();
    let rows: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            let open_time = newest - i * 60_000;
            json!([
                open_time,
                "16500.00",
                "16550.00",
                "16480.00",
                "16520.00",
                "123.45",
                open_time + 59_999,
            ])
        })
        .collect();
    json!(rows)
}

fn make_depth_body(levels: i64) -> serde_json::Value {
    let bids: Vec<serde_json::Value> = (0..levels)
        .map(|i| json!([format!("{}.00", 16_500 - i), "1.50"]))
        .collect();
    let asks: Vec<serde_json::Value> = (0..levels)
        .map(|i| json!([format!("{}.00", 16_501 + i), "2.00"]))
        .collect();
    json!({ "lastUpdateId": 1_027_024_u64, "bids": bids, "asks": asks })
}

// =============================================================================
// Normalization Tests
// =============================================================================

#[tokio::test]
async fn test_ticker_normalized_to_canonical() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_ticker_body(
            "BTCUSDT",
            "16750.25",
        )))
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 0, 100);

    let (payload, confidence) = adapter.fetch(&make_ticker_request("BTCUSDT")).await.unwrap();

    let MarketPayload::Ticker(ticker) = payload else {
        panic!("expected a ticker payload");
    };
    assert_eq!(ticker.symbol.as_str(), "BTCUSDT");
    assert_eq!(ticker.price, dec!(16750.25));
    assert_eq!(ticker.change_abs, dec!(120.50));
    assert_eq!(ticker.change_pct, dec!(0.75));
    assert_eq!(ticker.source, ChannelKind::Rest);
    assert_eq!(confidence, Confidence::High);
}

#[tokio::test]
async fn test_candles_sorted_ascending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "1m"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_kline_body(3)))
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 0, 100);

    let request = MarketRequest::Candles {
        symbol: Symbol::parse("BTCUSDT").unwrap(),
        timeframe: Timeframe::M1,
        count: 3,
    };
    let (payload, _confidence) = adapter.fetch(&request).await.unwrap();

    let MarketPayload::Candles(candles) = payload else {
        panic!("expected a candle payload");
    };
    assert_eq!(candles.len(), 3);
    assert!(candles[0].timestamp < candles[1].timestamp);
    assert!(candles[1].timestamp < candles[2].timestamp);
    assert_eq!(candles[0].open, dec!(16500.00));
    assert_eq!(candles[0].close, dec!(16520.00));
}

#[tokio::test]
async fn test_orderbook_depth_rounded_up_and_clipped() {
    let server = MockServer::start().await;
    // Depth 7 is not an exchange bucket; the wire call must round up to 10.
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_depth_body(10)))
        .expect(1)
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 0, 100);

    let request = MarketRequest::Orderbook {
        symbol: Symbol::parse("BTCUSDT").unwrap(),
        depth: 7,
    };
    let (payload, _confidence) = adapter.fetch(&request).await.unwrap();

    let MarketPayload::Orderbook(orderbook) = payload else {
        panic!("expected an orderbook payload");
    };
    assert_eq!(orderbook.bids.len(), 7);
    assert_eq!(orderbook.asks.len(), 7);
    assert_eq!(orderbook.best_bid(), Some(dec!(16500.00)));
    assert_eq!(orderbook.best_ask(), Some(dec!(16501.00)));
}

// =============================================================================
// Rate Limit Tests
// =============================================================================

#[tokio::test]
async fn test_upstream_rate_limit_surfaces_immediately_and_drains_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "2")
                .set_body_json(json!({"code": -1003, "msg": "Too many requests."})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (adapter, _health, budget) = setup_adapter(&server, 2, 100);

    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::RateLimitExceeded {
            channel: ChannelKind::Rest,
            retry_after: Some(wait),
        } if wait == Duration::from_secs(2)
    ));

    // The drained budget makes the next call fail before touching the
    // wire; the mock's expect(1) verifies no second request went out.
    assert_eq!(budget.available(), 0);
    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::RateLimitExceeded {
            retry_after: Some(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_proactive_budget_exhaustion_blocks_before_wire() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_ticker_body(
            "BTCUSDT",
            "16750.25",
        )))
        .expect(1)
        .mount(&server)
        .await;
    // Budget covers exactly one ticker call (weight 2).
    let (adapter, health, _budget) = setup_adapter(&server, 0, 2);

    assert!(adapter.fetch(&make_ticker_request("BTCUSDT")).await.is_ok());

    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::RateLimitExceeded {
            retry_after: Some(_),
            ..
        }
    ));
    // A proactively blocked call never reaches the wire, so it is not a
    // channel failure.
    assert_eq!(health.snapshot().consecutive_failures, 0);
}

// =============================================================================
// Retry and Circuit Tests
// =============================================================================

#[tokio::test]
async fn test_transient_failure_retried_within_bounds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_ticker_body(
            "BTCUSDT",
            "16750.25",
        )))
        .expect(1)
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 2, 100);

    let (payload, _confidence) = adapter.fetch(&make_ticker_request("BTCUSDT")).await.unwrap();
    assert!(matches!(payload, MarketPayload::Ticker(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_no_internal_retry_when_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 0, 100);

    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::TransientNetwork { .. }));
}

#[tokio::test]
async fn test_consecutive_failures_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500))
        .expect(10)
        .mount(&server)
        .await;
    let (adapter, health, _budget) = setup_adapter(&server, 0, 1000);

    for _ in 0..10 {
        let error = adapter
            .fetch(&make_ticker_request("BTCUSDT"))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::TransientNetwork { .. }));
    }

    let snapshot = health.snapshot();
    assert_eq!(snapshot.state, ChannelState::CircuitOpen);
    assert_eq!(snapshot.consecutive_failures, 10);
    assert!(!health.allow_request());
}

// =============================================================================
// Error Classification Tests
// =============================================================================

#[tokio::test]
async fn test_exchange_rejection_counts_against_caller_not_channel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
        )
        .mount(&server)
        .await;
    let (adapter, health, _budget) = setup_adapter(&server, 2, 100);

    let error = adapter
        .fetch(&make_ticker_request("NOPEUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::InvalidRequest { ref message } if message.contains("Invalid symbol")
    ));

    let snapshot = health.snapshot();
    assert_eq!(snapshot.state, ChannelState::Healthy);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn test_auth_rejection_surfaces_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"code": -2014, "msg": "API-key format invalid."})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (adapter, _health, _budget) = setup_adapter(&server, 2, 100);

    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::Auth {
            channel: ChannelKind::Rest,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_price_field_rejected_as_protocol_error() {
    let server = MockServer::start().await;
    let mut body = make_ticker_body("BTCUSDT", "16750.25");
    body.as_object_mut().unwrap().remove("lastPrice");
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    let (adapter, health, _budget) = setup_adapter(&server, 0, 100);

    let error = adapter
        .fetch(&make_ticker_request("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        GatewayError::Protocol {
            channel: ChannelKind::Rest,
            ref message,
        } if message.contains("lastPrice")
    ));
    // The rejected payload counts as a channel failure even though the
    // HTTP exchange itself succeeded.
    assert_eq!(health.snapshot().consecutive_failures, 1);
}
