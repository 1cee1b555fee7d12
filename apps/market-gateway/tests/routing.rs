//! Gateway Routing Integration Tests
//!
//! Assembles the full gateway over a scripted HTTP exchange and an
//! in-process websocket endpoint, then verifies channel selection,
//! fail-fast behavior and fallback end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use market_gateway::infrastructure::binance::RestChannel;
use market_gateway::{
    BinanceMarketAdapter, ChannelHealth, ChannelKind, ChannelState, DataUnifier, GatewayConfig,
    GatewayError, MarketDataFacade, RateBudget, SessionState, StreamSessionManager,
    TickerSubscription, Timeframe,
};

type ServerWs = WebSocketStream<TcpStream>;

const RECV_WAIT: Duration = Duration::from_secs(2);

struct Harness {
    facade: MarketDataFacade<BinanceMarketAdapter>,
    rest_health: Arc<ChannelHealth>,
    stream_health: Arc<ChannelHealth>,
    server: MockServer,
    listener: TcpListener,
}

/// Assemble the gateway against local endpoints, keeping handles to the
/// per-channel health trackers.
async fn setup_gateway() -> Harness {
    let server = MockServer::start().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = GatewayConfig::default();
    config.rest.base_url = server.uri();
    config.rest.transient_retries = 0;
    config.rest.retry_backoff_initial = Duration::from_millis(5);
    config.stream.ws_url = format!("ws://{}", listener.local_addr().unwrap());
    config.stream.reconnect_delay_initial = Duration::from_millis(10);
    config.stream.reconnect_delay_max = Duration::from_millis(50);
    // Zero TTL so every call exercises the router.
    config.facade.cache_ttl = Duration::ZERO;

    let budget = Arc::new(RateBudget::new(
        config.rate_limit.max_weight,
        config.rate_limit.window,
    ));
    let rest_health = Arc::new(ChannelHealth::new(ChannelKind::Rest, config.health.clone()));
    let stream_health = Arc::new(ChannelHealth::new(ChannelKind::Stream, config.health.clone()));
    let channel = RestChannel::new(&config, budget, Arc::clone(&rest_health)).unwrap();
    let adapter = Arc::new(BinanceMarketAdapter::new(
        channel,
        DataUnifier::new(config.stream.fresh_tick_max_age),
    ));
    let stream = StreamSessionManager::new(config.stream.clone(), Arc::clone(&stream_health));
    let facade = MarketDataFacade::new(adapter, stream, config.facade.clone());

    Harness {
        facade,
        rest_health,
        stream_health,
        server,
        listener,
    }
}

async fn accept_session(listener: &TcpListener) -> ServerWs {
    let (stream, _) = timeout(RECV_WAIT, listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn read_subscribe(ws: &mut ServerWs) -> (Vec<String>, u64) {
    loop {
        let message = timeout(RECV_WAIT, ws.next())
            .await
            .expect("timed out waiting for a subscribe request")
            .expect("connection closed before subscribe")
            .unwrap();
        if let Message::Text(text) = message {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["method"] == "SUBSCRIBE" {
                let params = value["params"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| p.as_str().unwrap().to_string())
                    .collect();
                return (params, value["id"].as_u64().unwrap());
            }
        }
    }
}

async fn send_ack(ws: &mut ServerWs, id: u64) {
    let frame = json!({ "result": null, "id": id });
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn send_ticker(ws: &mut ServerWs, symbol: &str, price: &str, event_time: i64) {
    let frame = json!({
        "e": "24hrTicker",
        "E": event_time,
        "s": symbol,
        "p": "120.50",
        "P": "0.75",
        "o": "16400.00",
        "h": "16900.00",
        "l": "16100.00",
        "c": price,
        "v": "12345.67",
        "q": "203000000.00",
    });
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Subscribe through the facade and push one live tick so the stream
/// holds a servable cached price.
async fn prime_stream(harness: &Harness, price: &str) -> (TickerSubscription, ServerWs) {
    let mut subscription = harness.facade.stream_ticker(["BTCUSDT"]).unwrap();
    let mut ws = accept_session(&harness.listener).await;
    let (_, id) = read_subscribe(&mut ws).await;
    send_ack(&mut ws, id).await;
    send_ticker(&mut ws, "BTCUSDT", price, Utc::now().timestamp_millis()).await;
    timeout(RECV_WAIT, subscription.recv())
        .await
        .expect("timed out waiting for the priming tick")
        .expect("subscription closed unexpectedly");
    (subscription, ws)
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

// =============================================================================
// Channel Selection Tests
// =============================================================================

#[tokio::test]
async fn test_degraded_stream_routes_request_to_rest() {
    let harness = setup_gateway().await;
    let (_subscription, _ws) = prime_stream(&harness, "16000.00").await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_ticker_body(
            "BTCUSDT",
            "16750.25",
        )))
        .expect(1)
        .mount(&harness.server)
        .await;

    // Open the stream circuit; its cached tick must not win routing.
    for _ in 0..10 {
        harness.stream_health.record_failure(None);
    }
    assert_eq!(harness.stream_health.state(), ChannelState::CircuitOpen);

    let ticker = harness.facade.get_ticker("BTCUSDT", false).await.unwrap();
    assert_eq!(ticker.source, ChannelKind::Rest);
    assert_eq!(ticker.price, dec!(16750.25));
}

#[tokio::test]
async fn test_realtime_preference_served_from_live_stream() {
    let harness = setup_gateway().await;
    let (_subscription, _ws) = prime_stream(&harness, "16123.45").await;

    // No REST mock is mounted; only the stream can serve this.
    let ticker = harness.facade.get_ticker("BTCUSDT", true).await.unwrap();
    assert_eq!(ticker.source, ChannelKind::Stream);
    assert_eq!(ticker.price, dec!(16123.45));
    assert!(harness.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rest_failure_falls_back_to_stream_cache() {
    let harness = setup_gateway().await;
    let (_subscription, _ws) = prime_stream(&harness, "16200.00").await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&harness.server)
        .await;

    let ticker = harness.facade.get_ticker("BTCUSDT", false).await.unwrap();
    assert_eq!(ticker.source, ChannelKind::Stream);
    assert_eq!(ticker.price, dec!(16200.00));
}

#[tokio::test]
async fn test_bulk_candles_prefer_rest_over_healthy_stream() {
    let harness = setup_gateway().await;
    let (_subscription, _ws) = prime_stream(&harness, "16000.00").await;
    // Make the stream the faster channel by far.
    for _ in 0..5 {
        harness.stream_health.record_success(Duration::from_millis(1));
    }
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("limit", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(make_kline_body(200)))
        .expect(1)
        .mount(&harness.server)
        .await;

    let candles = harness
        .facade
        .get_candles("BTCUSDT", Timeframe::M1, 200)
        .await
        .unwrap();
    assert_eq!(candles.len(), 200);
    assert!(candles.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// =============================================================================
// Fail-Fast Tests
// =============================================================================

#[tokio::test]
async fn test_open_rest_circuit_fails_fast_without_wire() {
    let harness = setup_gateway().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500))
        .expect(10)
        .mount(&harness.server)
        .await;

    for _ in 0..10 {
        let error = harness.facade.get_ticker("BTCUSDT", false).await.unwrap_err();
        assert!(matches!(error, GatewayError::TransientNetwork { .. }));
    }
    assert_eq!(harness.rest_health.state(), ChannelState::CircuitOpen);

    // The eleventh attempt is refused before any wire call; the mock's
    // expect(10) verifies nothing further went out.
    let error = harness.facade.get_ticker("BTCUSDT", false).await.unwrap_err();
    assert!(matches!(
        error,
        GatewayError::ChannelUnavailable {
            request: "ticker",
            ref reason,
        } if reason.contains("circuit open")
    ));
}

#[tokio::test]
async fn test_malformed_payload_surfaces_protocol_error() {
    let harness = setup_gateway().await;
    let mut body = make_ticker_body("BTCUSDT", "16750.25");
    body.as_object_mut().unwrap().remove("lastPrice");
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&harness.server)
        .await;

    let error = harness.facade.get_ticker("BTCUSDT", false).await.unwrap_err();
    assert!(matches!(
        error,
        GatewayError::Protocol {
            channel: ChannelKind::Rest,
            ref message,
        } if message.contains("lastPrice")
    ));
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[tokio::test]
async fn test_gateway_shutdown_is_bounded() {
    let harness = setup_gateway().await;
    let (mut subscription, _ws) = prime_stream(&harness, "16000.00").await;

    harness.facade.shutdown().await;

    let snapshot = harness.facade.health_snapshot();
    assert_eq!(snapshot.session, SessionState::Closed);
    assert_eq!(snapshot.active_subscriptions, 0);

    let after = timeout(RECV_WAIT, subscription.recv())
        .await
        .expect("recv should resolve promptly after shutdown");
    assert!(after.is_none(), "delivery queue should close on shutdown");

    assert!(matches!(
        harness.facade.get_ticker("BTCUSDT", false).await,
        Err(GatewayError::Shutdown)
    ));
    assert!(matches!(
        harness.facade.stream_ticker(["ETHUSDT"]),
        Err(GatewayError::Shutdown)
    ));
}
