//! Market Gateway Binary
//!
//! Starts the unified market-data gateway: connects the streaming
//! session for the configured symbols, logs delivered ticks and
//! periodic health snapshots, and serves Prometheus metrics until a
//! shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `GATEWAY_SYMBOLS`: Comma-separated symbols to stream (default: BTCUSDT)
//! - `GATEWAY_API_KEY`: Exchange API key for a raised request allowance
//! - `GATEWAY_REST_BASE_URL`: REST endpoint (default: <https://api.binance.com>)
//! - `GATEWAY_WS_URL`: WebSocket endpoint (default: <wss://stream.binance.com:9443/ws>)
//! - `GATEWAY_METRICS_PORT`: Prometheus exporter port (default: 9090)
//! - `RUST_LOG`: Log level (default: info)
//!
//! The full tunable list lives in `infrastructure::config`.

use std::sync::Arc;
use std::time::Duration;

use market_gateway::infrastructure::telemetry;
use market_gateway::{
    BinanceGateway, GatewayConfig, TickerSubscription, build_gateway, init_metrics,
};
use tokio::signal;
use tokio::task::JoinHandle;

/// Interval between health snapshot log lines.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();
    telemetry::init();

    tracing::info!("Starting market gateway");

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    init_metrics(config.metrics_port)?;

    let gateway = build_gateway(&config)?;

    let symbols = stream_symbols();
    let subscription = gateway.stream_ticker(&symbols)?;
    let tick_logger = spawn_tick_logger(subscription);
    let health_logger = spawn_health_logger(Arc::clone(&gateway));

    tracing::info!(symbols = ?symbols, "Market gateway ready");

    shutdown_signal().await;

    health_logger.abort();
    tick_logger.abort();
    gateway.shutdown().await;

    tracing::info!("Market gateway stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parts of the configuration worth seeing at startup.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        rest_base_url = %config.rest.base_url,
        ws_url = %config.stream.ws_url,
        max_weight = config.rate_limit.max_weight,
        metrics_port = config.metrics_port,
        authenticated = config.credentials.is_some(),
        "Configuration loaded"
    );
}

/// Symbols to stream, from `GATEWAY_SYMBOLS` (comma-separated).
fn stream_symbols() -> Vec<String> {
    std::env::var("GATEWAY_SYMBOLS")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Consume the subscription and log every delivered tick.
fn spawn_tick_logger(mut subscription: TickerSubscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ticker) = subscription.recv().await {
            tracing::info!(
                symbol = %ticker.symbol,
                price = %ticker.price,
                change_pct = %ticker.change_pct,
                confidence = ticker.confidence.as_str(),
                "tick"
            );
        }
        tracing::info!("Ticker stream closed");
    })
}

/// Periodically log a gateway health snapshot.
fn spawn_health_logger(gateway: Arc<BinanceGateway>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
        // The first tick fires immediately; skip it so the startup logs
        // stay uncluttered.
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = gateway.health_snapshot();
            tracing::info!(
                session = snapshot.session.as_str(),
                rest = snapshot.rest.state.as_str(),
                rest_error_rate = snapshot.rest.error_rate,
                stream = snapshot.stream.state.as_str(),
                stream_error_rate = snapshot.stream.error_rate,
                subscriptions = snapshot.active_subscriptions,
                symbols = snapshot.streamed_symbols,
                "health"
            );
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail at startup instead.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
