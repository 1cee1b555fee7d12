//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Requests**: Request counts and latencies by operation and channel
//! - **Channels**: Health state, circuit transitions, rate budget
//! - **Streaming**: Subscription counts, tick delivery and drops
//! - **Normalization**: Rejected payload counts by reason
//!
//! # Integration
//!
//! The exporter serves `/metrics` on the configured port; a port of 0
//! disables exposition while keeping recording cheap no-ops.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::health::ChannelState;
use crate::domain::market::ChannelKind;

// =============================================================================
// Recorder Installation
// =============================================================================

/// Install the Prometheus recorder and HTTP exposition listener.
///
/// Must be called from within a Tokio runtime. A `port` of 0 skips
/// installation entirely.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot bind.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener((Ipv4Addr::UNSPECIFIED, port))
        .install()
        .context("failed to install Prometheus recorder")?;

    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Request counters
    describe_counter!(
        "gateway_requests_total",
        "Total requests served by operation, channel and outcome"
    );
    describe_counter!(
        "gateway_cache_hits_total",
        "Total requests answered from the short-TTL response cache"
    );
    describe_counter!(
        "gateway_coalesced_requests_total",
        "Total requests that joined an identical in-flight request"
    );
    describe_counter!(
        "gateway_rate_limited_total",
        "Total calls rejected by the proactive budget or the exchange"
    );

    // Channel counters and gauges
    describe_counter!(
        "gateway_circuit_transitions_total",
        "Total channel state transitions by channel and new state"
    );
    describe_counter!(
        "gateway_reconnects_total",
        "Total websocket reconnection attempts"
    );
    describe_gauge!(
        "gateway_channel_state",
        "Current channel state (0 healthy, 1 degraded, 2 circuit open)"
    );
    describe_gauge!(
        "gateway_rate_budget_available",
        "Request weight currently available in the proactive budget"
    );

    // Streaming counters and gauges
    describe_gauge!(
        "gateway_stream_subscriptions",
        "Number of live stream subscriptions"
    );
    describe_gauge!(
        "gateway_stream_symbols",
        "Number of distinct symbols subscribed on the stream"
    );
    describe_counter!(
        "gateway_ticks_delivered_total",
        "Total ticks delivered to subscribers"
    );
    describe_counter!(
        "gateway_ticks_dropped_total",
        "Total ticks dropped due to slow subscribers"
    );

    // Normalization counters
    describe_counter!(
        "gateway_rejected_payloads_total",
        "Total payloads rejected during normalization by channel and reason"
    );

    // Latency histograms
    describe_histogram!(
        "gateway_request_seconds",
        "Request latency by operation and serving channel"
    );
    describe_histogram!(
        "gateway_tick_delivery_lag_seconds",
        "Lag between exchange event time and local delivery"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed request.
pub fn record_request(operation: &'static str, channel: ChannelKind, outcome: &'static str) {
    counter!(
        "gateway_requests_total",
        "operation" => operation,
        "channel" => channel.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a request answered from the response cache.
pub fn record_cache_hit(operation: &'static str) {
    counter!(
        "gateway_cache_hits_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a request that attached to an identical in-flight request.
pub fn record_coalesced(operation: &'static str) {
    counter!(
        "gateway_coalesced_requests_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a rate-limit rejection. `source` is `proactive` when the
/// local budget refused the call, `upstream` when the exchange did.
pub fn record_rate_limited(source: &'static str) {
    counter!(
        "gateway_rate_limited_total",
        "source" => source
    )
    .increment(1);
}

/// Record a channel entering a new state.
pub fn record_circuit_transition(channel: ChannelKind, state: ChannelState) {
    counter!(
        "gateway_circuit_transitions_total",
        "channel" => channel.as_str(),
        "state" => state.as_str()
    )
    .increment(1);
    gauge!(
        "gateway_channel_state",
        "channel" => channel.as_str()
    )
    .set(f64::from(state as u8));
}

/// Record a websocket reconnection attempt.
pub fn record_reconnect() {
    counter!("gateway_reconnects_total").increment(1);
}

/// Update the available request weight gauge.
pub fn set_rate_budget_available(available: u32) {
    gauge!("gateway_rate_budget_available").set(f64::from(available));
}

/// Update the live subscription and distinct symbol gauges.
pub fn set_stream_subscriptions(subscriptions: usize, symbols: usize) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("gateway_stream_subscriptions").set(subscriptions as f64);
        gauge!("gateway_stream_symbols").set(symbols as f64);
    }
}

/// Record ticks delivered to a subscriber.
pub fn record_ticks_delivered(count: u64) {
    counter!("gateway_ticks_delivered_total").increment(count);
}

/// Record ticks dropped because a subscriber queue was full.
pub fn record_ticks_dropped(count: u64) {
    counter!("gateway_ticks_dropped_total").increment(count);
}

/// Record a payload rejected during normalization.
pub fn record_rejected_payload(channel: ChannelKind, reason: &'static str) {
    counter!(
        "gateway_rejected_payloads_total",
        "channel" => channel.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a completed request's latency.
pub fn record_request_duration(
    operation: &'static str,
    channel: ChannelKind,
    duration: Duration,
) {
    histogram!(
        "gateway_request_seconds",
        "operation" => operation,
        "channel" => channel.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record the lag between exchange event time and local delivery.
pub fn record_delivery_lag(lag: Duration) {
    histogram!("gateway_tick_delivery_lag_seconds").record(lag.as_secs_f64());
}
