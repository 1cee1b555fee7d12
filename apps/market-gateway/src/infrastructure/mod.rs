//! Infrastructure Layer
//!
//! Adapters that touch the outside world: the exchange REST and
//! websocket channels, process configuration, telemetry and metrics
//! wiring, and the proactive rate budget. Everything here implements
//! ports or produces domain types; nothing above this layer speaks
//! wire formats.

/// Exchange channel adapters and payload normalization.
pub mod binance;
/// Environment-driven process configuration.
pub mod config;
/// Prometheus metrics recorder and metric registration.
pub mod metrics;
/// Proactive token-bucket request budget.
pub mod ratelimit;
/// Tracing subscriber setup.
pub mod telemetry;
