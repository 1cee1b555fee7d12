//! Domain Layer - Canonical market data types and business logic.
//!
//! This layer contains the canonical data model and the pure state machines
//! (subscription registry, channel health, routing policy inputs) with no
//! network dependencies. All types here are plain Rust with serialization
//! support.

/// Canonical market data model (tickers, candles, orderbooks).
pub mod market;

/// Per-channel health telemetry and circuit breaking.
pub mod health;

/// Request kinds and channel decisions for routing.
pub mod routing;

/// Subscription tracking and reference counting.
pub mod subscription;
