//! Application Layer
//!
//! Orchestrates the domain over the channel adapters: request routing,
//! coalescing and caching, and the public facade consumers call. Only
//! this layer decides which channel serves a request; infrastructure
//! executes the calls and the domain supplies the rules.

pub mod facade;
pub mod ports;
pub mod router;

pub use facade::{GatewayHealthSnapshot, MarketDataFacade};
pub use ports::{MarketPayload, MarketRequest, RequestChannelPort};
pub use router::ChannelRouter;
