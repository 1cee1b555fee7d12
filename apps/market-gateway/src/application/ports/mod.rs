//! Driven ports consumed by the application layer.

mod request_channel_port;

pub use request_channel_port::{MarketPayload, MarketRequest, RequestChannelPort};
