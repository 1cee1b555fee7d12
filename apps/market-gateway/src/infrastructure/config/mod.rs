//! Configuration Module
//!
//! Environment-driven configuration for the gateway. All tunable
//! thresholds live here as named fields with defaults; loading
//! validates the whole tree so a misconfigured process fails at
//! startup instead of misbehaving later.

mod settings;

pub use settings::{
    ApiCredentials, ConfigError, FacadeSettings, GatewayConfig, RateLimitSettings, RestSettings,
    StreamSettings,
};
