//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment
//! variables with validated defaults.

use std::time::Duration;

use crate::domain::health::HealthConfig;

/// Optional exchange API credentials.
///
/// Market-data endpoints work unauthenticated; supplying a key raises
/// the exchange-side request allowance.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
}

impl ApiCredentials {
    /// Create credentials from an API key.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// REST channel settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Base URL for REST endpoints.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Internal retry attempts for transient failures (0 = no retries).
    pub transient_retries: u32,
    /// Delay before the first internal retry, doubled per attempt.
    pub retry_backoff_initial: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            transient_retries: 2,
            retry_backoff_initial: Duration::from_millis(250),
        }
    }
}

/// Proactive request budget settings.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Request weight allowed per window. Defaults below the documented
    /// exchange limit of 1200 to leave headroom for clock skew.
    pub max_weight: u32,
    /// Budget window length.
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_weight: 1100,
            window: Duration::from_secs(60),
        }
    }
}

/// Stream channel settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket endpoint URL.
    pub ws_url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence window after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Per-subscription delivery queue capacity.
    pub subscriber_queue_capacity: usize,
    /// Maximum tick age still served at full confidence.
    pub fresh_tick_max_age: Duration,
    /// Maximum tick age still servable at degraded confidence.
    pub servable_tick_max_age: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
            subscriber_queue_capacity: 256,
            fresh_tick_max_age: Duration::from_secs(3),
            servable_tick_max_age: Duration::from_secs(30),
        }
    }
}

/// Facade-level settings.
#[derive(Debug, Clone)]
pub struct FacadeSettings {
    /// Response cache TTL for request operations (zero disables caching).
    pub cache_ttl: Duration,
    /// Maximum time shutdown waits for the stream session to close.
    pub shutdown_grace: Duration,
}

impl Default for FacadeSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Optional API credentials for the REST channel.
    pub credentials: Option<ApiCredentials>,
    /// REST channel settings.
    pub rest: RestSettings,
    /// Proactive request budget settings.
    pub rate_limit: RateLimitSettings,
    /// Stream channel settings.
    pub stream: StreamSettings,
    /// Channel health and circuit thresholds.
    pub health: HealthConfig,
    /// Facade-level settings.
    pub facade: FacadeSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            rest: RestSettings::default(),
            rate_limit: RateLimitSettings::default(),
            stream: StreamSettings::default(),
            health: HealthConfig::default(),
            facade: FacadeSettings::default(),
            metrics_port: 9090,
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable is empty where a value is
    /// required, or if the resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = match std::env::var("GATEWAY_API_KEY") {
            Ok(key) if key.is_empty() => {
                return Err(ConfigError::EmptyValue("GATEWAY_API_KEY".to_string()));
            }
            Ok(key) => Some(ApiCredentials::new(key)),
            Err(_) => None,
        };

        let rest = RestSettings {
            base_url: parse_env_string("GATEWAY_REST_BASE_URL", &RestSettings::default().base_url),
            request_timeout: parse_env_duration_secs(
                "GATEWAY_REST_TIMEOUT_SECS",
                RestSettings::default().request_timeout,
            ),
            connect_timeout: parse_env_duration_secs(
                "GATEWAY_REST_CONNECT_TIMEOUT_SECS",
                RestSettings::default().connect_timeout,
            ),
            transient_retries: parse_env_u32(
                "GATEWAY_REST_TRANSIENT_RETRIES",
                RestSettings::default().transient_retries,
            ),
            retry_backoff_initial: parse_env_duration_millis(
                "GATEWAY_REST_RETRY_BACKOFF_MS",
                RestSettings::default().retry_backoff_initial,
            ),
        };

        let rate_limit = RateLimitSettings {
            max_weight: parse_env_u32(
                "GATEWAY_RATE_LIMIT_MAX_WEIGHT",
                RateLimitSettings::default().max_weight,
            ),
            window: parse_env_duration_secs(
                "GATEWAY_RATE_LIMIT_WINDOW_SECS",
                RateLimitSettings::default().window,
            ),
        };

        let stream = StreamSettings {
            ws_url: parse_env_string("GATEWAY_WS_URL", &StreamSettings::default().ws_url),
            heartbeat_interval: parse_env_duration_secs(
                "GATEWAY_HEARTBEAT_INTERVAL_SECS",
                StreamSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "GATEWAY_HEARTBEAT_TIMEOUT_SECS",
                StreamSettings::default().heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "GATEWAY_RECONNECT_DELAY_INITIAL_MS",
                StreamSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "GATEWAY_RECONNECT_DELAY_MAX_SECS",
                StreamSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "GATEWAY_RECONNECT_DELAY_MULTIPLIER",
                StreamSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "GATEWAY_MAX_RECONNECT_ATTEMPTS",
                StreamSettings::default().max_reconnect_attempts,
            ),
            subscriber_queue_capacity: parse_env_usize(
                "GATEWAY_SUBSCRIBER_QUEUE_CAPACITY",
                StreamSettings::default().subscriber_queue_capacity,
            ),
            fresh_tick_max_age: parse_env_duration_millis(
                "GATEWAY_FRESH_TICK_MAX_AGE_MS",
                StreamSettings::default().fresh_tick_max_age,
            ),
            servable_tick_max_age: parse_env_duration_millis(
                "GATEWAY_SERVABLE_TICK_MAX_AGE_MS",
                StreamSettings::default().servable_tick_max_age,
            ),
        };

        let health_defaults = HealthConfig::default();
        let health = HealthConfig {
            latency_window: parse_env_usize(
                "GATEWAY_LATENCY_WINDOW",
                health_defaults.latency_window,
            ),
            outcome_window: parse_env_usize(
                "GATEWAY_OUTCOME_WINDOW",
                health_defaults.outcome_window,
            ),
            degraded_error_rate: parse_env_f64(
                "GATEWAY_DEGRADED_ERROR_RATE",
                health_defaults.degraded_error_rate,
            ),
            open_error_rate: parse_env_f64(
                "GATEWAY_OPEN_ERROR_RATE",
                health_defaults.open_error_rate,
            ),
            circuit_failure_threshold: parse_env_u32(
                "GATEWAY_CIRCUIT_FAILURE_THRESHOLD",
                health_defaults.circuit_failure_threshold,
            ),
            cooldown_initial: parse_env_duration_secs(
                "GATEWAY_CIRCUIT_COOLDOWN_INITIAL_SECS",
                health_defaults.cooldown_initial,
            ),
            cooldown_max: parse_env_duration_secs(
                "GATEWAY_CIRCUIT_COOLDOWN_MAX_SECS",
                health_defaults.cooldown_max,
            ),
            cooldown_multiplier: parse_env_f64(
                "GATEWAY_CIRCUIT_COOLDOWN_MULTIPLIER",
                health_defaults.cooldown_multiplier,
            ),
        };

        let facade = FacadeSettings {
            cache_ttl: parse_env_duration_millis(
                "GATEWAY_CACHE_TTL_MS",
                FacadeSettings::default().cache_ttl,
            ),
            shutdown_grace: parse_env_duration_secs(
                "GATEWAY_SHUTDOWN_GRACE_SECS",
                FacadeSettings::default().shutdown_grace,
            ),
        };

        let config = Self {
            credentials,
            rest,
            rate_limit,
            stream,
            health,
            facade,
            metrics_port: parse_env_u16("GATEWAY_METRICS_PORT", 9090),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration tree for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rest.base_url.starts_with("http") {
            return Err(invalid("GATEWAY_REST_BASE_URL", "must be an http(s) URL"));
        }
        if !self.stream.ws_url.starts_with("ws") {
            return Err(invalid("GATEWAY_WS_URL", "must be a ws(s) URL"));
        }
        if self.rate_limit.max_weight == 0 {
            return Err(invalid("GATEWAY_RATE_LIMIT_MAX_WEIGHT", "must be at least 1"));
        }
        if self.rate_limit.window < Duration::from_secs(1) {
            return Err(invalid(
                "GATEWAY_RATE_LIMIT_WINDOW_SECS",
                "must be at least one second",
            ));
        }
        if self.stream.heartbeat_timeout <= self.stream.heartbeat_interval {
            return Err(invalid(
                "GATEWAY_HEARTBEAT_TIMEOUT_SECS",
                "must exceed the heartbeat interval",
            ));
        }
        if self.stream.reconnect_delay_multiplier < 1.0 {
            return Err(invalid(
                "GATEWAY_RECONNECT_DELAY_MULTIPLIER",
                "must be at least 1.0",
            ));
        }
        if self.stream.reconnect_delay_max < self.stream.reconnect_delay_initial {
            return Err(invalid(
                "GATEWAY_RECONNECT_DELAY_MAX_SECS",
                "must be at least the initial delay",
            ));
        }
        if self.stream.subscriber_queue_capacity == 0 {
            return Err(invalid(
                "GATEWAY_SUBSCRIBER_QUEUE_CAPACITY",
                "must be at least 1",
            ));
        }
        if self.stream.servable_tick_max_age < self.stream.fresh_tick_max_age {
            return Err(invalid(
                "GATEWAY_SERVABLE_TICK_MAX_AGE_MS",
                "must be at least the fresh-tick age",
            ));
        }
        if self.health.circuit_failure_threshold == 0 {
            return Err(invalid(
                "GATEWAY_CIRCUIT_FAILURE_THRESHOLD",
                "must be at least 1",
            ));
        }
        if self.health.latency_window == 0 || self.health.outcome_window == 0 {
            return Err(invalid(
                "GATEWAY_OUTCOME_WINDOW",
                "health windows must hold at least one sample",
            ));
        }
        if !(0.0..=1.0).contains(&self.health.degraded_error_rate)
            || !(0.0..=1.0).contains(&self.health.open_error_rate)
        {
            return Err(invalid(
                "GATEWAY_OPEN_ERROR_RATE",
                "error rates must fall within [0.0, 1.0]",
            ));
        }
        if self.health.open_error_rate < self.health.degraded_error_rate {
            return Err(invalid(
                "GATEWAY_OPEN_ERROR_RATE",
                "must be at least the degraded-error rate",
            ));
        }
        if self.health.cooldown_multiplier < 1.0 {
            return Err(invalid(
                "GATEWAY_CIRCUIT_COOLDOWN_MULTIPLIER",
                "must be at least 1.0",
            ));
        }
        if self.health.cooldown_max < self.health.cooldown_initial {
            return Err(invalid(
                "GATEWAY_CIRCUIT_COOLDOWN_MAX_SECS",
                "must be at least the initial cooldown",
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A setting or combination of settings is invalid.
    #[error("invalid configuration for {key}: {reason}")]
    InvalidValue {
        /// Environment variable controlling the setting.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_budget_stays_under_documented_limit() {
        let settings = RateLimitSettings::default();
        assert!(settings.max_weight < 1200);
        assert_eq!(settings.window, Duration::from_secs(60));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = ApiCredentials::new("key123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn validation_rejects_zero_weight() {
        let config = GatewayConfig {
            rate_limit: RateLimitSettings {
                max_weight: 0,
                ..RateLimitSettings::default()
            },
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_error_rates() {
        let mut config = GatewayConfig::default();
        config.health.degraded_error_rate = 0.8;
        config.health.open_error_rate = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_heartbeat_timeout_below_interval() {
        let mut config = GatewayConfig::default();
        config.stream.heartbeat_interval = Duration::from_secs(60);
        config.stream.heartbeat_timeout = Duration::from_secs(30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_fresh_age_above_servable_age() {
        let mut config = GatewayConfig::default();
        config.stream.fresh_tick_max_age = Duration::from_secs(60);
        config.stream.servable_tick_max_age = Duration::from_secs(30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn stream_defaults_are_consistent() {
        let settings = StreamSettings::default();
        assert!(settings.heartbeat_timeout > settings.heartbeat_interval);
        assert!(settings.reconnect_delay_max > settings.reconnect_delay_initial);
        assert!(settings.servable_tick_max_age > settings.fresh_tick_max_age);
    }
}
