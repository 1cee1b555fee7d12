//! Channel Failure Mapping
//!
//! The single place that knows how channel-specific failures translate
//! into the taxonomy. Both channels route their transport, status and
//! exchange-body failures through here so classification rules never
//! drift apart.

use std::time::Duration;

use tokio_tungstenite::tungstenite::Error as WsError;

use crate::domain::market::{ChannelKind, SymbolError};
use crate::errors::GatewayError;

/// Maps an HTTP response status to the taxonomy.
///
/// `418` is included with `429` because the exchange escalates repeated
/// rate-limit breaches to a temporary IP ban under that status.
#[must_use]
pub fn http_status(
    channel: ChannelKind,
    status: u16,
    retry_after: Option<Duration>,
    detail: &str,
) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Auth {
            channel,
            message: format!("status {status}: {detail}"),
        },
        418 | 429 => GatewayError::RateLimitExceeded {
            channel,
            retry_after,
        },
        408 | 500..=599 => GatewayError::TransientNetwork {
            channel,
            message: format!("status {status}: {detail}"),
        },
        _ => GatewayError::Protocol {
            channel,
            message: format!("unexpected status {status}: {detail}"),
        },
    }
}

/// Maps an exchange error body (`{"code": .., "msg": ..}`) to the
/// taxonomy.
#[must_use]
pub fn exchange_code(channel: ChannelKind, code: i64, message: &str) -> GatewayError {
    match code {
        // TOO_MANY_REQUESTS
        -1003 => GatewayError::RateLimitExceeded {
            channel,
            retry_after: None,
        },
        // UNAUTHORIZED and API-key rejections
        -1002 | -2014 | -2015 => GatewayError::Auth {
            channel,
            message: format!("code {code}: {message}"),
        },
        // Request validation range: bad symbol, bad interval, missing
        // or malformed parameters.
        -1199..=-1100 => GatewayError::InvalidRequest {
            message: format!("exchange rejected request (code {code}): {message}"),
        },
        _ => GatewayError::Protocol {
            channel,
            message: format!("unexpected exchange error code {code}: {message}"),
        },
    }
}

/// Maps a client-side HTTP transport failure to the taxonomy.
#[must_use]
pub fn transport(channel: ChannelKind, error: &reqwest::Error) -> GatewayError {
    if let Some(status) = error.status() {
        return http_status(channel, status.as_u16(), None, "request failed");
    }
    if error.is_decode() || error.is_body() {
        return GatewayError::Protocol {
            channel,
            message: format!("response body unreadable: {error}"),
        };
    }
    GatewayError::TransientNetwork {
        channel,
        message: error.to_string(),
    }
}

/// Maps a websocket transport failure to the taxonomy.
#[must_use]
pub fn websocket(channel: ChannelKind, error: &WsError) -> GatewayError {
    match error {
        WsError::Http(response) => http_status(
            channel,
            response.status().as_u16(),
            None,
            "websocket handshake rejected",
        ),
        WsError::Protocol(violation) => GatewayError::Protocol {
            channel,
            message: format!("websocket protocol violation: {violation}"),
        },
        WsError::Capacity(limit) => GatewayError::Protocol {
            channel,
            message: format!("websocket frame over capacity: {limit}"),
        },
        WsError::AttackAttempt => GatewayError::Protocol {
            channel,
            message: "websocket attack attempt detected".into(),
        },
        WsError::ConnectionClosed | WsError::AlreadyClosed => GatewayError::TransientNetwork {
            channel,
            message: "websocket connection closed".into(),
        },
        other => GatewayError::TransientNetwork {
            channel,
            message: other.to_string(),
        },
    }
}

/// Maps a rejected caller-supplied symbol to the taxonomy.
#[must_use]
pub fn symbol(error: &SymbolError) -> GatewayError {
    GatewayError::InvalidRequest {
        message: error.to_string(),
    }
}

/// Parses a `Retry-After` header value expressed in whole seconds.
#[must_use]
pub fn retry_after_header(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
