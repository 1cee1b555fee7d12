//! Stream Frame Codec
//!
//! Decodes inbound websocket text frames into typed [`StreamFrame`]s and
//! encodes outbound subscription requests.
//!
//! Binance multiplexes three frame shapes over one socket: data events
//! carrying an `"e"` event-type discriminator, command acknowledgments
//! carrying `"result"` and `"id"`, and error frames carrying `"error"`.
//! Dispatch inspects those fields on a parsed [`serde_json::Value`]
//! before committing to a typed deserialization.

use serde::Serialize;
use thiserror::Error;

use super::messages::{CommandAck, StreamErrorFrame, TickerEvent};

/// Errors from decoding or encoding stream frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame carried an event type this codec does not handle.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Frame matched none of the known shapes.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// 24h ticker event for a subscribed symbol.
    Ticker(TickerEvent),
    /// Acknowledgment of a subscription management request.
    Ack(CommandAck),
    /// Error response to a request.
    Error(StreamErrorFrame),
}

/// JSON codec for the exchange websocket protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCodec;

impl StreamCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a single inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] on malformed JSON,
    /// [`CodecError::UnknownEventType`] for data events this codec does
    /// not handle, and [`CodecError::InvalidFormat`] when the frame
    /// matches no known shape.
    pub fn decode(&self, text: &str) -> Result<StreamFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        if let Some(event_type) = value.get("e").and_then(|e| e.as_str()) {
            return match event_type {
                "24hrTicker" => {
                    let event: TickerEvent = serde_json::from_value(value)?;
                    Ok(StreamFrame::Ticker(event))
                }
                other => Err(CodecError::UnknownEventType(other.to_string())),
            };
        }

        // Error frames also carry "id", so check for "error" first.
        if value.get("error").is_some() {
            let frame: StreamErrorFrame = serde_json::from_value(value)?;
            return Ok(StreamFrame::Error(frame));
        }

        if value.get("id").is_some() && value.as_object().is_some_and(|o| o.contains_key("result"))
        {
            let ack: CommandAck = serde_json::from_value(value)?;
            return Ok(StreamFrame::Ack(ack));
        }

        Err(CodecError::InvalidFormat(truncate(text, 200)))
    }

    /// Encode an outbound request as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialization fails.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

/// Truncate a frame for inclusion in error messages and logs.
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::super::messages::StreamRequest;
    use super::*;

    #[test]
    fn decodes_ticker_event() {
        let codec = StreamCodec::new();
        let frame = codec
            .decode(r#"{"e":"24hrTicker","E":1672515782136,"s":"BTCUSDT","c":"16750.0"}"#)
            .unwrap();
        match frame {
            StreamFrame::Ticker(event) => {
                assert_eq!(event.symbol, "BTCUSDT");
                assert_eq!(event.last_price.as_deref(), Some("16750.0"));
            }
            other => panic!("expected ticker frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_command_ack() {
        let codec = StreamCodec::new();
        let frame = codec.decode(r#"{"result":null,"id":12}"#).unwrap();
        assert_eq!(
            frame,
            StreamFrame::Ack(CommandAck {
                result: None,
                id: 12
            })
        );
    }

    #[test]
    fn decodes_error_frame() {
        let codec = StreamCodec::new();
        let frame = codec
            .decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":4}"#)
            .unwrap();
        match frame {
            StreamFrame::Error(err) => {
                assert_eq!(err.error.code, 2);
                assert_eq!(err.id, Some(4));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let codec = StreamCodec::new();
        let result = codec.decode(r#"{"e":"kline","E":1,"s":"BTCUSDT"}"#);
        assert!(matches!(result, Err(CodecError::UnknownEventType(t)) if t == "kline"));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let codec = StreamCodec::new();
        let result = codec.decode(r#"{"hello":"world"}"#);
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        let codec = StreamCodec::new();
        assert!(matches!(
            codec.decode("{not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn encodes_subscribe_request() {
        let codec = StreamCodec::new();
        let json = codec
            .encode(&StreamRequest::subscribe(
                vec!["ethusdt@ticker".to_string()],
                3,
            ))
            .unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["ethusdt@ticker"],"id":3}"#
        );
    }

    #[test]
    fn truncates_long_invalid_frames_in_error() {
        let codec = StreamCodec::new();
        let long = format!("{{\"x\":\"{}\"}}", "a".repeat(500));
        match codec.decode(&long) {
            Err(CodecError::InvalidFormat(snippet)) => {
                assert!(snippet.len() <= 204);
                assert!(snippet.ends_with("..."));
            }
            other => panic!("expected invalid format, got {other:?}"),
        }
    }
}
