//! Envelope encode/decode with strict discriminator validation.

use serde_json::Value;
use thiserror::Error;

use crate::message::{ClientMessage, ServerMessage};

/// Discriminators the client is allowed to emit.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "start",
    "input",
    "permission_response",
    "question_response",
    "interrupt",
    "stop",
    "subscribe_sessions",
    "set_model",
    "set_permission_mode",
    "cancel_queued",
    "retry",
    "ping",
];

/// Discriminators the server is allowed to emit.
pub const SERVER_MESSAGE_TYPES: &[&str] = &[
    "connected",
    "stream",
    "session_event",
    "history",
    "model_changed",
    "permission_mode_changed",
    "queued",
    "queue_cleared",
    "error",
    "pong",
    "stopped",
    "interrupted",
];

/// Second-level discriminators allowed inside a `stream` envelope.
pub const STREAM_CONTENT_TYPES: &[&str] = &[
    "assistant",
    "user",
    "system",
    "thinking",
    "tool_use",
    "tool_result",
    "progress",
    "usage",
    "state",
    "subagent_start",
    "subagent_complete",
    "question",
    "permission",
];

/// Structured wire failure. Callers surface or log these; they are never
/// coerced into a default message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unrecognized_message:{kind}")]
    UnrecognizedMessage { kind: String },
    #[error("unrecognized_stream_content:{kind}")]
    UnrecognizedStreamContent { kind: String },
    #[error("missing_type_discriminator")]
    MissingType,
    #[error("malformed_payload:{detail}")]
    Malformed { detail: String },
    #[error("invalid_utf8")]
    InvalidUtf8,
    #[error("encode_failed:{detail}")]
    Encode { detail: String },
}

/// Encode a client message to its JSON wire bytes.
pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>, DecodeError> {
    serde_json::to_vec(message).map_err(|err| DecodeError::Encode {
        detail: err.to_string(),
    })
}

/// Encode a client message to a JSON string.
pub fn encode_client_string(message: &ClientMessage) -> Result<String, DecodeError> {
    serde_json::to_string(message).map_err(|err| DecodeError::Encode {
        detail: err.to_string(),
    })
}

/// Decode one server message from raw bytes.
pub fn decode_server(bytes: &[u8]) -> Result<ServerMessage, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    decode_server_str(text)
}

/// Decode one server message from a JSON string.
///
/// Dispatch is purely on the `type` field, with a second-level dispatch on
/// the nested message for `stream` envelopes. An unknown discriminator at
/// either level is a hard failure.
pub fn decode_server_str(text: &str) -> Result<ServerMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|err| DecodeError::Malformed {
        detail: err.to_string(),
    })?;

    let kind = discriminator(&value)?;
    if !SERVER_MESSAGE_TYPES.contains(&kind) {
        return Err(DecodeError::UnrecognizedMessage {
            kind: kind.to_string(),
        });
    }

    if kind == "stream" {
        let nested = value
            .get("message")
            .ok_or_else(|| DecodeError::Malformed {
                detail: "stream envelope without message".to_string(),
            })?;
        let nested_kind = discriminator(nested)?;
        if !STREAM_CONTENT_TYPES.contains(&nested_kind) {
            return Err(DecodeError::UnrecognizedStreamContent {
                kind: nested_kind.to_string(),
            });
        }
    }

    serde_json::from_value(value).map_err(|err| DecodeError::Malformed {
        detail: err.to_string(),
    })
}

fn discriminator(value: &Value) -> Result<&str, DecodeError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)
}
