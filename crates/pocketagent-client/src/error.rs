//! Connection error taxonomy.
//!
//! Server-reported codes and transport failures collapse into one closed set.
//! The retry policy keys off [`ConnectionError::is_retryable`] and
//! [`ConnectionError::requires_user_action`]; the presentation layer keys off
//! the variant itself.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("server_at_capacity")]
    ServerAtCapacity,
    #[error("agent_timed_out")]
    AgentTimedOut,
    #[error("connection_replaced")]
    ConnectionReplaced,
    #[error("queue_full")]
    QueueFull,
    #[error("rate_limited")]
    RateLimited { retry_after_seconds: Option<u64> },
    #[error("reconnect_failed")]
    ReconnectFailed,
    #[error("network_unavailable")]
    NetworkUnavailable,
    #[error("invalid_server_url:{url}")]
    InvalidServerUrl { url: String },
    #[error("session_not_found")]
    SessionNotFound,
    #[error("session_invalid")]
    SessionInvalid,
    #[error("session_expired")]
    SessionExpired,
    #[error("authentication_failed")]
    AuthenticationFailed,
    #[error("server_error_{code}:{message}")]
    ServerError {
        code: String,
        message: String,
        recoverable: bool,
    },
    #[error("connection_failed:{detail}")]
    ConnectionFailed { detail: String },
    #[error("protocol_error:{detail}")]
    ProtocolError { detail: String },
    #[error("not_connected")]
    NotConnected,
    #[error("unknown:{detail}")]
    Unknown { detail: String },
}

impl ConnectionError {
    /// Map a snake_case server error code to its semantic kind. Unknown codes
    /// become [`ConnectionError::ServerError`] when the server flags
    /// recoverability, otherwise [`ConnectionError::ProtocolError`].
    #[must_use]
    pub fn classify_server_code(
        code: &str,
        message: &str,
        recoverable: Option<bool>,
        retry_after_seconds: Option<u64>,
    ) -> Self {
        match code {
            "max_agents_reached" | "server_at_capacity" => Self::ServerAtCapacity,
            "agent_timeout" | "agent_timed_out" => Self::AgentTimedOut,
            "connection_replaced" | "cursor_evicted" => Self::ConnectionReplaced,
            "queue_full" => Self::QueueFull,
            "rate_limited" => Self::RateLimited {
                retry_after_seconds,
            },
            "network_unavailable" => Self::NetworkUnavailable,
            "session_not_found" => Self::SessionNotFound,
            "session_invalid" => Self::SessionInvalid,
            "session_expired" => Self::SessionExpired,
            "auth_failed" | "authentication_failed" | "unauthorized" => Self::AuthenticationFailed,
            _ => match recoverable {
                Some(flag) => Self::ServerError {
                    code: code.to_string(),
                    message: message.to_string(),
                    recoverable: flag,
                },
                None => Self::ProtocolError {
                    detail: format!("{code}:{message}"),
                },
            },
        }
    }

    /// Wrap a raw transport failure that has no more specific mapping.
    #[must_use]
    pub fn from_transport(detail: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            detail: detail.into(),
        }
    }

    /// Whether the automatic retry loop may keep going after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerAtCapacity
            | Self::AgentTimedOut
            | Self::QueueFull
            | Self::RateLimited { .. }
            | Self::NetworkUnavailable
            | Self::ConnectionFailed { .. }
            | Self::Unknown { .. } => true,
            Self::ServerError { recoverable, .. } => *recoverable,
            Self::ConnectionReplaced
            | Self::ReconnectFailed
            | Self::InvalidServerUrl { .. }
            | Self::SessionNotFound
            | Self::SessionInvalid
            | Self::SessionExpired
            | Self::AuthenticationFailed
            | Self::ProtocolError { .. }
            | Self::NotConnected => false,
        }
    }

    /// Whether the user has to act before another attempt makes sense.
    /// Errors with this flag halt automatic retry even when retryable after
    /// a wait (rate limiting).
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Self::ConnectionReplaced
                | Self::RateLimited { .. }
                | Self::InvalidServerUrl { .. }
                | Self::SessionNotFound
                | Self::SessionInvalid
                | Self::SessionExpired
                | Self::AuthenticationFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_semantic_kinds() {
        let cases = [
            ("max_agents_reached", ConnectionError::ServerAtCapacity),
            ("agent_timeout", ConnectionError::AgentTimedOut),
            ("connection_replaced", ConnectionError::ConnectionReplaced),
            ("cursor_evicted", ConnectionError::ConnectionReplaced),
            ("queue_full", ConnectionError::QueueFull),
            ("session_not_found", ConnectionError::SessionNotFound),
            ("session_invalid", ConnectionError::SessionInvalid),
            ("session_expired", ConnectionError::SessionExpired),
            ("auth_failed", ConnectionError::AuthenticationFailed),
        ];
        for (code, expected) in cases {
            assert_eq!(
                ConnectionError::classify_server_code(code, "", None, None),
                expected,
                "code {code}"
            );
        }
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        assert_eq!(
            ConnectionError::classify_server_code("rate_limited", "slow down", None, Some(30)),
            ConnectionError::RateLimited {
                retry_after_seconds: Some(30)
            }
        );
    }

    #[test]
    fn unknown_codes_become_protocol_errors() {
        assert_eq!(
            ConnectionError::classify_server_code("entropy_reversed", "oh no", None, None),
            ConnectionError::ProtocolError {
                detail: "entropy_reversed:oh no".to_string()
            }
        );
    }

    #[test]
    fn unknown_codes_with_recoverable_flag_become_server_errors() {
        let err = ConnectionError::classify_server_code("disk_pressure", "busy", Some(true), None);
        assert_eq!(
            err,
            ConnectionError::ServerError {
                code: "disk_pressure".to_string(),
                message: "busy".to_string(),
                recoverable: true,
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn retry_and_user_action_predicates() {
        assert!(ConnectionError::ServerAtCapacity.is_retryable());
        assert!(ConnectionError::NetworkUnavailable.is_retryable());
        assert!(
            ConnectionError::RateLimited {
                retry_after_seconds: None
            }
            .is_retryable()
        );
        assert!(!ConnectionError::SessionInvalid.is_retryable());
        assert!(!ConnectionError::AuthenticationFailed.is_retryable());

        assert!(ConnectionError::ConnectionReplaced.requires_user_action());
        assert!(
            ConnectionError::RateLimited {
                retry_after_seconds: Some(5)
            }
            .requires_user_action()
        );
        assert!(!ConnectionError::ServerAtCapacity.requires_user_action());
        assert!(
            !ConnectionError::ConnectionFailed {
                detail: "reset".to_string()
            }
            .requires_user_action()
        );
    }
}
