//! Error types for the panel connection.

use std::time::Duration;

/// Errors produced by the panel connection. None of them are fatal: the
/// manager logs each one and reconnects after a backoff delay.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization error for an outbound envelope.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The upgrade did not complete in time.
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A handshake header could not be built from the configuration.
    #[error("Invalid handshake header {name}: {message}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// The panel closed the connection with a code.
    #[error("Connection closed with code {0}")]
    Closed(u16),

    /// The panel rejected the agent token (close code 4001).
    #[error("Authentication rejected by panel (close code 4001)")]
    AuthenticationRejected,

    /// A keepalive ping went unanswered for a full interval.
    #[error("No pong received within the keepalive interval")]
    Zombie,

    /// The socket ended without a close frame.
    #[error("WebSocket stream ended")]
    StreamEnded,

    /// Shutdown was requested.
    #[error("Shutdown requested")]
    Shutdown,
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ConnectionError::AuthenticationRejected;
        assert!(err.to_string().contains("4001"));

        let err = ConnectionError::ConnectTimeout(Duration::from_secs(20));
        assert!(err.to_string().contains("20s"));

        let err = ConnectionError::Zombie;
        assert!(err.to_string().contains("pong"));

        let err = ConnectionError::InvalidHeader {
            name: "Authorization",
            message: "control character".into(),
        };
        assert!(err.to_string().contains("Authorization"));
    }

    #[test]
    fn closed_error_carries_code() {
        let err = ConnectionError::Closed(1011);
        assert!(err.to_string().contains("1011"));
    }
}
