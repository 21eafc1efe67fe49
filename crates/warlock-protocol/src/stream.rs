//! Stream session events (agent → panel).

use serde_json::json;

use crate::envelope::{Envelope, event};

/// One event of a streamed subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk read from stdout.
    Stdout {
        /// Session the chunk belongs to.
        session_id: String,
        /// Chunk text (lossy UTF-8).
        data: String,
    },
    /// A chunk read from stderr.
    Stderr {
        /// Session the chunk belongs to.
        session_id: String,
        /// Chunk text (lossy UTF-8).
        data: String,
    },
    /// The process exited. `code` is `None` when it was killed by a signal.
    Closed {
        /// Session that finished.
        session_id: String,
        /// Exit code.
        code: Option<i32>,
    },
    /// The process could not be spawned or faulted before exiting.
    Errored {
        /// Session that failed.
        session_id: String,
        /// Failure reason.
        error: String,
    },
}

impl StreamEvent {
    /// Session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Stdout { session_id, .. }
            | Self::Stderr { session_id, .. }
            | Self::Closed { session_id, .. }
            | Self::Errored { session_id, .. } => session_id,
        }
    }

    /// `true` for [`StreamEvent::Closed`] and [`StreamEvent::Errored`].
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Errored { .. })
    }

    /// Wire envelope for this event.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::Stdout { session_id, data } => Envelope::event(
                event::STREAM_STDOUT,
                json!({ "sessionId": session_id, "data": data }),
            ),
            Self::Stderr { session_id, data } => Envelope::event(
                event::STREAM_STDERR,
                json!({ "sessionId": session_id, "data": data }),
            ),
            Self::Closed { session_id, code } => Envelope::event(
                event::STREAM_CLOSE,
                json!({ "sessionId": session_id, "code": code }),
            ),
            Self::Errored { session_id, error } => Envelope::event(
                event::STREAM_ERROR,
                json!({ "sessionId": session_id, "error": error }),
            ),
        }
    }
}
