//! Frame envelope and event names.

use serde::{Deserialize, Serialize};

/// Event names used on the wire.
pub mod event {
    /// Reply to a request carrying an id (agent → panel).
    pub const ACK: &str = "ack";
    /// Sent once per successful connection (agent → panel).
    pub const REGISTER: &str = "agent:register";
    /// Bounded command execution.
    pub const COMMAND_EXEC: &str = "command:exec";
    /// Start a streamed subprocess.
    pub const COMMAND_STREAM: &str = "command:stream";
    /// Streamed stdout chunk (agent → panel).
    pub const STREAM_STDOUT: &str = "stream:stdout";
    /// Streamed stderr chunk (agent → panel).
    pub const STREAM_STDERR: &str = "stream:stderr";
    /// Stream terminated with an exit code (agent → panel).
    pub const STREAM_CLOSE: &str = "stream:close";
    /// Stream failed before closing (agent → panel).
    pub const STREAM_ERROR: &str = "stream:error";
    /// On-demand metrics snapshot.
    pub const METRICS_COLLECT: &str = "metrics:collect";
    /// Scheduled metrics snapshot (agent → panel).
    pub const METRICS_PUSH: &str = "metrics:push";
    /// Read a file.
    pub const FILE_READ: &str = "file:read";
    /// Write a file.
    pub const FILE_WRITE: &str = "file:write";
    /// List a directory.
    pub const FILE_LIST: &str = "file:list";
    /// systemctl wrapper.
    pub const SERVICE_CONTROL: &str = "service:control";
    /// Download, unpack and restart.
    pub const AGENT_UPDATE: &str = "agent:update";
    /// Liveness probe.
    pub const PING: &str = "ping";
}

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, see [`event`].
    pub event: String,
    /// Request id; present when the sender expects an [`event::ACK`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// A fire-and-forget event.
    #[must_use]
    pub fn event(name: &str, data: serde_json::Value) -> Self {
        Self {
            event: name.to_owned(),
            id: None,
            data,
        }
    }

    /// A reply to request `id`.
    #[must_use]
    pub fn ack(id: u64, data: serde_json::Value) -> Self {
        Self {
            event: event::ACK.to_owned(),
            id: Some(id),
            data,
        }
    }

    /// A request expecting a reply. Used by tests and tooling that play the
    /// panel side.
    #[must_use]
    pub fn request(name: &str, id: u64, data: serde_json::Value) -> Self {
        Self {
            event: name.to_owned(),
            id: Some(id),
            data,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid envelope.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Returns `true` if this is a reply.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.event == event::ACK
    }
}
