//! Typed inbound requests.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::envelope::{Envelope, event};

/// Default command timeout when the panel does not send one.
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

/// Errors turning an [`Envelope`] into a [`Request`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The event name is not one the agent handles.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The payload does not match the event's schema.
    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        /// Event whose payload was rejected.
        event: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// `command:exec` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecRequest {
    /// Shell command line.
    pub command: String,
    /// Timeout in milliseconds.
    #[serde(default, alias = "timeoutMs")]
    pub timeout: Option<u64>,
    /// Working directory.
    #[serde(default, alias = "workingDir")]
    pub cwd: Option<String>,
}

impl ExecRequest {
    /// Requested timeout, or [`DEFAULT_EXEC_TIMEOUT_MS`].
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT_MS)
    }
}

/// `command:stream` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamRequest {
    /// Correlates the stream's events with this request.
    #[serde(rename = "sessionId", alias = "streamId")]
    pub session_id: String,
    /// Shell command line.
    pub command: String,
    /// Working directory.
    #[serde(default, alias = "workingDir")]
    pub cwd: Option<String>,
}

/// `file:read` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileReadRequest {
    /// Absolute path.
    pub path: String,
    /// Content encoding, `utf8` when absent.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// `file:write` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileWriteRequest {
    /// Absolute path.
    pub path: String,
    /// Encoded content.
    pub content: String,
    /// Content encoding, `utf8` when absent.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// `file:list` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileListRequest {
    /// Directory path.
    pub path: String,
}

/// `service:control` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceControlRequest {
    /// systemd unit name.
    pub service: String,
    /// `start`, `stop`, `restart`, `status`, ...
    pub action: String,
}

/// `agent:update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateRequest {
    /// Version being installed (informational).
    pub version: String,
    /// URL of the release `.tar.gz`.
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `command:exec`
    Exec(ExecRequest),
    /// `command:stream`
    Stream(StreamRequest),
    /// `metrics:collect`
    CollectMetrics,
    /// `file:read`
    ReadFile(FileReadRequest),
    /// `file:write`
    WriteFile(FileWriteRequest),
    /// `file:list`
    ListDir(FileListRequest),
    /// `service:control`
    ServiceControl(ServiceControlRequest),
    /// `agent:update`
    Update(UpdateRequest),
    /// `ping`
    Ping,
}

impl Request {
    /// Decode the payload of `envelope` according to its event name.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownEvent`] for unhandled names,
    /// [`ProtocolError::InvalidPayload`] for schema mismatches.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let name = envelope.event.as_str();
        match name {
            event::COMMAND_EXEC => decode(envelope).map(Self::Exec),
            event::COMMAND_STREAM => decode(envelope).map(Self::Stream),
            event::METRICS_COLLECT => Ok(Self::CollectMetrics),
            event::FILE_READ => decode(envelope).map(Self::ReadFile),
            event::FILE_WRITE => decode(envelope).map(Self::WriteFile),
            event::FILE_LIST => decode(envelope).map(Self::ListDir),
            event::SERVICE_CONTROL => decode(envelope).map(Self::ServiceControl),
            event::AGENT_UPDATE => decode(envelope).map(Self::Update),
            event::PING => Ok(Self::Ping),
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }

    /// Wire name of this request kind.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Exec(_) => event::COMMAND_EXEC,
            Self::Stream(_) => event::COMMAND_STREAM,
            Self::CollectMetrics => event::METRICS_COLLECT,
            Self::ReadFile(_) => event::FILE_READ,
            Self::WriteFile(_) => event::FILE_WRITE,
            Self::ListDir(_) => event::FILE_LIST,
            Self::ServiceControl(_) => event::SERVICE_CONTROL,
            Self::Update(_) => event::AGENT_UPDATE,
            Self::Ping => event::PING,
        }
    }
}

fn decode<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    T::deserialize(&envelope.data).map_err(|source| ProtocolError::InvalidPayload {
        event: envelope.event.clone(),
        source,
    })
}
