//! Wire protocol between the Warlock agent and its panel.
//!
//! Every WebSocket text frame carries one [`Envelope`]: an event name, an
//! optional request id and a JSON payload. Requests that expect a reply
//! carry an id; the agent answers with an [`event::ACK`] envelope bearing
//! the same id. Everything else is fire-and-forget.
//!
//! Payloads of known events are modelled as typed structs; replies use the
//! uniform `{success: true, ...}` / `{success: false, error}` shape built
//! by the [`reply`] helpers.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod envelope;
pub mod metrics;
pub mod reply;
pub mod request;
pub mod stream;

pub use envelope::{Envelope, event};
pub use metrics::{
    CpuMetrics, DiskMetrics, MemoryMetrics, MetricsSnapshot, NetworkMetrics, ProcessMetrics,
};
pub use reply::{CommandOutput, DirEntry, Pong, Registration};
pub use request::{
    ExecRequest, FileListRequest, FileReadRequest, FileWriteRequest, ProtocolError, Request,
    ServiceControlRequest, StreamRequest, UpdateRequest,
};
pub use stream::StreamEvent;

/// Protocol version announced during the handshake and registration.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
