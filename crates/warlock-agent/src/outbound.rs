//! Process-lifetime outbound message queue.
//!
//! Producers (request tasks, stream sessions, the metrics timer) push
//! envelopes here; the connected loop drains them into the socket. The
//! queue outlives individual connections, so events produced while
//! disconnected are delivered after the next successful connect. Replies
//! are tagged with the connection their request arrived on and are only
//! delivered on that connection.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use warlock_protocol::{Envelope, StreamEvent};

/// A queued envelope.
#[derive(Debug, Clone)]
pub struct Outgoing {
    /// The message itself.
    pub envelope: Envelope,
    /// Connection a reply answers; `None` for events, which any
    /// connection may carry.
    pub connection: Option<u64>,
}

impl Outgoing {
    /// Whether this is a reply to a request from a connection other than
    /// `current`. Request ids are only meaningful per connection.
    #[must_use]
    pub fn is_stale(&self, current: u64) -> bool {
        self.connection.is_some_and(|c| c != current)
    }
}

/// Cloneable sending half of the outbound queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbound {
    /// Create the queue, returning the handle and the receiver the
    /// connection manager drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event envelope.
    pub fn send(&self, envelope: Envelope) {
        self.push(Outgoing {
            envelope,
            connection: None,
        });
    }

    /// Queue a fire-and-forget event.
    pub fn emit(&self, event: &str, data: Value) {
        self.send(Envelope::event(event, data));
    }

    /// Queue the reply to request `id` received on `connection`.
    pub fn reply(&self, connection: u64, id: u64, data: Value) {
        self.push(Outgoing {
            envelope: Envelope::ack(id, data),
            connection: Some(connection),
        });
    }

    /// Queue a stream session event.
    pub fn stream(&self, event: StreamEvent) {
        self.send(event.into_envelope());
    }

    fn push(&self, message: Outgoing) {
        if self.tx.send(message).is_err() {
            debug!("Outbound queue closed, dropping message");
        }
    }
}
