//! WebSocket ping/pong keepalive for zombie connection detection.
//!
//! A ping frame goes out every interval. If the pong for the previous ping
//! has not arrived by the time the next is due, the connection is a zombie
//! and the event loop drops it.

use tracing::trace;

/// Tracks whether the last ping was answered.
#[derive(Debug)]
pub(crate) struct Keepalive {
    /// Whether we received a pong for the last ping we sent.
    last_pong_received: bool,
    /// Pings sent on this connection; used as the ping payload.
    sent: u64,
}

impl Keepalive {
    /// Fresh state: no ping outstanding.
    pub(super) fn new() -> Self {
        Self {
            last_pong_received: true,
            sent: 0,
        }
    }

    /// Record that a pong frame arrived.
    pub(super) fn pong_received(&mut self) {
        self.last_pong_received = true;
        trace!(sent = self.sent, "Keepalive pong received");
    }

    /// Payload for the next ping, or `None` if the previous one is still
    /// unanswered.
    pub(super) fn next_ping(&mut self) -> Option<Vec<u8>> {
        if !self.last_pong_received {
            return None;
        }
        self.last_pong_received = false;
        self.sent = self.sent.wrapping_add(1);
        Some(self.sent.to_be_bytes().to_vec())
    }
}
