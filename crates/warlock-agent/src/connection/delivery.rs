//! Draining the outbound queue into a live socket.

use futures::Sink;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use super::error::ConnectionError;
use super::transport;
use crate::outbound::Outgoing;

/// Receiving side of the outbound queue, plus the message whose send
/// failed. That message goes out first on the next connection.
pub(crate) struct Delivery {
    rx: mpsc::UnboundedReceiver<Outgoing>,
    retry: Option<Outgoing>,
}

impl Delivery {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Outgoing>) -> Self {
        Self { rx, retry: None }
    }

    /// Next message to send. Cancel-safe.
    pub(crate) async fn next(&mut self) -> Option<Outgoing> {
        if let Some(message) = self.retry.take() {
            return Some(message);
        }
        self.rx.recv().await
    }

    /// Send `message` on connection number `connection`.
    ///
    /// Replies to requests from an earlier connection are dropped. On a
    /// transport error the message is kept for the next connection.
    pub(crate) async fn send<S>(
        &mut self,
        writer: &mut S,
        message: Outgoing,
        connection: u64,
    ) -> Result<(), ConnectionError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if message.is_stale(connection) {
            debug!(
                id = ?message.envelope.id,
                connection,
                "Dropping reply to a request from an earlier connection"
            );
            return Ok(());
        }
        match transport::send_envelope(writer, &message.envelope).await {
            Err(e @ ConnectionError::WebSocket(_)) => {
                self.retry = Some(message);
                Err(e)
            },
            other => other,
        }
    }
}
