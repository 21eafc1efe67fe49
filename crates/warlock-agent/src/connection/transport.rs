//! `WebSocket` connection to the panel.
//!
//! Builds the authenticated upgrade request and performs the handshake
//! under a timeout.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use warlock_protocol::Envelope;

use super::error::ConnectionError;

/// Header carrying the agent version.
pub const VERSION_HEADER: &str = "x-warlock-agent-version";
/// Header carrying the host name.
pub const HOSTNAME_HEADER: &str = "x-warlock-agent-hostname";

/// Type alias for the `WebSocket` stream to the panel.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half of the panel socket.
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
/// Read half of the panel socket.
pub(crate) type WsReader = SplitStream<WsStream>;

/// What the agent presents during the upgrade.
#[derive(Debug, Clone)]
pub(crate) struct Handshake<'a> {
    pub(crate) url: &'a str,
    pub(crate) token: &'a str,
    pub(crate) version: &'a str,
    pub(crate) hostname: &'a str,
}

impl Handshake<'_> {
    /// The upgrade request with auth and identification headers.
    pub(crate) fn request(&self) -> Result<Request, ConnectionError> {
        let mut request = self.url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            header_value("Authorization", &format!("Bearer {}", self.token))?,
        );
        headers.insert(VERSION_HEADER, header_value(VERSION_HEADER, self.version)?);
        headers.insert(HOSTNAME_HEADER, header_value(HOSTNAME_HEADER, self.hostname)?);
        Ok(request)
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, ConnectionError> {
    HeaderValue::from_str(value).map_err(|e| ConnectionError::InvalidHeader {
        name,
        message: e.to_string(),
    })
}

/// A live `WebSocket` connection to the panel.
pub(crate) struct PanelConnection {
    writer: WsWriter,
    reader: WsReader,
}

impl PanelConnection {
    /// Perform the upgrade, failing after `timeout`.
    pub(crate) async fn connect(
        handshake: &Handshake<'_>,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let request = handshake.request()?;
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout(timeout))??;
        let (writer, reader) = ws.split();
        Ok(Self { writer, reader })
    }

    /// Take the split halves for use with `tokio::select!`.
    pub(crate) fn into_parts(self) -> (WsWriter, WsReader) {
        (self.writer, self.reader)
    }
}

/// Send one envelope as a JSON text frame.
pub(crate) async fn send_envelope<S>(
    writer: &mut S,
    envelope: &Envelope,
) -> Result<(), ConnectionError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = envelope.to_json()?;
    writer.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Send a normal close frame. Errors are ignored; the socket is going away.
pub(crate) async fn close(writer: &mut WsWriter, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_owned().into(),
    };
    if let Err(e) = writer.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Close frame not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake<'a>(token: &'a str) -> Handshake<'a> {
        Handshake {
            url: "wss://panel.example/agent",
            token,
            version: "1.2.3",
            hostname: "web-01",
        }
    }

    #[test]
    fn request_carries_identity_headers() {
        let request = handshake("s3cret").request().unwrap();
        let headers = request.headers();
        assert_eq!(headers[AUTHORIZATION], "Bearer s3cret");
        assert_eq!(headers[VERSION_HEADER], "1.2.3");
        assert_eq!(headers[HOSTNAME_HEADER], "web-01");
        assert_eq!(request.uri().host(), Some("panel.example"));
    }

    #[test]
    fn control_characters_in_token_are_rejected() {
        let err = handshake("bad\ntoken").request().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::InvalidHeader {
                name: "Authorization",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_panel_fails_fast() {
        // Port 9 (discard) on localhost is closed in test environments.
        let hs = Handshake {
            url: "ws://127.0.0.1:9/agent",
            token: "t",
            version: "1",
            hostname: "h",
        };
        let result = PanelConnection::connect(&hs, Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
