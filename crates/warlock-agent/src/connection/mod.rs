//! Persistent connection to the panel.
//!
//! The [`ConnectionManager`] keeps one authenticated `WebSocket` open,
//! registers the agent on every connect and reconnects with backoff after
//! any transport failure. Retries are unbounded; only a shutdown signal
//! ends the loop.
//!
//! While connected, a single `select!` loop multiplexes:
//! - the shutdown signal (close frame, then return),
//! - inbound frames (each request handled on its own task),
//! - the process-lifetime outbound queue (replies only go out on the
//!   connection their request arrived on),
//! - the keepalive ping tick,
//! - the scheduled metrics push.

mod backoff;
mod delivery;
mod error;
mod keepalive;
mod transport;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use warlock_config::AgentConfig;
use warlock_protocol::{Envelope, Registration, event};

use self::backoff::Backoff;
use self::delivery::Delivery;
use self::keepalive::Keepalive;
use self::transport::{Handshake, PanelConnection, WsReader, WsWriter};
use crate::context::AgentContext;
use crate::dispatch;
use crate::outbound::Outgoing;

pub use self::error::ConnectionError;
pub use self::transport::{HOSTNAME_HEADER, VERSION_HEADER};

/// Close code the panel uses to reject the agent token.
pub const AUTH_REJECTED_CLOSE_CODE: u16 = 4001;

/// Default upgrade timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Default keepalive ping interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);
/// Default metrics push interval.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);
/// Default first reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default reconnect delay cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Bearer token presented during the upgrade.
    pub token: String,
    /// Agent version announced in headers and registration.
    pub version: String,
    /// Upgrade timeout.
    pub connect_timeout: Duration,
    /// Keepalive ping interval.
    pub keepalive_interval: Duration,
    /// Metrics push interval.
    pub metrics_interval: Duration,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Reconnect delay cap.
    pub backoff_max: Duration,
}

impl ConnectionConfig {
    /// Settings for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            version: crate::AGENT_VERSION.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    /// Settings derived from the agent configuration.
    #[must_use]
    pub fn from_agent(config: &AgentConfig) -> Self {
        Self::new(config.websocket_url(), config.agent_token.clone())
    }
}

/// Lifecycle of the panel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; waiting out a backoff delay or stopped.
    Disconnected,
    /// Upgrade in progress.
    Connecting,
    /// Registered and serving requests.
    Connected,
}

/// Maintains the panel connection for the life of the process.
pub struct ConnectionManager {
    config: ConnectionConfig,
    context: AgentContext,
    delivery: Delivery,
    shutdown_rx: broadcast::Receiver<()>,
    state_tx: watch::Sender<ConnectionState>,
    connects: u64,
}

impl ConnectionManager {
    /// Create a manager. Does not connect yet.
    ///
    /// `outbound_rx` is the receiving half of the queue behind
    /// `context.outbound`. A message on `shutdown_rx`, or dropping every
    /// sender, stops the manager.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        context: AgentContext,
        outbound_rx: mpsc::UnboundedReceiver<Outgoing>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            context,
            delivery: Delivery::new(outbound_rx),
            shutdown_rx,
            state_tx,
            connects: 0,
        }
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown, reconnecting after every failure.
    pub async fn run(&mut self) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);

        loop {
            let result = self.connect_and_run(&mut backoff).await;
            self.set_state(ConnectionState::Disconnected);

            match result {
                Ok(LoopAction::Shutdown) | Err(ConnectionError::Shutdown) => break,
                Ok(LoopAction::Reconnect) => {},
                Err(ConnectionError::AuthenticationRejected) => {
                    error!("Panel rejected the agent token, will keep retrying");
                },
                Err(e) => warn!(error = %e, "Panel connection error"),
            }

            let delay = backoff.next_delay();
            info!(
                delay_ms = delay.as_millis(),
                attempt = backoff.attempt(),
                "Reconnecting after backoff"
            );
            if self.sleep_or_shutdown(delay).await.is_err() {
                break;
            }
        }
        info!("Panel connection stopped");
    }

    /// Single connection attempt: connect, register, run the event loop.
    async fn connect_and_run(
        &mut self,
        backoff: &mut Backoff,
    ) -> Result<LoopAction, ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.config.url, "Connecting to panel");

        let handshake = Handshake {
            url: &self.config.url,
            token: &self.config.token,
            version: &self.config.version,
            hostname: &self.context.hostname,
        };
        let conn = tokio::select! {
            biased;
            _ = self.shutdown_rx.recv() => return Ok(LoopAction::Shutdown),
            result = PanelConnection::connect(&handshake, self.config.connect_timeout) => result?,
        };
        let (mut writer, mut reader) = conn.into_parts();

        let registration =
            Registration::for_host(self.config.version.as_str(), self.context.hostname.as_str());
        let envelope = Envelope::event(event::REGISTER, serde_json::to_value(&registration)?);
        transport::send_envelope(&mut writer, &envelope).await?;

        backoff.reset();
        self.connects = self.connects.saturating_add(1);
        self.set_state(ConnectionState::Connected);
        info!(
            connects = self.connects,
            hostname = %self.context.hostname,
            "Connected to panel"
        );

        self.event_loop(&mut writer, &mut reader).await
    }

    /// Serve one live connection until it fails or shutdown is requested.
    async fn event_loop(
        &mut self,
        writer: &mut WsWriter,
        reader: &mut WsReader,
    ) -> Result<LoopAction, ConnectionError> {
        let mut keepalive = Keepalive::new();
        let mut ping_tick = first_tick_after(self.config.keepalive_interval);
        let mut metrics_tick = first_tick_after(self.config.metrics_interval);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Panel connection received shutdown signal");
                    transport::close(writer, "agent shutting down").await;
                    return Ok(LoopAction::Shutdown);
                }

                msg = reader.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Pong(_))) => keepalive.pong_received(),
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map_or(1000, |f| f.code.into());
                            return Self::handle_close_code(code);
                        }
                        Some(Ok(Message::Ping(_) | Message::Binary(_) | Message::Frame(_))) => {
                            // Pings are answered by tungstenite; binary is not used.
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ConnectionError::StreamEnded),
                    }
                }

                Some(message) = self.delivery.next() => {
                    self.delivery.send(writer, message, self.connects).await?;
                }

                _ = ping_tick.tick() => {
                    match keepalive.next_ping() {
                        Some(payload) => writer.send(Message::Ping(payload.into())).await?,
                        None => return Err(ConnectionError::Zombie),
                    }
                }

                _ = metrics_tick.tick() => {
                    dispatch::spawn_metrics_push(&self.context);
                }
            }
        }
    }

    /// Decode an inbound text frame and hand it to the dispatcher.
    fn handle_text(&self, text: &str) {
        match Envelope::from_json(text) {
            Ok(envelope) if envelope.is_ack() => {
                debug!(id = ?envelope.id, "Ignoring ack from panel");
            },
            Ok(envelope) => {
                dispatch::spawn(self.context.clone(), self.connects, envelope);
            },
            Err(e) => warn!(error = %e, "Failed to parse panel message"),
        }
    }

    /// Classify a close code from the panel.
    fn handle_close_code(code: u16) -> Result<LoopAction, ConnectionError> {
        match code {
            AUTH_REJECTED_CLOSE_CODE => Err(ConnectionError::AuthenticationRejected),
            1000 | 1001 => {
                info!(code, "Panel closed the connection");
                Ok(LoopAction::Reconnect)
            },
            _ => Err(ConnectionError::Closed(code)),
        }
    }

    /// Sleep for a duration, or return early on shutdown.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> Result<(), ConnectionError> {
        tokio::select! {
            biased;
            _ = self.shutdown_rx.recv() => {
                Err(ConnectionError::Shutdown)
            }
            () = tokio::time::sleep(duration) => {
                Ok(())
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = ?*current, to = ?state, "Connection state changed");
                *current = state;
                true
            }
        });
    }
}

/// Interval whose first tick is one `period` from now rather than immediate.
fn first_tick_after(period: Duration) -> Interval {
    let start = Instant::now()
        .checked_add(period)
        .unwrap_or_else(Instant::now);
    let mut tick = tokio::time::interval_at(start, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// What the outer reconnection loop should do next.
#[derive(Debug)]
enum LoopAction {
    /// Graceful shutdown.
    Shutdown,
    /// Orderly close from the panel; reconnect after backoff.
    Reconnect,
}
