//! In-process fake panel for connection tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use warlock_agent::{
    AgentContext, CommandExecutor, ConnectionConfig, ConnectionManager, ConnectionState,
    MetricsCollector, MetricsError, Outbound, ResultCache, StreamManager, TelemetrySource,
    Updater,
};
use warlock_protocol::{
    CpuMetrics, DiskMetrics, Envelope, MemoryMetrics, NetworkMetrics, ProcessMetrics,
};

/// How long any single panel-side wait may take.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed metrics so tests never touch the host.
pub struct StaticSource;

impl TelemetrySource for StaticSource {
    fn cpu(&self) -> Result<CpuMetrics, MetricsError> {
        Ok(CpuMetrics {
            usage_percent: 5.0,
            core_count: 2,
        })
    }

    fn memory(&self) -> Result<MemoryMetrics, MetricsError> {
        Ok(MemoryMetrics {
            total: 1024,
            used: 512,
            free: 512,
            usage_percent: 50.0,
        })
    }

    fn disks(&self) -> Result<Vec<DiskMetrics>, MetricsError> {
        Ok(vec![])
    }

    fn network(&self) -> Result<Vec<NetworkMetrics>, MetricsError> {
        Ok(vec![])
    }

    fn processes(&self) -> Result<ProcessMetrics, MetricsError> {
        Ok(ProcessMetrics {
            total: 3,
            running: 1,
            blocked: 0,
            sleeping: 2,
        })
    }

    fn uptime(&self) -> Result<u64, MetricsError> {
        Ok(42)
    }
}

/// Listening side of the fake panel.
pub struct FakePanel {
    listener: TcpListener,
    /// `ws://` URL the agent should connect to.
    pub url: String,
}

impl FakePanel {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            url: format!("ws://{addr}/agent"),
        }
    }

    /// Accept the next agent connection and complete the upgrade.
    pub async fn accept(&self) -> PanelSide {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("agent did not connect in time")
            .unwrap();

        let mut headers = HeaderMap::new();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            headers = req.headers().clone();
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        PanelSide { ws, headers }
    }

    /// Accept a TCP connection and drop it before the upgrade.
    pub async fn accept_and_drop(&self) {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("agent did not connect in time")
            .unwrap();
        drop(stream);
    }
}

/// One accepted agent connection, seen from the panel.
pub struct PanelSide {
    ws: WebSocketStream<TcpStream>,
    /// Upgrade request headers.
    pub headers: HeaderMap,
}

impl PanelSide {
    /// Next raw frame.
    pub async fn next_message(&mut self) -> Option<Message> {
        tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
            .await
            .expect("no frame from agent in time")
            .map(|r| r.unwrap())
    }

    /// Next envelope, skipping control frames.
    pub async fn next_envelope(&mut self) -> Envelope {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => return Envelope::from_json(&text).unwrap(),
                Some(Message::Ping(_) | Message::Pong(_)) => {},
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Next envelope named `event`, skipping others.
    pub async fn next_event(&mut self, event: &str) -> Envelope {
        loop {
            let env = self.next_envelope().await;
            if env.event == event {
                return env;
            }
        }
    }

    /// Send a request and wait for its ack payload.
    pub async fn request(&mut self, event: &str, id: u64, data: Value) -> Value {
        self.send(&Envelope::request(event, id, data)).await;
        loop {
            let env = self.next_envelope().await;
            if env.is_ack() && env.id == Some(id) {
                return env.data;
            }
        }
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let json = envelope.to_json().unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    pub async fn close_with(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_owned().into(),
        };
        let _ = self.ws.send(Message::Close(Some(frame))).await;
    }
}

/// Timings scaled down for tests.
pub fn fast_config(url: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(url, "test-token");
    config.connect_timeout = Duration::from_secs(2);
    config.backoff_base = Duration::from_millis(10);
    config.backoff_max = Duration::from_millis(50);
    config.keepalive_interval = Duration::from_secs(60);
    config.metrics_interval = Duration::from_secs(60);
    config
}

/// A running agent and the handles tests need.
pub struct RunningAgent {
    pub task: JoinHandle<()>,
    pub shutdown: broadcast::Sender<()>,
    pub state: watch::Receiver<ConnectionState>,
    pub outbound: Outbound,
}

impl RunningAgent {
    /// Signal shutdown and wait for the manager to return.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(STEP_TIMEOUT, self.task)
            .await
            .expect("agent did not stop in time")
            .unwrap();
    }
}

/// Start an agent against `config` with a static metrics source.
pub fn start_agent(config: ConnectionConfig) -> RunningAgent {
    let (outbound, outbound_rx) = Outbound::channel();
    let context = AgentContext {
        executor: Arc::new(CommandExecutor::shell(
            ResultCache::new(16, Duration::from_secs(60)),
            None,
        )),
        streams: StreamManager::new(outbound.clone(), None),
        metrics: MetricsCollector::new(Arc::new(StaticSource)),
        updater: Arc::new(
            Updater::new(
                std::env::temp_dir().join("warlock-agent-test-install"),
                "warlock-agent".into(),
            )
            .unwrap(),
        ),
        outbound: outbound.clone(),
        hostname: "test-host".into(),
    };
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let mut manager = ConnectionManager::new(config, context, outbound_rx, shutdown_rx);
    let state = manager.state();
    let task = tokio::spawn(async move { manager.run().await });
    RunningAgent {
        task,
        shutdown,
        state,
        outbound,
    }
}
