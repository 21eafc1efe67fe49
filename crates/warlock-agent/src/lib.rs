//! Warlock Agent - remote execution on a managed host.
//!
//! The agent keeps an authenticated `WebSocket` open to the Warlock panel
//! and serves its requests:
//! - Bounded shell commands, with cached service enumeration
//! - Streamed subprocess sessions
//! - System metrics, on demand and pushed on a timer
//! - File reads, writes and directory listings
//! - systemd service control
//! - Self-update from a release tarball
//!
//! # Architecture
//!
//! ```text
//! warlock-agent (binary)
//! ├── ConnectionManager    connect, register, reconnect, keepalive
//! │   └── dispatch         one task per inbound request
//! │       ├── CommandExecutor  ── ResultCache
//! │       ├── StreamManager
//! │       ├── MetricsCollector ── TelemetrySource (sysinfo)
//! │       ├── files / service
//! │       └── Updater
//! └── Outbound             queue drained by the connected loop
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use warlock_agent::{AgentContext, ConnectionConfig, ConnectionManager, Outbound};
//!
//! let config = warlock_config::AgentConfig::load(path)?;
//! let (outbound, outbound_rx) = Outbound::channel();
//! let context = AgentContext::from_config(&config, outbound)?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let mut manager = ConnectionManager::new(
//!     ConnectionConfig::from_agent(&config),
//!     context,
//!     outbound_rx,
//!     shutdown_rx,
//! );
//! manager.run().await;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cache;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod executor;
pub mod files;
pub mod metrics;
pub mod outbound;
pub mod service;
pub mod stream;
pub mod update;

pub use cache::ResultCache;
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
};
pub use context::{AgentContext, SetupError};
pub use executor::{CommandDescriptor, CommandExecutor, CommandRunner, ExecError, ShellRunner};
pub use metrics::{MetricsCollector, MetricsError, SysinfoSource, TelemetrySource};
pub use outbound::{Outbound, Outgoing};
pub use stream::StreamManager;
pub use update::{UpdateError, Updater};

/// Version reported to the panel.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
