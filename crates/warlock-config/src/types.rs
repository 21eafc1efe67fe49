//! Configuration struct definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default location of the persisted agent configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/warlock/agent.conf";

/// Default time-to-live for cached service enumerations.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(60_000);

/// Default maximum number of cached results.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// On-disk shape of `/etc/warlock/agent.conf`.
///
/// The installer writes upper-case keys; camelCase is accepted too.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfigFile {
    #[serde(rename = "PANEL_URL", alias = "panelUrl", default)]
    pub(crate) panel_url: Option<String>,
    #[serde(rename = "AGENT_TOKEN", alias = "agentToken", default)]
    pub(crate) agent_token: Option<String>,
    #[serde(rename = "workingDir", alias = "WORKING_DIR", default)]
    pub(crate) working_dir: Option<PathBuf>,
    #[serde(rename = "installDir", alias = "INSTALL_DIR", default)]
    pub(crate) install_dir: Option<PathBuf>,
    #[serde(rename = "serviceName", alias = "SERVICE_NAME", default)]
    pub(crate) service_name: Option<String>,
    #[serde(rename = "logDir", alias = "LOG_DIR", default)]
    pub(crate) log_dir: Option<PathBuf>,
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Panel base URL (`http`, `https`, `ws` or `wss`).
    pub panel_url: String,
    /// Opaque token issued by the panel.
    pub agent_token: String,
    /// Default working directory for commands and streams.
    pub working_dir: PathBuf,
    /// Directory the self-updater unpacks releases into.
    pub install_dir: PathBuf,
    /// systemd unit restarted after a self-update.
    pub service_name: String,
    /// Staleness threshold for cached service enumerations.
    pub cache_ttl: Duration,
    /// Maximum number of cached results.
    pub cache_capacity: usize,
    /// Base tracing filter.
    pub log_filter: String,
    /// Log line format name.
    pub log_format: String,
    /// Directory for daily-rotated log files; stderr when `None`.
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Build a config with defaults for everything but the two required keys.
    #[must_use]
    pub fn new(panel_url: impl Into<String>, agent_token: impl Into<String>) -> Self {
        Self {
            panel_url: panel_url.into(),
            agent_token: agent_token.into(),
            working_dir: PathBuf::from("/root"),
            install_dir: PathBuf::from("/opt/warlock-agent"),
            service_name: "warlock-agent".to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            log_filter: "info".to_string(),
            log_format: "compact".to_string(),
            log_dir: None,
        }
    }

    /// The WebSocket endpoint derived from the panel URL.
    ///
    /// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` are kept.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        let trimmed = self.panel_url.trim_end_matches('/');
        if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}/agent")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}/agent")
        } else {
            trimmed.to_string()
        }
    }
}
