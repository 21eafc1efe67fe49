//! Shared agent state handed to every request task.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;
use warlock_config::AgentConfig;

use crate::cache::ResultCache;
use crate::executor::CommandExecutor;
use crate::metrics::{MetricsCollector, MetricsError};
use crate::outbound::Outbound;
use crate::stream::StreamManager;
use crate::update::{UpdateError, Updater};

/// Errors building an [`AgentContext`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The metrics backend is unavailable.
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),

    /// The self-updater could not be created.
    #[error("updater setup failed: {0}")]
    Update(#[from] UpdateError),
}

/// Everything a request handler needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Bounded command execution with the result cache.
    pub executor: Arc<CommandExecutor>,
    /// Streamed subprocess sessions.
    pub streams: StreamManager,
    /// Snapshot collection.
    pub metrics: MetricsCollector,
    /// Self-update.
    pub updater: Arc<Updater>,
    /// Queue to the panel.
    pub outbound: Outbound,
    /// Host name reported at registration.
    pub hostname: String,
}

impl AgentContext {
    /// Production context for `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if metrics or the updater cannot be
    /// initialised.
    pub fn from_config(config: &AgentConfig, outbound: Outbound) -> Result<Self, SetupError> {
        let default_dir = usable_dir(&config.working_dir);
        let cache = ResultCache::new(config.cache_capacity, config.cache_ttl);
        Ok(Self {
            executor: Arc::new(CommandExecutor::shell(cache, default_dir.clone())),
            streams: StreamManager::new(outbound.clone(), default_dir),
            metrics: MetricsCollector::system()?,
            updater: Arc::new(Updater::new(
                config.install_dir.clone(),
                config.service_name.clone(),
            )?),
            outbound,
            hostname: local_hostname(),
        })
    }
}

/// The configured working directory, if it exists.
fn usable_dir(dir: &std::path::Path) -> Option<PathBuf> {
    if dir.is_dir() {
        Some(dir.to_path_buf())
    } else {
        warn!(
            dir = %dir.display(),
            "Configured working directory does not exist, using the agent's own"
        );
        None
    }
}

/// Host name, or `unknown` if the OS does not report one.
#[must_use]
pub fn local_hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_owned())
}
