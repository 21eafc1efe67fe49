#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Persisted configuration for the Warlock agent.
//!
//! The agent reads a small JSON file written by the installer:
//!
//! ```json
//! {"PANEL_URL": "https://panel.example", "AGENT_TOKEN": "..."}
//! ```
//!
//! A handful of `WARLOCK_AGENT_*` environment variables override runtime
//! knobs (cache TTL and capacity, log filter and format). Any problem with
//! the file or an override is a [`ConfigError`]; the binary treats every
//! such error as fatal.
//!
//! ```rust,no_run
//! use warlock_config::AgentConfig;
//!
//! let config = AgentConfig::load(std::path::Path::new("/etc/warlock/agent.conf")).unwrap();
//! println!("panel: {}", config.panel_url);
//! ```

/// Configuration error types.
pub mod error;
/// File loading, environment overrides and validation.
pub mod loader;
/// Configuration struct definitions.
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use types::{AgentConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DEFAULT_CONFIG_PATH};

impl AgentConfig {
    /// Load the config at `path`, applying overrides from the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is missing or malformed, a
    /// required key is absent, or an override is invalid.
    pub fn load(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load(path)
    }
}
