//! Warlock Telemetry - logging setup for the Warlock agent.
//!
//! Wraps `tracing-subscriber` so the agent binary can pick a level, a
//! format and an output target from its configuration.
//!
//! ```rust,no_run
//! use warlock_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), warlock_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("tungstenite=warn");
//! setup_logging(&config)?;
//! tracing::info!("agent starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LOG_FILE_PREFIX, LogConfig, LogFormat, LogTarget, setup_logging};
