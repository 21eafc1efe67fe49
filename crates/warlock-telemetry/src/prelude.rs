//! Commonly used telemetry types.
//!
//! `use warlock_telemetry::prelude::*;`

pub use crate::{TelemetryError, TelemetryResult};

pub use crate::{LogConfig, LogFormat, LogTarget};

pub use crate::setup_logging;
