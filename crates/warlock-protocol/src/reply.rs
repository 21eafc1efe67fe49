//! Reply payloads and the `{success, ...}` wrapper.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `agent:register` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Agent version.
    pub version: String,
    /// Host name.
    pub hostname: String,
    /// OS family, e.g. `linux`.
    pub platform: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
}

impl Registration {
    /// Registration for the running host.
    #[must_use]
    pub fn for_host(version: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            hostname: hostname.into(),
            platform: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }
}

/// Result of one completed command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Process exit code; `0` means success.
    pub exit_code: i32,
}

/// One `file:list` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// File name (not the full path).
    pub name: String,
    /// Entry is a directory.
    pub is_directory: bool,
    /// Entry is a regular file.
    pub is_file: bool,
}

/// Liveness probe reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Always `true`.
    pub pong: bool,
    /// Agent wall clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Pong {
    /// A pong stamped with `timestamp`.
    #[must_use]
    pub fn at(timestamp: i64) -> Self {
        Self {
            pong: true,
            timestamp,
        }
    }
}

/// `{success: true}` merged with the fields of `payload`.
///
/// `payload` must serialize to a JSON object (or `null`); anything else is
/// nested under `result`.
#[must_use]
pub fn success<T: Serialize>(payload: &T) -> Value {
    match serde_json::to_value(payload) {
        Ok(Value::Object(fields)) => with_success(fields),
        Ok(Value::Null) => ok(),
        Ok(other) => {
            let mut fields = Map::new();
            fields.insert("result".to_owned(), other);
            with_success(fields)
        },
        Err(e) => failure(format!("failed to encode reply: {e}")),
    }
}

/// `{success: true, <key>: value}`.
#[must_use]
pub fn success_with<T: Serialize>(key: &str, value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(value) => {
            let mut fields = Map::new();
            fields.insert(key.to_owned(), value);
            with_success(fields)
        },
        Err(e) => failure(format!("failed to encode reply: {e}")),
    }
}

/// Bare `{success: true}`.
#[must_use]
pub fn ok() -> Value {
    serde_json::json!({ "success": true })
}

/// `{success: false, error}`.
#[must_use]
pub fn failure(error: impl std::fmt::Display) -> Value {
    serde_json::json!({ "success": false, "error": error.to_string() })
}

fn with_success(mut fields: Map<String, Value>) -> Value {
    fields.insert("success".to_owned(), Value::Bool(true));
    Value::Object(fields)
}
