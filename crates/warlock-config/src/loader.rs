//! Config file loading, environment overrides and validation.
//!
//! 1. Read the JSON file (missing file is fatal)
//! 2. Deserialize into [`ConfigFile`]
//! 3. Require `PANEL_URL` and `AGENT_TOKEN`
//! 4. Apply `WARLOCK_AGENT_*` environment overrides
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{AgentConfig, ConfigFile};

/// Cache TTL override in milliseconds.
pub const ENV_CACHE_TTL_MS: &str = "WARLOCK_AGENT_CACHE_TTL_MS";
/// Cache capacity override.
pub const ENV_CACHE_CAPACITY: &str = "WARLOCK_AGENT_CACHE_CAPACITY";
/// Tracing filter override.
pub const ENV_LOG: &str = "WARLOCK_AGENT_LOG";
/// Log format override.
pub const ENV_LOG_FORMAT: &str = "WARLOCK_AGENT_LOG_FORMAT";
/// Log directory override.
pub const ENV_LOG_DIR: &str = "WARLOCK_AGENT_LOG_DIR";

/// Maximum accepted config file size (64 KB).
const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;

/// Load the config file at `path` with overrides from the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, unreadable, malformed,
/// lacks a required key, or an override is invalid.
pub fn load(path: &Path) -> ConfigResult<AgentConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load the config file at `path` with an explicit environment map.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(path: &Path, env: &HashMap<String, String>) -> ConfigResult<AgentConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let config = parse(&content, &path.display().to_string(), env)?;
    debug!(path = %path.display(), panel_url = %config.panel_url, "loaded agent config");
    Ok(config)
}

/// Parse config file contents. `origin` is only used in error messages.
///
/// # Errors
///
/// See [`load`].
pub fn parse(
    content: &str,
    origin: &str,
    env: &HashMap<String, String>,
) -> ConfigResult<AgentConfig> {
    let file: ConfigFile = serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })?;

    let panel_url = non_empty(file.panel_url).ok_or(ConfigError::MissingField("PANEL_URL"))?;
    let agent_token =
        non_empty(file.agent_token).ok_or(ConfigError::MissingField("AGENT_TOKEN"))?;

    let mut config = AgentConfig::new(panel_url.trim(), agent_token);
    if let Some(dir) = file.working_dir {
        config.working_dir = dir;
    }
    if let Some(dir) = file.install_dir {
        config.install_dir = dir;
    }
    if let Some(name) = non_empty(file.service_name) {
        config.service_name = name;
    }
    config.log_dir = file.log_dir.filter(|dir| !dir.as_os_str().is_empty());

    apply_env_overrides(&mut config, env)?;
    validate(&config)?;
    Ok(config)
}

/// Snapshot the `WARLOCK_AGENT_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("WARLOCK_AGENT_"))
        .collect()
}

fn apply_env_overrides(
    config: &mut AgentConfig,
    env: &HashMap<String, String>,
) -> ConfigResult<()> {
    if let Some(raw) = env.get(ENV_CACHE_TTL_MS) {
        let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::EnvError {
            var_name: ENV_CACHE_TTL_MS.to_owned(),
            message: format!("expected milliseconds, got '{raw}'"),
        })?;
        config.cache_ttl = Duration::from_millis(ms);
    }

    if let Some(raw) = env.get(ENV_CACHE_CAPACITY) {
        let capacity: usize = raw.trim().parse().map_err(|_| ConfigError::EnvError {
            var_name: ENV_CACHE_CAPACITY.to_owned(),
            message: format!("expected a positive integer, got '{raw}'"),
        })?;
        if capacity == 0 {
            return Err(ConfigError::EnvError {
                var_name: ENV_CACHE_CAPACITY.to_owned(),
                message: "capacity must be at least 1".to_owned(),
            });
        }
        config.cache_capacity = capacity;
    }

    if let Some(filter) = env.get(ENV_LOG).filter(|v| !v.trim().is_empty()) {
        config.log_filter = filter.trim().to_owned();
    }
    if let Some(format) = env.get(ENV_LOG_FORMAT).filter(|v| !v.trim().is_empty()) {
        config.log_format = format.trim().to_ascii_lowercase();
    }
    if let Some(dir) = env.get(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
        config.log_dir = Some(PathBuf::from(dir.trim()));
    }

    Ok(())
}

fn validate(config: &AgentConfig) -> ConfigResult<()> {
    let url = url::Url::parse(&config.panel_url).map_err(|e| ConfigError::ValidationError {
        field: "PANEL_URL".to_owned(),
        message: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(ConfigError::ValidationError {
            field: "PANEL_URL".to_owned(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if let Some(dir) = &config.log_dir
        && !dir.is_absolute()
    {
        return Err(ConfigError::ValidationError {
            field: "logDir".to_owned(),
            message: format!("log directory must be absolute, got '{}'", dir.display()),
        });
    }

    if config.agent_token.chars().any(char::is_control) {
        return Err(ConfigError::ValidationError {
            field: "AGENT_TOKEN".to_owned(),
            message: "token contains control characters".to_owned(),
        });
    }

    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn parses_minimal_file_with_defaults() {
        let config = parse(
            r#"{"PANEL_URL":"https://panel.example","AGENT_TOKEN":"abc"}"#,
            "test",
            &no_env(),
        )
        .unwrap();

        assert_eq!(config.panel_url, "https://panel.example");
        assert_eq!(config.agent_token, "abc");
        assert_eq!(config.cache_ttl, Duration::from_millis(60_000));
        assert_eq!(config.working_dir, Path::new("/root"));
        assert_eq!(config.service_name, "warlock-agent");
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = parse(r#"{"PANEL_URL":"https://p"}"#, "test", &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("AGENT_TOKEN")));
    }

    #[test]
    fn empty_panel_url_is_fatal() {
        let err = parse(r#"{"PANEL_URL":"  ","AGENT_TOKEN":"x"}"#, "test", &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("PANEL_URL")));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse("{not json", "test", &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn unsupported_scheme_rejected() {
        let err = parse(
            r#"{"PANEL_URL":"ftp://panel","AGENT_TOKEN":"x"}"#,
            "test",
            &no_env(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn env_overrides_cache_settings() {
        let env = HashMap::from([
            (ENV_CACHE_TTL_MS.to_owned(), "1500".to_owned()),
            (ENV_CACHE_CAPACITY.to_owned(), "8".to_owned()),
            (ENV_LOG.to_owned(), "debug".to_owned()),
        ]);
        let config = parse(r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x"}"#, "test", &env).unwrap();

        assert_eq!(config.cache_ttl, Duration::from_millis(1500));
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn invalid_ttl_override_is_fatal() {
        let env = HashMap::from([(ENV_CACHE_TTL_MS.to_owned(), "soon".to_owned())]);
        let err = parse(r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x"}"#, "test", &env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { .. }));
    }

    #[test]
    fn zero_capacity_rejected() {
        let env = HashMap::from([(ENV_CACHE_CAPACITY.to_owned(), "0".to_owned())]);
        assert!(parse(r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x"}"#, "test", &env).is_err());
    }

    #[test]
    fn optional_keys_override_defaults() {
        let config = parse(
            concat!(
                r#"{"panelUrl":"http://p","agentToken":"x","workingDir":"/srv","#,
                r#""installDir":"/opt/w","serviceName":"w-agent"}"#,
            ),
            "test",
            &no_env(),
        )
        .unwrap();
        assert_eq!(config.working_dir, Path::new("/srv"));
        assert_eq!(config.install_dir, Path::new("/opt/w"));
        assert_eq!(config.service_name, "w-agent");
    }

    #[test]
    fn log_dir_from_file_and_env() {
        let from_file = parse(
            r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x","logDir":"/var/log/warlock"}"#,
            "test",
            &no_env(),
        )
        .unwrap();
        assert_eq!(from_file.log_dir.as_deref(), Some(Path::new("/var/log/warlock")));

        let env = HashMap::from([(ENV_LOG_DIR.to_owned(), "/tmp/warlock-logs".to_owned())]);
        let overridden = parse(
            r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x","LOG_DIR":"/var/log/warlock"}"#,
            "test",
            &env,
        )
        .unwrap();
        assert_eq!(overridden.log_dir.as_deref(), Some(Path::new("/tmp/warlock-logs")));

        let unset = parse(r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x"}"#, "test", &no_env())
            .unwrap();
        assert!(unset.log_dir.is_none());
    }

    #[test]
    fn relative_log_dir_rejected() {
        let env = HashMap::from([(ENV_LOG_DIR.to_owned(), "logs".to_owned())]);
        let err = parse(r#"{"PANEL_URL":"http://p","AGENT_TOKEN":"x"}"#, "test", &env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_with_env(&dir.path().join("agent.conf"), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"PANEL_URL":"wss://panel","AGENT_TOKEN":"tok"}}"#).unwrap();

        let config = load_with_env(file.path(), &no_env()).unwrap();
        assert_eq!(config.agent_token, "tok");
    }
}
