//! Configuration management for the VMShell client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/vmsh/config.toml`.
//! Environment variables are applied on top of the file by the CLI, once,
//! before any component is constructed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Production registry address.
pub const DEFAULT_API_URL: &str = "https://api.vmsh.dev";

/// Environment variable overriding the registry address.
pub const ENV_API_URL: &str = "VMSH_API_URL";

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "VMSH_LOG_LEVEL";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("api url must be an http:// or https:// URL, got {0}")]
    InvalidApiUrl(String),

    #[error("{name} must be greater than 0 seconds")]
    ZeroTimeout { name: &'static str },

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the VMShell client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Session registry settings.
    pub api: ApiConfig,

    /// Interactive connection settings.
    pub connection: ConnectionConfig,

    /// Diagnostic logging settings.
    pub logging: LoggingConfig,
}

/// Session registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Base address of the session registry.
    pub url: String,

    /// Timeout for each registry request, in seconds.
    pub request_timeout_secs: u64,
}

/// Interactive connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound on the WebSocket handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// How long to wait for the peer's close frame after `exit`, in seconds.
    pub close_timeout_secs: u64,
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// File to write logs to. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            close_timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vmsh")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - VMSH_API_URL: Override the registry address
    /// - VMSH_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    ///
    /// Returns the names of the variables that were applied. This runs before
    /// logging is set up, so the caller logs them once it is.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        let mut applied = Vec::new();

        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.api.url = url;
                applied.push(ENV_API_URL);
            }
        }

        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.is_empty() {
                self.logging.level = level;
                applied.push(ENV_LOG_LEVEL);
            }
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "request_timeout_secs",
            });
        }
        if self.connection.handshake_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "handshake_timeout_secs",
            });
        }
        if self.connection.close_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "close_timeout_secs",
            });
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Parsed registry base address.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.api.url)
            .map_err(|_| ConfigError::InvalidApiUrl(self.api.url.clone()))?;

        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(ConfigError::InvalidApiUrl(self.api.url.clone())),
        }
    }

    /// Timeout for each registry request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Upper bound on the WebSocket handshake.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.handshake_timeout_secs)
    }

    /// Grace period for the peer's close frame after `exit`.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.close_timeout_secs)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.url, DEFAULT_API_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[connection]
handshake_timeout_secs = 3
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.handshake_timeout(), Duration::from_secs(3));
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.api.url, DEFAULT_API_URL);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[api]
url = "http://localhost:8080/v1"
request_timeout_secs = 12

[connection]
handshake_timeout_secs = 4
close_timeout_secs = 2

[logging]
level = "debug"
file = "/var/log/vmsh.log"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.api.url, "http://localhost:8080/v1");
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(4));
        assert_eq!(config.close_timeout(), Duration::from_secs(2));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/vmsh.log")));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[api
url = "x"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[connection]
handshake_timeout_secs = "ten"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.api.url = "https://registry.internal".to_string();
        original.logging.file = Some(PathBuf::from("/tmp/vmsh.log"));

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.connection.close_timeout_secs = 9;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.connection.close_timeout_secs, 9);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("vmsh/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_api_url() {
        std::env::set_var(ENV_API_URL, "http://127.0.0.1:9000");

        let mut config = Config::default();
        assert_eq!(config.apply_env_overrides(), vec![ENV_API_URL]);
        assert_eq!(config.api.url, "http://127.0.0.1:9000");

        std::env::remove_var(ENV_API_URL);
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var(ENV_API_URL, "");

        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_empty());
        assert_eq!(config.api.url, DEFAULT_API_URL);

        std::env::remove_var(ENV_API_URL);
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var(ENV_API_URL);
        std::env::set_var(ENV_LOG_LEVEL, "trace");

        let mut config = Config::default();
        assert_eq!(config.apply_env_overrides(), vec![ENV_LOG_LEVEL]);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.api.url, DEFAULT_API_URL);

        std::env::remove_var(ENV_LOG_LEVEL);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_api_url() {
        let mut config = Config::default();

        config.api.url = "wss://api.vmsh.dev".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidApiUrl("wss://api.vmsh.dev".to_string()))
        );

        config.api.url = "api.vmsh.dev".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidApiUrl(_))
        ));

        config.api.url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = Config::default();
        config.connection.handshake_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout {
                name: "handshake_timeout_secs"
            })
        );

        let mut config = Config::default();
        config.api.request_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout { .. })
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.logging.level = "INFO".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
