//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/periscope/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/periscope/` (~/.config/periscope/)
//! - State/Logs: `$XDG_STATE_HOME/periscope/` (~/.local/state/periscope/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Backend server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Poll cadence and backoff configuration
    #[serde(default)]
    pub poll: PollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// UI configuration
    #[serde(default)]
    pub ui: UiConfig,
}

/// Backend server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Backend base URL (e.g., `http://localhost:50001`)
    pub url: Option<String>,

    /// API key sent as the `X-API-KEY` header
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// IANA timezone string echoed in every poll request
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: default_timeout(),
            timezone: default_timezone(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let Some(url) = &self.url else {
            return Err(Error::Config("server.url is required".to_string()));
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Config(format!(
                "server.url must start with http:// or https://, got {}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "server.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Poll cadence and backoff configuration
///
/// On success the loop polls every `active_interval_ms`. On failure the
/// interval grows as `failure_base_ms * backoff_multiplier^failures`,
/// capped at `max_backoff_ms`, and snaps back to the baseline on the
/// first successful cycle.
#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Interval between successful poll cycles in milliseconds
    #[serde(default = "default_active_interval")]
    pub active_interval_ms: u64,

    /// Base interval after the first failure in milliseconds
    #[serde(default = "default_failure_base")]
    pub failure_base_ms: u64,

    /// Growth factor applied per consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on the failure interval in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval(),
            failure_base_ms: default_failure_base(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl PollConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.active_interval_ms == 0 {
            return Err(Error::Config(
                "poll.active_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "poll.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.failure_base_ms {
            return Err(Error::Config(
                "poll.max_backoff_ms must not be below poll.failure_base_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_active_interval() -> u64 {
    500
}

fn default_failure_base() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_backoff() -> u64 {
    30000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// UI configuration
#[derive(Debug, Deserialize)]
pub struct UiConfig {
    /// Entry kinds hidden from the log view by default
    #[serde(default = "default_hidden_kinds")]
    pub hidden_kinds: Vec<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            hidden_kinds: default_hidden_kinds(),
        }
    }
}

fn default_hidden_kinds() -> Vec<String> {
    vec!["util".to_string(), "hint".to_string()]
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate all sections that have constraints
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.poll.validate()?;
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/periscope/config.toml` (~/.config/periscope/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("periscope").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/periscope/` (~/.local/state/periscope/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("periscope")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/periscope/periscope.log` (~/.local/state/periscope/periscope.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("periscope.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server.url.is_none());
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.timezone, "UTC");
        assert_eq!(config.poll.active_interval_ms, 500);
        assert_eq!(config.poll.failure_base_ms, 1000);
        assert_eq!(config.poll.max_backoff_ms, 30000);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
url = "http://localhost:50001"
api_key = "ps_live_xxxx"
timezone = "Europe/Oslo"

[poll]
active_interval_ms = 250
max_backoff_ms = 10000

[logging]
level = "debug"

[ui]
hidden_kinds = ["util"]
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.url.as_deref(), Some("http://localhost:50001"));
        assert_eq!(config.server.timezone, "Europe/Oslo");
        assert_eq!(config.poll.active_interval_ms, 250);
        assert_eq!(config.poll.max_backoff_ms, 10000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.ui.hidden_kinds, vec!["util".to_string()]);
    }

    #[test]
    fn test_server_config_validation() {
        // No URL should fail
        let config = ServerConfig::default();
        assert!(config.validate().is_err());

        // Non-HTTP scheme should fail
        let config = ServerConfig {
            url: Some("ftp://example.com".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Valid URL should pass
        let config = ServerConfig {
            url: Some("https://agent.example.com".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poll_config_validation() {
        let config = PollConfig::default();
        assert!(config.validate().is_ok());

        let config = PollConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PollConfig {
            failure_base_ms: 5000,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
