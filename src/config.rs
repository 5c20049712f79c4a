// Configuration File Support
//
// TOML configuration for the netprobe server with environment variable
// overrides. The default location is the XDG config directory:
// ~/.config/netprobe/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::probe::ExecutorConfig;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Per-session limits and timers
    pub session: SessionConfig,

    /// Admission throttle
    pub rate_limit: RateLimitConfig,

    /// Probe binaries
    pub tools: ToolsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,

    /// Path of the WebSocket upgrade endpoint
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

/// Explicit probe binaries; looked up on `PATH` when unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dig_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `/metrics` on the main listener
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied and the result is validated. A
    /// missing file yields the defaults (with overrides).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/netprobe/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "netprobe", "netprobe") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("netprobe").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - NETPROBE_BIND
    /// - NETPROBE_LOG_LEVEL
    /// - NETPROBE_LOG_FORMAT
    /// - NETPROBE_MAX_CONCURRENT_COMMANDS
    /// - NETPROBE_COMMAND_TIMEOUT_SECS
    /// - NETPROBE_PING_PATH
    /// - NETPROBE_DIG_PATH
    /// - NETPROBE_METRICS_ENABLED
    /// - NETPROBE_RATE_LIMIT_* (see `RateLimitConfig`)
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("NETPROBE_BIND") {
            self.server.bind = bind;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("NETPROBE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("NETPROBE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Session overrides
        if let Ok(limit) = std::env::var("NETPROBE_MAX_CONCURRENT_COMMANDS") {
            if let Ok(limit) = limit.parse::<usize>() {
                if limit > 0 {
                    self.session.max_concurrent_commands = limit;
                }
            }
        }
        if let Ok(timeout) = std::env::var("NETPROBE_COMMAND_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.session.command_timeout_secs = timeout;
                }
            }
        }

        // Tool overrides
        if let Ok(path) = std::env::var("NETPROBE_PING_PATH") {
            self.tools.ping_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("NETPROBE_DIG_PATH") {
            self.tools.dig_path = Some(PathBuf::from(path));
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("NETPROBE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self.rate_limit = self.rate_limit.apply_env_overrides();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        // Validate listener
        self.bind_addr()?;
        if !self.server.ws_path.starts_with('/') {
            anyhow::bail!("WebSocket path must start with '/': {}", self.server.ws_path);
        }
        if matches!(self.server.ws_path.as_str(), "/health" | "/metrics") {
            anyhow::bail!("WebSocket path {} collides with a built-in route", self.server.ws_path);
        }

        self.session.validate()?;

        // Validate rate limit configuration
        if self.rate_limit.enabled {
            if self.rate_limit.capacity == 0 {
                anyhow::bail!("Rate limit capacity must be > 0");
            }
            if self.rate_limit.per_minute == 0 {
                anyhow::bail!("Rate limit per_minute must be > 0");
            }
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Executor settings derived from `[tools]` and the command timeout
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_secs(self.session.command_timeout_secs),
            ping_path: self.tools.ping_path.clone(),
            dig_path: self.tools.dig_path.clone(),
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
