//! ClawKangsar configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default persona prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are ClawKangsar, a professional assistant running on a Raspberry Pi. Keep responses concise and use your browser tool only when real-time data is needed.";

/// Main ClawKangsar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClawConfig {
    /// Log level (DEBUG, INFO, WARN, ERROR)
    pub log_level: String,

    /// System prompt for the assistant persona
    pub system_prompt: String,

    /// Telegram channel configuration
    pub telegram: TelegramConfig,

    /// Headless browser configuration
    pub browser: BrowserConfig,

    /// Session storage configuration
    pub storage: StorageConfig,

    /// Health endpoint configuration
    pub health: HealthConfig,

    /// Lightweight tool configuration
    pub tools: ToolsConfig,
}

impl Default for ClawConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            telegram: TelegramConfig::default(),
            browser: BrowserConfig::default(),
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Telegram channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Enable the Telegram gateway
    pub enabled: bool,

    /// Bot token
    pub token: String,

    /// Allowed user IDs (empty = nobody)
    pub allow_list: Vec<i64>,
}

/// Headless browser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Tear the browser down after this many idle seconds
    pub idle_timeout_seconds: i64,

    /// Per-navigation timeout in seconds
    pub nav_timeout_seconds: i64,

    /// Chromium executable (None = search PATH)
    pub executable: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 300,
            nav_timeout_seconds: 45,
            executable: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Session log directory
    pub session_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("data/sessions"),
        }
    }
}

/// Health endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Serve /health, /ready and /status
    pub enabled: bool,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 18080,
        }
    }
}

/// Lightweight tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// HTTP fetch timeout in seconds
    pub web_fetch_timeout_seconds: i64,

    /// Maximum characters kept from a fetched page
    pub web_fetch_max_chars: i64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_fetch_timeout_seconds: 20,
            web_fetch_max_chars: 4000,
        }
    }
}

impl ClawConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; values that are blank or
    /// non-positive are restored to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text and normalize it
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("parse config file: {}", e)))?;
        config.normalize();
        Ok(config)
    }

    /// Restore defaults for blank or non-positive values
    pub fn normalize(&mut self) {
        let defaults = Self::default();

        if self.log_level.trim().is_empty() {
            self.log_level = defaults.log_level;
        }
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = defaults.system_prompt;
        }
        if self.browser.idle_timeout_seconds <= 0 {
            self.browser.idle_timeout_seconds = defaults.browser.idle_timeout_seconds;
        }
        if self.browser.nav_timeout_seconds <= 0 {
            self.browser.nav_timeout_seconds = defaults.browser.nav_timeout_seconds;
        }
        if self.storage.session_dir.as_os_str().is_empty() {
            self.storage.session_dir = defaults.storage.session_dir;
        }
        if self.health.host.trim().is_empty() {
            self.health.host = defaults.health.host;
        }
        if self.health.port == 0 {
            self.health.port = defaults.health.port;
        }
        if self.tools.web_fetch_timeout_seconds <= 0 {
            self.tools.web_fetch_timeout_seconds = defaults.tools.web_fetch_timeout_seconds;
        }
        if self.tools.web_fetch_max_chars <= 0 {
            self.tools.web_fetch_max_chars = defaults.tools.web_fetch_max_chars;
        }
    }

    /// `tracing` filter directive for the configured level
    pub fn log_directive(&self) -> &'static str {
        match self.log_level.trim().to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARN" | "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }
}
