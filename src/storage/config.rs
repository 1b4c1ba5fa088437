//! Application settings persistence.
//!
//! A single TOML file under the platform config directory. The file also
//! remembers the last-connected monitor so startup can attempt a silent
//! reconnect without a new scan-and-pick gesture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// BLE id of the last successfully connected monitor
    pub last_device_id: Option<String>,
    /// Its advertised name, for display before reconnecting
    pub last_device_name: Option<String>,
    /// When the monitor was last seen
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Connection behavior knobs
    pub connection: ConnectionSettings,
    /// Emit metrics as JSON lines instead of human-readable text
    pub metrics_as_json: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            last_device_id: None,
            last_device_name: None,
            last_seen_at: None,
            connection: ConnectionSettings::default(),
            metrics_as_json: false,
        }
    }
}

/// Connection-related settings.
///
/// The heartbeat window and retry constants match one firmware's broadcast
/// cadence and recovery behavior; they live here rather than as hard-coded
/// constants so another firmware revision only needs a config edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Reconnect silently to the last known monitor on startup
    pub auto_reconnect: bool,
    /// Discovery scan timeout in seconds
    pub discovery_timeout_secs: u64,
    /// Delay between characteristic subscriptions in milliseconds
    pub subscribe_spacing_ms: u64,
    /// Retry attempts per characteristic
    pub retry_attempts: u32,
    /// Backoff between retries in seconds
    pub retry_delay_secs: u64,
    /// Metrics heartbeat window in milliseconds
    pub heartbeat_window_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            discovery_timeout_secs: 30,
            subscribe_spacing_ms: 300,
            retry_attempts: 4,
            retry_delay_secs: 2,
            heartbeat_window_ms: 4000,
        }
    }
}

impl MonitorSettings {
    /// Record a successful connection.
    pub fn remember_device(&mut self, device_id: &str, name: &str) {
        self.last_device_id = Some(device_id.to_string());
        self.last_device_name = Some(name.to_string());
        self.last_seen_at = Some(Utc::now());
    }

    /// Build the runtime monitor configuration from persisted settings.
    pub fn monitor_config(&self) -> crate::monitor::MonitorConfig {
        crate::monitor::MonitorConfig {
            discovery_timeout: std::time::Duration::from_secs(
                self.connection.discovery_timeout_secs,
            ),
            subscribe_spacing: std::time::Duration::from_millis(
                self.connection.subscribe_spacing_ms,
            ),
            retry_attempts: self.connection.retry_attempts,
            retry_delay: std::time::Duration::from_secs(self.connection.retry_delay_secs),
            heartbeat_window: std::time::Duration::from_millis(
                self.connection.heartbeat_window_ms,
            ),
            auto_reconnect: self.connection.auto_reconnect,
        }
    }
}

/// Get the application config directory.
pub fn get_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "rustrow", "RustRow")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the settings file path.
pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.toml")
}

/// Load settings from the default location, falling back to defaults when
/// the file does not exist yet.
pub fn load_settings() -> Result<MonitorSettings, ConfigError> {
    load_settings_from(&get_settings_path())
}

/// Load settings from an explicit path.
pub fn load_settings_from(path: &Path) -> Result<MonitorSettings, ConfigError> {
    if !path.exists() {
        return Ok(MonitorSettings::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save settings to the default location.
pub fn save_settings(settings: &MonitorSettings) -> Result<(), ConfigError> {
    save_settings_to(settings, &get_settings_path())
}

/// Save settings to an explicit path.
pub fn save_settings_to(settings: &MonitorSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(settings).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
