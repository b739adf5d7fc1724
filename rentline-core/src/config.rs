//! Application configuration management.
//!
//! Handles loading, saving, and accessing the realtime connection settings
//! and logging preferences. Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{RlError, RlResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Realtime connection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Realtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (e.g., "wss://rt.example.com/realtime").
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay before the first reconnection attempt, in milliseconds.
    #[serde(default = "default_base_reconnect_delay")]
    pub base_reconnect_delay_ms: u64,

    /// Cap for the exponential reconnection delay, in milliseconds.
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    /// Consecutive failed retries before giving up (0 = unlimited).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Jitter factor (0.0 to 1.0) added on top of each reconnection delay.
    #[serde(default)]
    pub reconnect_jitter: f64,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Capacity of the offline outbound command queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the broadcast channel used by async event consumers.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_endpoint() -> String {
    constants::DEFAULT_REALTIME_ENDPOINT.to_string()
}

fn default_base_reconnect_delay() -> u64 {
    constants::DEFAULT_BASE_RECONNECT_DELAY_MS
}

fn default_max_reconnect_delay() -> u64 {
    constants::DEFAULT_MAX_RECONNECT_DELAY_MS
}

fn default_max_reconnect_attempts() -> u32 {
    constants::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_handshake_timeout() -> u64 {
    constants::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_outbound_queue_capacity() -> usize {
    constants::DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_event_channel_capacity() -> usize {
    constants::DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_reconnect_delay_ms: default_base_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_jitter: 0.0,
            handshake_timeout_ms: default_handshake_timeout(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl RealtimeConfig {
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Reject values that would make the client unusable.
    pub fn validate(&self) -> RlResult<()> {
        if self.outbound_queue_capacity == 0 {
            return Err(RlError::Config(
                "outbound_queue_capacity must be at least 1".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(RlError::Config(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(RlError::Config("handshake_timeout_ms must be positive".into()));
        }
        if self.base_reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(RlError::Config(format!(
                "base_reconnect_delay_ms ({}) exceeds max_reconnect_delay_ms ({})",
                self.base_reconnect_delay_ms, self.max_reconnect_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(RlError::Config("reconnect_jitter must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> RlResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.realtime.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> RlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RlError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> RlResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> RlResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Sanitize and normalize a realtime endpoint.
    ///
    /// Ensures the address has a WebSocket scheme (mapping http/https to
    /// ws/wss) and strips trailing slashes.
    pub fn sanitize_endpoint(endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.") {
            format!("ws://{trimmed}")
        } else {
            format!("wss://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }
}
