//! Relay configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use botlink_core::{ChannelConfig, SessionConfig};

/// Top-level configuration for the relay server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address and robot endpoints.
    pub network: NetworkConfig,
    /// Upstream video read loop.
    pub stream: StreamConfig,
    /// Command channel behaviour.
    pub control: ControlConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP listen address (IP:port).
    pub listen_address: String,
    /// Robot control host.
    pub robot_host: String,
    /// Robot control TCP port.
    pub robot_port: u16,
    /// Upstream MJPEG URL.
    pub video_url: String,
    /// Connect timeout in milliseconds, for both the control socket and
    /// the video stream.
    pub connect_timeout_ms: u64,
}

/// Video stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes per upstream read.
    pub chunk_size: usize,
    /// Maximum bytes buffered without a complete frame.
    pub max_pending_bytes: usize,
    /// Delay before reconnecting after a failure. 0 disables retry.
    pub reconnect_delay_ms: u64,
}

/// Control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Resend interval for held buttons.
    pub repeat_interval_ms: u64,
    /// Connect to the robot at startup.
    pub auto_connect: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (overridden by `RUST_LOG`).
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:5000".into(),
            robot_host: "192.168.2.34".into(),
            robot_port: 8082,
            video_url: "http://192.168.2.34:8080".into(),
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            max_pending_bytes: 10 * 1024 * 1024,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            repeat_interval_ms: 100,
            auto_connect: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RelayConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.control.repeat_interval_ms.max(1))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout(),
            chunk_size: self.stream.chunk_size.max(1),
            max_pending: self.stream.max_pending_bytes,
            reconnect_delay: match self.stream.reconnect_delay_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            connect_timeout: self.connect_timeout(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
