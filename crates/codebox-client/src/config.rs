// ABOUTME: Configuration loading for codebox clients
// ABOUTME: TOML file under the XDG config dir with defaults for every section

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{CodeboxError, Result};
use crate::signal::StatusPolicy;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Absolute URL that relative base addresses resolve against
    pub origin: String,
    /// Base address applied when the client is built (a workspace may replace it)
    pub base_address: Option<String>,
    /// Open the events channel whenever a workspace is attached
    pub listen_events: bool,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Event channel reconnection
    pub reconnect: ReconnectConfig,
    /// Switches restoring legacy behaviour
    pub compat: CompatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".to_string(),
            base_address: None,
            listen_events: true,
            request_timeout_secs: 30,
            reconnect: ReconnectConfig::default(),
            compat: CompatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempts after a failure before giving up with `reconnect_failed`
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_secs: 30,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before reconnection attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_secs.saturating_mul(1000));
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatConfig {
    /// Report `reconnect_failed` as connected, like the legacy web client did
    pub reconnect_failed_connected: bool,
}

impl ClientConfig {
    /// Get the XDG config directory for codebox (~/.config/codebox)
    pub fn config_dir() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("codebox")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from the XDG config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CodeboxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            CodeboxError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)
            .map_err(|e| CodeboxError::InvalidUrl(format!("origin '{}': {}", self.origin, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CodeboxError::InvalidUrl(format!(
                "origin '{}' must be http or https, got {}",
                self.origin, other
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn status_policy(&self) -> StatusPolicy {
        StatusPolicy {
            reconnect_failed_connected: self.compat.reconnect_failed_connected,
        }
    }

    /// Content written by `codebox config-init`
    pub fn default_toml() -> String {
        r#"# codebox client configuration
# Location: ~/.config/codebox/config.toml

# Server that relative base addresses ("/ws1") resolve against
origin = "http://localhost:8000"

# base_address = "/ws1"
listen_events = true
request_timeout_secs = 30

[reconnect]
enabled = true
max_attempts = 10
initial_delay_ms = 500
max_delay_secs = 30

[compat]
# Legacy web client reported a failed reconnection as "connected"
reconnect_failed_connected = false
"#
        .to_string()
    }
}
