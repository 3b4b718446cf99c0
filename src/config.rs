//! Configuration for ChatSync clients

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub timeouts: TimeoutConfig,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Path the REST API is mounted under, e.g. `/chatserver/chat`.
    pub api_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fallback_send_ms: u64,
    pub typing_quiescence_ms: u64,
    pub typing_expiry_ms: u64,
    pub read_mark_delay_ms: u64,
}

/// Retry schedule applied by the WebSocket driver after a failed connect
/// or a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3050,
            use_tls: false,
            api_prefix: String::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fallback_send_ms: 5_000,
            typing_quiescence_ms: 2_000,
            typing_expiry_ms: 3_000,
            read_mark_delay_ms: 500,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt is allowed after `failed_attempts` consecutive failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts == 0 || failed_attempts < self.max_attempts
    }

    /// Delay before the next attempt, `attempt` being 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: u16, use_tls: bool) -> Self {
        Self {
            server: ServerConfig {
                host: host.to_string(),
                port,
                use_tls,
                api_prefix: String::new(),
            },
            ..Self::default()
        }
    }

    /// Load a TOML config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.server.use_tls { "https" } else { "http" };
        let prefix = self.server.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}://{}:{}", scheme, self.server.host, self.server.port)
        } else {
            format!("{}://{}:{}/{}", scheme, self.server.host, self.server.port, prefix)
        }
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.server.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}/ws", scheme, self.server.host, self.server.port)
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig::from(&self.timeouts)
    }
}

/// Timer windows used by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub fallback_send: Duration,
    pub typing_quiescence: Duration,
    pub typing_expiry: Duration,
    pub read_mark_delay: Duration,
}

impl From<&TimeoutConfig> for SyncConfig {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            fallback_send: Duration::from_millis(t.fallback_send_ms),
            typing_quiescence: Duration::from_millis(t.typing_quiescence_ms),
            typing_expiry: Duration::from_millis(t.typing_expiry_ms),
            read_mark_delay: Duration::from_millis(t.read_mark_delay_ms),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}
