use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::Backoff;

/// Retry policy for idempotent request/response calls (`[retry]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (3 = up to 4 attempts in total).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Hard timeout for each individual attempt, in milliseconds.
    pub timeout_ms: u64,
    /// HTTP statuses worth retrying.
    pub retryable_status_codes: Vec<u16>,
    /// Symbolic transport error codes worth retrying.
    pub retryable_error_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            timeout_ms: 30_000,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_error_codes: crate::retry::codes::DEFAULT_RETRYABLE
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

/// Circuit breaker thresholds (`[breaker]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successful probes that close it again.
    pub success_threshold: u32,
    /// Cooldown before a probe is admitted, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Persistent connection and reconnect policy (`[connection]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Reconnect attempts after a drop before giving up (state `failed`).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_multiplier: f64,
    /// Bound on a single connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Capacity of the inbound event broadcast; slow consumers beyond this lag.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 5_000,
            reconnect_multiplier: 2.0,
            connect_timeout_ms: 10_000,
            event_buffer: 256,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            multiplier: self.reconnect_multiplier,
        }
    }
}

/// Chat send/receive limits (`[chat]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Longest accepted message body, in characters.
    pub max_message_len: usize,
    /// How long a send waits for the server acknowledgement, in milliseconds.
    pub ack_timeout_ms: u64,
    /// A typing indicator with no refresh for this long is dropped, in milliseconds.
    pub typing_ttl_ms: u64,
    /// Minimum spacing between outbound "is typing" notifications, in milliseconds.
    pub typing_emit_interval_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 2_000,
            ack_timeout_ms: 10_000,
            typing_ttl_ms: 8_000,
            typing_emit_interval_ms: 2_000,
        }
    }
}

impl ChatConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    pub fn typing_emit_interval(&self) -> Duration {
        Duration::from_millis(self.typing_emit_interval_ms)
    }
}

/// Batch behaviour for the parallel aggregator (`[aggregate]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Raise an aggregate failure when every member failed.
    pub throw_on_all_failed: bool,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            throw_on_all_failed: true,
        }
    }
}

/// Global configuration loaded from `~/.config/studysync/config.toml`.
///
/// Every section is optional; missing sections and fields fall back to the
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub aggregate: AggregateConfig,
    pub connection: ConnectionConfig,
    pub chat: ChatConfig,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("studysync")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SyncConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SyncConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

/// Load configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<SyncConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: SyncConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}
