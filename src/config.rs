//! Configuration loading.
//!
//! Settings are layered: built-in defaults, then `config.json`, then
//! `POSE_INGEST_*` environment variables. The binary applies CLI flags on
//! top and calls [`Config::check`] before starting the server.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SINK_CAPACITY,
};
use crate::session::SessionOptions;
use crate::sink::BackpressurePolicy;
use crate::validator::ValidationConfig;

/// Configuration for the pose-ingest server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listen address (`host:port`).
    pub bind: String,
    /// Capacity of the bounded queue between sessions and the consumer.
    pub sink_capacity: usize,
    /// What a session does when the sink is full.
    pub backpressure: BackpressurePolicy,
    /// Close sessions idle for this many seconds. `0` disables.
    pub idle_timeout_secs: u64,
    /// Seconds a client gets to finish the WebSocket upgrade.
    pub handshake_timeout_secs: u64,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Pose validation rules.
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDR.to_string(),
            sink_capacity: DEFAULT_SINK_CAPACITY,
            backpressure: BackpressurePolicy::default(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            validation: ValidationConfig::default(),
        }
    }
}

impl Config {
    /// Path of the config file.
    ///
    /// `POSE_INGEST_CONFIG` wins; otherwise the platform config dir
    /// (Linux: `~/.config/pose-ingest/config.json`).
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("POSE_INGEST_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("pose-ingest")
            .join("config.json"))
    }

    /// Loads configuration from the default path (if present), with
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like [`load`](Self::load), but an explicit `path` must exist.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit file. Missing keys take defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("POSE_INGEST_BIND") {
            self.bind = bind;
        }

        if let Ok(capacity) = std::env::var("POSE_INGEST_SINK_CAPACITY") {
            match capacity.parse::<usize>() {
                Ok(capacity) => self.sink_capacity = capacity,
                Err(_) => log::warn!(
                    "Ignoring POSE_INGEST_SINK_CAPACITY={capacity:?} (expected a positive integer)"
                ),
            }
        }

        if let Ok(policy) = std::env::var("POSE_INGEST_BACKPRESSURE") {
            match policy.as_str() {
                "wait" => self.backpressure = BackpressurePolicy::Wait,
                "drop" => self.backpressure = BackpressurePolicy::Drop,
                other => log::warn!("Ignoring POSE_INGEST_BACKPRESSURE={other:?} (expected wait|drop)"),
            }
        }

        if let Ok(idle) = std::env::var("POSE_INGEST_IDLE_TIMEOUT") {
            match idle.parse::<u64>() {
                Ok(secs) => self.idle_timeout_secs = secs,
                Err(_) => log::warn!(
                    "Ignoring POSE_INGEST_IDLE_TIMEOUT={idle:?} (expected whole seconds)"
                ),
            }
        }
    }

    /// Reject values the server cannot run with.
    pub fn check(&self) -> Result<()> {
        self.bind_addr()?;
        if self.sink_capacity == 0 {
            anyhow::bail!("sink_capacity must be at least 1");
        }
        if self.max_message_size == 0 {
            anyhow::bail!("max_message_size must be at least 1");
        }
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("handshake_timeout_secs must be at least 1");
        }
        self.validation.check()
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind))
    }

    /// Idle-read timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// WebSocket upgrade timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Per-session options derived from this config.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            backpressure: self.backpressure,
            idle_timeout: self.idle_timeout(),
        }
    }
}
