// src/config.rs

//! Manages server configuration: loading, defaults, and validation.
//!
//! Every tunable defaults to the value the hub's backpressure and liveness
//! contract is designed around, so an empty file behaves like no file.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Capacities and timeouts of the hub's event loop.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub register_capacity: usize,
    pub unregister_capacity: usize,
    pub broadcast_capacity: usize,
    /// How long a register/unregister/broadcast call may wait for channel space.
    #[serde(with = "humantime_serde")]
    pub enqueue_timeout: Duration,
    /// Per-connection bound on each fan-out send.
    #[serde(with = "humantime_serde")]
    pub fanout_send_timeout: Duration,
    /// Interval of the sweep that evicts connections reporting themselves closed.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            register_capacity: 100,
            unregister_capacity: 100,
            broadcast_capacity: 1000,
            enqueue_timeout: Duration::from_secs(5),
            fanout_send_timeout: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SseConfig {
    /// A write that takes longer than this closes the connection.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
    /// Connections without a successful write for this long are closed.
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    pub outbound_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Read deadline, extended each time a pong arrives.
    #[serde(with = "humantime_serde")]
    pub pong_timeout: Duration,
    /// Must be strictly shorter than `pong_timeout`.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub enqueue_timeout: Duration,
    /// Reply to inbound text frames with an `echo` message.
    pub echo_text_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            write_timeout: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            enqueue_timeout: Duration::from_secs(5),
            echo_text_frames: true,
        }
    }
}

/// The top-level server configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Deadline given to the HTTP server to drain after the hub has stopped.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub hub: HubConfig,
    pub sse: SseConfig,
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            shutdown_timeout: Duration::from_secs(5),
            hub: HubConfig::default(),
            sse: SseConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config from '{path}'"))?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the defaults.
    /// Only an explicitly requested path is required to exist.
    pub fn load(path: &str, explicit: bool) -> Result<Self> {
        if !explicit && !Path::new(path).exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        let hub = &self.hub;
        if hub.register_capacity == 0 || hub.unregister_capacity == 0 || hub.broadcast_capacity == 0
        {
            return Err(anyhow!("hub channel capacities must be greater than 0"));
        }
        if hub.enqueue_timeout.is_zero() || hub.fanout_send_timeout.is_zero() {
            return Err(anyhow!("hub timeouts must be greater than 0"));
        }
        if hub.cleanup_interval.is_zero() {
            return Err(anyhow!("hub.cleanup_interval must be greater than 0"));
        }

        let sse = &self.sse;
        if sse.send_timeout.is_zero()
            || sse.keepalive_interval.is_zero()
            || sse.inactivity_timeout.is_zero()
        {
            return Err(anyhow!("sse timeouts and intervals must be greater than 0"));
        }

        let ws = &self.websocket;
        if ws.outbound_capacity == 0 {
            return Err(anyhow!("websocket.outbound_capacity must be greater than 0"));
        }
        if ws.write_timeout.is_zero() || ws.pong_timeout.is_zero() || ws.enqueue_timeout.is_zero() {
            return Err(anyhow!("websocket timeouts must be greater than 0"));
        }
        if ws.ping_interval.is_zero() || ws.ping_interval >= ws.pong_timeout {
            return Err(anyhow!(
                "websocket.ping_interval must be greater than 0 and shorter than websocket.pong_timeout"
            ));
        }
        Ok(())
    }
}
