//! Configuration for the hub and the edge sender.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVEL_ENV: &str = "CAMHUB_LOG_LEVEL";
const EDGE_SERVER_ENV: &str = "CAMHUB_EDGE_SERVER";

/// One listening channel of the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, e.g. `Face` or `Cart`.
    pub name: String,
    /// `host:port` to listen on.
    pub bind_addr: String,
    /// Accept server-to-device broadcasts on this channel.
    #[serde(default)]
    pub push: bool,
}

impl ChannelConfig {
    pub fn new(name: &str, bind_addr: &str, push: bool) -> Self {
        Self {
            name: name.to_string(),
            bind_addr: bind_addr.to_string(),
            push,
        }
    }
}

/// Edge device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub server_addr: String,
    pub camera_id: String,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_send_attempts: u32,
    pub connect_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Unset means reconnect forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Unset means an unbounded queue.
    pub queue_capacity: Option<usize>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5001".to_string(),
            camera_id: "Face".to_string(),
            poll_interval_ms: 1000,
            retry_delay_ms: 1000,
            max_send_attempts: 3,
            connect_timeout_ms: 5000,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: None,
            queue_capacity: None,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Hub listeners, one per channel.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub edge: EdgeConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new("Face", "0.0.0.0:5001", true),
        ChannelConfig::new("Cart", "0.0.0.0:5002", false),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            channels: default_channels(),
            edge: EdgeConfig::default(),
        }
    }
}

impl Config {
    /// Load `~/.camhub/config.json` (or defaults when absent), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        Ok(config)
    }

    /// Load an explicitly named file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.load_from_env();
        Ok(config)
    }

    /// Parse a configuration file as-is.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        self.save_to_file(&paths.config_file())
    }

    pub fn save_to_file(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings the hub and edge cannot run without.
    pub fn validate(&self) -> CoreResult<()> {
        if self.channels.is_empty() {
            return Err(CoreError::Config("no channels configured".to_string()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(CoreError::Config("channel name is empty".to_string()));
            }
            if channel.bind_addr.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "channel {} has an empty bind address",
                    channel.name
                )));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "channel {} is configured twice",
                    channel.name
                )));
            }
        }

        if self.edge.server_addr.trim().is_empty() {
            return Err(CoreError::Config("edge server address is empty".to_string()));
        }
        if self.edge.max_send_attempts == 0 {
            return Err(CoreError::Config(
                "edge max_send_attempts must be at least 1".to_string(),
            ));
        }
        if self.edge.queue_capacity == Some(0) {
            return Err(CoreError::Config(
                "edge queue_capacity must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_level = log_level.trim().to_string();
        }
        if let Some(server) = lookup(EDGE_SERVER_ENV).filter(|v| !v.trim().is_empty()) {
            self.edge.server_addr = server.trim().to_string();
        }
    }
}
