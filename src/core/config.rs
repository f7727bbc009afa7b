//! Configuration management for strobe.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults

use crate::core::{Result, StrobeError};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Complete configuration for strobe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Per-metric history configuration
    pub history: HistoryConfig,
    /// Broadcast scheduler configuration
    pub broadcast: BroadcastConfig,
    /// Subscriber transport configuration
    pub subscriber: SubscriberConfig,
    /// Ingest authentication configuration
    pub auth: AuthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// GRPC port for the telemetry ingestor
    pub grpc_port: u16,
    /// HTTP port for the WebSocket subscriber endpoint
    pub ws_port: u16,
    /// HTTP port for the Prometheus scrape endpoint
    pub metrics_port: u16,
    /// Bind address for all listeners
    pub bind_address: IpAddr,
}

/// Per-metric bounded history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Ring capacity for gauge and counter histories (10s at 100Hz)
    pub scalar_capacity: usize,
    /// Ring capacity for histogram histories
    pub histogram_capacity: usize,
    /// Samples per metric returned by windowed snapshots
    pub window_samples: usize,
}

/// Broadcast scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Tick interval for snapshot fan-out (~60Hz default)
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Capacity of the ingest update-hint channel
    pub update_channel_capacity: usize,
}

/// Subscriber transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Outbound mailbox capacity per subscriber
    pub mailbox_capacity: usize,
    /// Deadline for a single transport write
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Idle read deadline, refreshed by any inbound frame
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Heartbeat ping interval
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

/// Ingest authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted API keys; empty disables authentication
    pub api_keys: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format (targets, thread ids)
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            history: HistoryConfig::default(),
            broadcast: BroadcastConfig::default(),
            subscriber: SubscriberConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            grpc_port: 9000,
            ws_port: 8080,
            metrics_port: 9100,
            bind_address: "0.0.0.0".parse().expect("valid default IP address"),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            scalar_capacity: 1000,
            histogram_capacity: 500,
            window_samples: 100,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            tick_interval: Duration::from_millis(16),
            update_channel_capacity: 1000,
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            mailbox_capacity: 256,
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            api_keys: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ports = [
            ("grpc_port", self.server.grpc_port),
            ("ws_port", self.server.ws_port),
            ("metrics_port", self.server.metrics_port),
        ];
        for (i, (name_a, port_a)) in ports.iter().enumerate() {
            for (name_b, port_b) in ports.iter().skip(i + 1) {
                if port_a == port_b {
                    return Err(StrobeError::config(format!(
                        "{} and {} must be different: both set to {}",
                        name_a, name_b, port_a
                    )));
                }
            }
        }

        if self.history.scalar_capacity == 0 {
            return Err(StrobeError::config("scalar_capacity must be greater than 0"));
        }
        if self.history.histogram_capacity == 0 {
            return Err(StrobeError::config("histogram_capacity must be greater than 0"));
        }
        if self.history.window_samples == 0 {
            return Err(StrobeError::config("window_samples must be greater than 0"));
        }

        if self.broadcast.tick_interval.is_zero() {
            return Err(StrobeError::config("tick_interval must be greater than 0"));
        }
        if self.broadcast.update_channel_capacity == 0 {
            return Err(StrobeError::config("update_channel_capacity must be greater than 0"));
        }

        if self.subscriber.mailbox_capacity == 0 {
            return Err(StrobeError::config("mailbox_capacity must be greater than 0"));
        }
        if self.subscriber.ping_interval >= self.subscriber.idle_timeout {
            return Err(StrobeError::config(format!(
                "ping_interval ({:?}) must be shorter than idle_timeout ({:?})",
                self.subscriber.ping_interval, self.subscriber.idle_timeout
            )));
        }

        Ok(())
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| StrobeError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set GRPC ingest port
    pub fn grpc_port(mut self, port: u16) -> Self {
        self.config.server.grpc_port = port;
        self
    }

    /// Set WebSocket port
    pub fn ws_port(mut self, port: u16) -> Self {
        self.config.server.ws_port = port;
        self
    }

    /// Set Prometheus scrape port
    pub fn metrics_port(mut self, port: u16) -> Self {
        self.config.server.metrics_port = port;
        self
    }

    /// Set broadcast tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.broadcast.tick_interval = interval;
        self
    }

    /// Set accepted API keys
    pub fn api_keys(mut self, keys: Vec<String>) -> Self {
        self.config.auth.api_keys = keys;
        self
    }

    /// Set scalar history capacity
    pub fn scalar_capacity(mut self, capacity: usize) -> Self {
        self.config.history.scalar_capacity = capacity;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.grpc_port, 9000);
        assert_eq!(config.history.scalar_capacity, 1000);
        assert_eq!(config.history.histogram_capacity, 500);
        assert_eq!(config.broadcast.tick_interval, Duration::from_millis(16));
        assert_eq!(config.subscriber.mailbox_capacity, 256);
    }

    #[test]
    fn test_port_collision_rejected() {
        let mut config = Config::default();
        config.server.ws_port = config.server.grpc_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacities_rejected() {
        let mut config = Config::default();
        config.history.scalar_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.subscriber.mailbox_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ping_must_beat_idle_deadline() {
        let mut config = Config::default();
        config.subscriber.ping_interval = Duration::from_secs(90);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ConfigBuilder::new()
            .grpc_port(19000)
            .ws_port(18080)
            .tick_interval(Duration::from_millis(33))
            .api_keys(vec!["secret".to_string()])
            .build()
            .unwrap();

        assert_eq!(config.server.grpc_port, 19000);
        assert_eq!(config.server.ws_port, 18080);
        assert_eq!(config.broadcast.tick_interval, Duration::from_millis(33));
        assert_eq!(config.auth.api_keys, vec!["secret".to_string()]);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  grpc_port: 9001
  ws_port: 8081
  metrics_port: 9101
  bind_address: "127.0.0.1"
broadcast:
  tick_interval: 33ms
  update_channel_capacity: 500
"#;
        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.server.grpc_port, 9001);
        assert_eq!(config.broadcast.tick_interval, Duration::from_millis(33));
        assert_eq!(config.broadcast.update_channel_capacity, 500);
        // Sections absent from the file keep their defaults.
        assert_eq!(config.subscriber.mailbox_capacity, 256);
    }
}
