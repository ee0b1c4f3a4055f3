//! # Configuration Management
//!
//! Centralized configuration for a cluster node.
//!
//! This module provides structured configuration for node identity, connection limits,
//! multiplexer sizing, access control and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`MESHLINK_*`)
//!
//! ## Example
//! ```toml
//! [node]
//! node_id = "node-a"
//! listen_address = "0.0.0.0:6969"
//! peers = ["10.0.0.2:6969", "10.0.0.3:6969"]
//!
//! [connection]
//! handshake_timeout = 5000
//!
//! [acl]
//! shared_secret = "token"
//! ```

use crate::core::packet::Command;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed payload size (e.g. 16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default TCP port nodes listen on
pub const DEFAULT_PORT: u16 = 6969;

/// Main node configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeConfig {
    /// Identity and membership
    #[serde(default)]
    pub node: NodeSection,

    /// Per-connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Worker pools and shared channels
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,

    /// Access control lists
    #[serde(default)]
    pub acl: AclConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from `lookup` (normally the process environment) onto this config
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("MESHLINK_NODE_ID") {
            self.node.node_id = id;
        }

        if let Some(addr) = lookup("MESHLINK_LISTEN_ADDRESS") {
            self.node.listen_address = addr;
        }

        if let Some(peers) = lookup("MESHLINK_PEERS") {
            self.node.peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(timeout) = lookup("MESHLINK_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.connection.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Some(timeout) = lookup("MESHLINK_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.connection.request_timeout = Duration::from_millis(val);
            }
        }

        if let Some(workers) = lookup("MESHLINK_INBOUND_WORKERS") {
            if let Ok(val) = workers.parse::<usize>() {
                self.multiplexer.inbound_workers = val;
            }
        }

        if let Some(workers) = lookup("MESHLINK_OUTBOUND_WORKERS") {
            if let Ok(val) = workers.parse::<usize>() {
                self.multiplexer.outbound_workers = val;
            }
        }

        if let Some(secret) = lookup("MESHLINK_SHARED_SECRET") {
            self.acl.shared_secret = Some(secret);
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.node.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.multiplexer.validate());
        errors.extend(self.acl.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Node identity and static membership
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    /// Identifier announced in the handshake; generated when not configured
    pub node_id: String,

    /// Listen address (e.g., "0.0.0.0:6969")
    pub listen_address: String,

    /// Peers dialled at start-up
    #[serde(default)]
    pub peers: Vec<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            peers: Vec::new(),
        }
    }
}

impl NodeSection {
    /// Validate node configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.node_id.is_empty() {
            errors.push("Node id cannot be empty".to_string());
        } else if self.node_id.len() > crate::protocol::handshake::MAX_NODE_ID_LEN {
            errors.push(format!(
                "Node id too long: {} bytes (maximum: {})",
                self.node_id.len(),
                crate::protocol::handshake::MAX_NODE_ID_LEN
            ));
        }

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:6969')",
                self.listen_address
            ));
        }

        for peer in &self.peers {
            if peer.parse::<SocketAddr>().is_err() {
                errors.push(format!(
                    "Invalid peer address format: '{peer}' (expected format: '10.0.0.2:6969')"
                ));
            }
        }

        errors
    }
}

/// Per-connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Deadline for the peer's `HELLO`
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Deadline for a reply to `Node::request`
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Capacity of each connection's outbound channel
    pub outbound_buffer_size: usize,

    /// Maximum allowed payload size in bytes
    pub max_payload_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            request_timeout: timeout::DEFAULT_TIMEOUT,
            outbound_buffer_size: 64,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        }

        if self.outbound_buffer_size == 0 {
            errors.push("Outbound buffer size must be greater than 0".to_string());
        } else if self.outbound_buffer_size > 1_000_000 {
            errors.push(format!(
                "Outbound buffer size too large: {} (max recommended: 1,000,000)",
                self.outbound_buffer_size
            ));
        }

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > u32::MAX as usize {
            errors.push(format!(
                "Max payload size too large: {} bytes (frame length field is 32 bits)",
                self.max_payload_size
            ));
        }

        errors
    }
}

/// Multiplexer sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Workers draining inbound frames; each connection is pinned to one
    pub inbound_workers: usize,

    /// Workers draining application send requests
    pub outbound_workers: usize,

    /// Capacity of the shared inbound and outbound channels
    pub buffer_size: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            inbound_workers: 4,
            outbound_workers: 4,
            buffer_size: 1024,
        }
    }
}

impl MultiplexerConfig {
    /// Validate multiplexer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.inbound_workers == 0 {
            errors.push("Inbound worker count must be greater than 0".to_string());
        }
        if self.outbound_workers == 0 {
            errors.push("Outbound worker count must be greater than 0".to_string());
        }
        if self.inbound_workers > 1024 || self.outbound_workers > 1024 {
            errors.push("Worker count too large (maximum: 1024)".to_string());
        }

        if self.buffer_size == 0 {
            errors.push("Multiplexer buffer size must be greater than 0".to_string());
        }

        errors
    }
}

/// Access control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AclConfig {
    /// Token selecting the privileged principal; no privileged principal when unset
    #[serde(default)]
    pub shared_secret: Option<String>,

    /// Commands allowed with an empty token
    pub anonymous_commands: Vec<String>,

    /// Commands allowed with the shared secret, on top of the anonymous ones
    pub privileged_commands: Vec<String>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            anonymous_commands: command_names(&[Command::Hello, Command::Exit, Command::Get]),
            privileged_commands: command_names(&[
                Command::Hello,
                Command::Exit,
                Command::Id,
                Command::Set,
            ]),
        }
    }
}

impl AclConfig {
    /// Validate ACL configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(secret) = &self.shared_secret {
            if secret.is_empty() {
                errors.push(
                    "Shared secret cannot be empty (an empty token is the anonymous principal)"
                        .to_string(),
                );
            }
        }

        for name in self
            .anonymous_commands
            .iter()
            .chain(self.privileged_commands.iter())
        {
            if name.parse::<Command>().is_err() {
                errors.push(format!("Unknown command in ACL: '{name}'"));
            }
        }

        errors
    }
}

fn command_names(commands: &[Command]) -> Vec<String> {
    commands.iter().map(|c| c.name().to_string()).collect()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("meshlink"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
