//! TOML-based configuration for the peer agent.
//!
//! The file is read once at start-up from the path given on the command line
//! (default `./config.toml`).  A missing file means "use defaults"; a file
//! that exists but fails to parse or validate is a fatal start-up error.
//!
//! ```toml
//! [app]
//! log_level = "info"
//! transition_poll_ms = 50
//!
//! [escape_sequence]
//! key_count = 3
//! timeframe_seconds = 1
//!
//! [discovery]
//! multicast_address = "239.2.3.239:2399"
//! poll_count = 3
//! poll_interval_seconds = 2
//! cluster_id = "default"
//! api_version = 1
//!
//! [relay]
//! port = 4283
//! ping_interval_seconds = 9
//! pong_wait_seconds = 10
//! write_wait_seconds = 10
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]`, so a
//! partial file (say, only `[discovery] cluster_id`) still yields a complete
//! configuration.

use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvm_mesh_core::protocol::messages::API_VERSION;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its permitted range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level peer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub app: GeneralConfig,
    #[serde(default)]
    pub escape_sequence: EscapeSequenceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub relay: RelayPortConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Cursor-watch poll interval in milliseconds.
    #[serde(default = "default_transition_poll_ms")]
    pub transition_poll_ms: u64,
}

/// Emergency-release gesture: `key_count` Alt releases within `timeframe_seconds`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscapeSequenceConfig {
    #[serde(default = "default_key_count")]
    pub key_count: usize,
    #[serde(default = "default_timeframe_seconds")]
    pub timeframe_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Multicast group and port, e.g. `"239.2.3.239:2399"`.
    #[serde(default = "default_multicast_address")]
    pub multicast_address: String,
    /// Queries sent before self-electing.
    #[serde(default = "default_poll_count")]
    pub poll_count: u32,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Peers only cooperate with others that share this id.
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayPortConfig {
    /// TCP port the relay listens on when this peer is elected.
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_pong_wait_seconds")]
    pub pong_wait_seconds: u64,
    #[serde(default = "default_write_wait_seconds")]
    pub write_wait_seconds: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_transition_poll_ms() -> u64 {
    50
}
fn default_key_count() -> usize {
    3
}
fn default_timeframe_seconds() -> u64 {
    1
}
fn default_multicast_address() -> String {
    "239.2.3.239:2399".to_string()
}
fn default_poll_count() -> u32 {
    3
}
fn default_poll_interval_seconds() -> u64 {
    2
}
fn default_cluster_id() -> String {
    "default".to_string()
}
fn default_api_version() -> u8 {
    API_VERSION
}
fn default_relay_port() -> u16 {
    4283
}
fn default_ping_interval_seconds() -> u64 {
    9
}
fn default_pong_wait_seconds() -> u64 {
    10
}
fn default_write_wait_seconds() -> u64 {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transition_poll_ms: default_transition_poll_ms(),
        }
    }
}

impl Default for EscapeSequenceConfig {
    fn default() -> Self {
        Self {
            key_count: default_key_count(),
            timeframe_seconds: default_timeframe_seconds(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_address: default_multicast_address(),
            poll_count: default_poll_count(),
            poll_interval_seconds: default_poll_interval_seconds(),
            cluster_id: default_cluster_id(),
            api_version: default_api_version(),
        }
    }
}

impl Default for RelayPortConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            ping_interval_seconds: default_ping_interval_seconds(),
            pong_wait_seconds: default_pong_wait_seconds(),
            write_wait_seconds: default_write_wait_seconds(),
        }
    }
}

// ── Validation and typed accessors ────────────────────────────────────────────

impl AppConfig {
    /// Checks every range constraint, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: String) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg))
        }

        if self.app.transition_poll_ms < 10 {
            return invalid(format!(
                "app.transition_poll_ms must be >= 10, got {}",
                self.app.transition_poll_ms
            ));
        }
        if self.escape_sequence.key_count < 2 {
            return invalid(format!(
                "escape_sequence.key_count must be >= 2, got {}",
                self.escape_sequence.key_count
            ));
        }
        if !(1..=5).contains(&self.escape_sequence.timeframe_seconds) {
            return invalid(format!(
                "escape_sequence.timeframe_seconds must be in 1..=5, got {}",
                self.escape_sequence.timeframe_seconds
            ));
        }
        let group = self.multicast_group()?;
        if !group.ip().is_multicast() {
            return invalid(format!(
                "discovery.multicast_address {group} is not a multicast group"
            ));
        }
        if self.discovery.poll_count < 1 {
            return invalid("discovery.poll_count must be >= 1".to_string());
        }
        if self.discovery.poll_interval_seconds < 1 {
            return invalid("discovery.poll_interval_seconds must be >= 1".to_string());
        }
        if self.discovery.cluster_id.is_empty() {
            return invalid("discovery.cluster_id must not be empty".to_string());
        }
        if self.relay.port < 1025 {
            return invalid(format!(
                "relay.port must be in 1025..=65535, got {}",
                self.relay.port
            ));
        }
        if self.relay.ping_interval_seconds < 1 {
            return invalid("relay.ping_interval_seconds must be >= 1".to_string());
        }
        if self.relay.pong_wait_seconds <= self.relay.ping_interval_seconds {
            return invalid(format!(
                "relay.pong_wait_seconds ({}) must exceed relay.ping_interval_seconds ({})",
                self.relay.pong_wait_seconds, self.relay.ping_interval_seconds
            ));
        }
        if !(1..=30).contains(&self.relay.write_wait_seconds) {
            return invalid(format!(
                "relay.write_wait_seconds must be in 1..=30, got {}",
                self.relay.write_wait_seconds
            ));
        }
        Ok(())
    }

    /// Parses `discovery.multicast_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an `IPv4:port` pair.
    pub fn multicast_group(&self) -> Result<SocketAddrV4, ConfigError> {
        self.discovery.multicast_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "discovery.multicast_address {:?} is not an IPv4 socket address",
                self.discovery.multicast_address
            ))
        })
    }

    pub fn transition_poll(&self) -> Duration {
        Duration::from_millis(self.app.transition_poll_ms)
    }

    pub fn escape_window(&self) -> Duration {
        Duration::from_secs(self.escape_sequence.timeframe_seconds)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.poll_interval_seconds)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads and validates `AppConfig` from `path`.
///
/// Returns `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if a value is out of range.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
