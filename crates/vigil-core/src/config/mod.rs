//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations of every section
//! 2. **Config file**: TOML file named by the `VIGIL_CONFIG` env var
//! 3. **Environment variables**: `VIGIL__SECTION__FIELD` overrides single fields
//!
//! # Configuration Sections
//!
//! - [`NodeConfig`]: node URL, expected genesis and HTTP client limits
//! - [`TrackerConfig`]: polling and Beat stream timing
//! - [`RevisionCacheConfig`]: per-kind cache capacities
//! - [`DriverConfig`]: irreversibility depth and fetch retries
//! - [`RemoteConfig`]: proxy reconnection timing
//! - [`HostConfig`]: listener of the driver host
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [node]
//! url = "http://127.0.0.1:8669"
//!
//! [tracker]
//! poll_interval_ms = 8000
//!
//! [cache]
//! account_capacity = 4096
//!
//! [host]
//! bind_port = 8670
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::{
    cache::RevisionCacheConfig, chain::TrackerConfig, driver::DriverConfig,
    remote::RemoteConfig, transport::HttpTransportConfig,
};

/// Node connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base URL of the node's HTTP API. Defaults to `http://127.0.0.1:8669`.
    #[serde(default = "default_node_url")]
    pub url: String,

    /// Refuse to start unless the node's genesis block has this id.
    #[serde(default)]
    pub genesis_id: Option<String>,

    /// HTTP client limits.
    #[serde(default)]
    pub http: HttpTransportConfig,
}

fn default_node_url() -> String {
    "http://127.0.0.1:8669".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { url: default_node_url(), genesis_id: None, http: HttpTransportConfig::default() }
    }
}

/// Driver host listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// IP address to bind. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Must be greater than 0. Defaults to `8670`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8670
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), bind_port: default_bind_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive. Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub cache: RevisionCacheConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Use `__` as a separator for nested fields (e.g. `VIGIL__HOST__BIND_PORT=9000`).
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("node.url", default_node_url())?
            .set_default("host.bind_address", default_bind_address())?
            .set_default("host.bind_port", i64::from(default_bind_port()))?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("VIGIL").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the file named by
    /// `VIGIL_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the host listener address.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.host.bind_address, self.host.bind_port).parse().map_err(|_| {
            format!("Invalid socket address: {}:{}", self.host.bind_address, self.host.bind_port)
        })
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !self.node.url.starts_with("http") {
            return Err(format!("Invalid node URL: {}", self.node.url));
        }

        if self.node.http.concurrent_limit == 0 {
            return Err("Node concurrent limit must be greater than 0".to_string());
        }

        if self.tracker.poll_interval_ms == 0 {
            return Err("Tracker poll interval must be greater than 0".to_string());
        }

        if self.tracker.beat_promotion_streak == 0 {
            return Err("Beat promotion streak must be greater than 0".to_string());
        }

        self.cache.validate().map_err(|e| e.to_string())?;

        if self.remote.reconnect_delay_seconds == 0 {
            return Err("Remote reconnect delay must be greater than 0".to_string());
        }

        if self.host.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
