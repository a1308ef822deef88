//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The InfluxDB password can be overridden with the `INFLUXDB_PASSWORD`
//! environment variable so it does not have to live in the file.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Environment variable overriding `influx.password`
pub const PASSWORD_ENV_VAR: &str = "INFLUXDB_PASSWORD";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub influx: InfluxConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// InfluxDB sink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InfluxConfig {
    #[serde(default = "default_influx_host")]
    pub host: String,

    #[serde(default = "default_influx_port")]
    pub port: u16,

    #[serde(default = "default_influx_user")]
    pub user: String,

    #[serde(default = "default_influx_password")]
    pub password: String,

    #[serde(default = "default_influx_database")]
    pub database: String,

    #[serde(default = "default_influx_timeout_ms")]
    pub timeout_ms: u64,
}

/// Unit registry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: String,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Create unknown units on GPS uplinks instead of dropping the fix
    #[serde(default = "default_create_unit_on_gps")]
    pub create_unit_on_gps: bool,
}

/// Uplink intake configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_envelope_bytes")]
    pub max_envelope_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Log every line-protocol body sent to InfluxDB
    #[serde(default)]
    pub log_queries: bool,

    /// Log every incoming uplink
    #[serde(default)]
    pub log_messages: bool,

    /// Directory for daily log files; empty logs to stdout only
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_influx_host() -> String { "localhost".to_string() }
fn default_influx_port() -> u16 { 8086 }
fn default_influx_user() -> String { "airsenseur".to_string() }
fn default_influx_password() -> String { "airsenseur".to_string() }
fn default_influx_database() -> String { "airsenseur".to_string() }
fn default_influx_timeout_ms() -> u64 { 5000 }

fn default_registry_path() -> String { "asedb.json".to_string() }
fn default_write_timeout_ms() -> u64 { 2000 }
fn default_create_unit_on_gps() -> bool { true }

fn default_max_envelope_bytes() -> usize { 4096 }

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: default_influx_host(),
            port: default_influx_port(),
            user: default_influx_user(),
            password: default_influx_password(),
            database: default_influx_database(),
            timeout_ms: default_influx_timeout_ms(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            write_timeout_ms: default_write_timeout_ms(),
            create_unit_on_gps: default_create_unit_on_gps(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: default_max_envelope_bytes(),
        }
    }
}

impl InfluxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RegistryConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// `INFLUXDB_PASSWORD`, when set, replaces `influx.password`.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ase_lora_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;

        if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
            config.influx.password = password;
            config.validate()?;
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.influx.host.is_empty() {
            return Err(invalid("influx host cannot be empty"));
        }

        if self.influx.port == 0 {
            return Err(invalid("influx port must be greater than 0"));
        }

        if self.influx.database.is_empty() {
            return Err(invalid("influx database cannot be empty"));
        }

        if self.influx.timeout_ms == 0 || self.influx.timeout_ms > 60000 {
            return Err(invalid("influx timeout_ms must be between 1 and 60000"));
        }

        if self.registry.path.is_empty() {
            return Err(invalid("registry path cannot be empty"));
        }

        if self.registry.write_timeout_ms == 0 || self.registry.write_timeout_ms > 60000 {
            return Err(invalid("registry write_timeout_ms must be between 1 and 60000"));
        }

        if self.ingest.max_envelope_bytes == 0 || self.ingest.max_envelope_bytes > 65536 {
            return Err(invalid("ingest max_envelope_bytes must be between 1 and 65536"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}
