//! # Configuration Settings
//!
//! Typed configuration for the Stratus control plane. Values are populated
//! from CLI flags (see `main.rs`) with environment-variable fallbacks, then
//! validated before any component starts.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// xDS server configuration
    pub xds: XdsConfig,

    /// Logging configuration
    pub log: LogConfig,
}

/// xDS server and reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XdsConfig {
    /// Address the ADS gRPC server binds to
    pub listen_addr: String,

    /// Debounce window applied to bursts of object events before a rebuild
    pub holdoff_ms: u64,

    /// Upper bound on how long a rebuild may be delayed by fresh events
    pub max_holdoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level when RUST_LOG is unset (e.g. "info", "stratus=debug")
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self { xds: XdsConfig::default(), log: LogConfig::default() }
    }
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0:5678".to_string(), holdoff_ms: 100, max_holdoff_ms: 500 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

impl Config {
    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.xds.listen_addr.parse::<SocketAddr>().map_err(|e| {
            Error::config(format!("invalid xDS listen address '{}': {}", self.xds.listen_addr, e))
        })?;

        if self.xds.holdoff_ms > self.xds.max_holdoff_ms {
            return Err(Error::config(format!(
                "holdoff ({}ms) must not exceed max holdoff ({}ms)",
                self.xds.holdoff_ms, self.xds.max_holdoff_ms
            )));
        }

        Ok(())
    }
}

impl XdsConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| Error::config(format!("invalid xDS listen address: {}", e)))
    }

    pub fn holdoff(&self) -> Duration {
        Duration::from_millis(self.holdoff_ms)
    }

    pub fn max_holdoff(&self) -> Duration {
        Duration::from_millis(self.max_holdoff_ms)
    }
}
