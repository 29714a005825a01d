//! Configuration for setu-link connections
//!
//! Loads link parameters from a TOML file. All values have defaults that
//! match the behavior of the reference adapter firmware, so most callers
//! can use [`LinkConfig::default()`] unchanged.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Link-layer timing and retry parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Per-attempt acknowledgment deadline in milliseconds
    pub ack_timeout_ms: u64,
    /// Number of retries after the first send (total attempts = retries + 1)
    pub retries: u32,
    /// Reader thread sleep between bus drains, in microseconds
    pub reader_poll_interval_us: u64,
    /// Sleep between ingest-log polls while waiting for an acknowledgment,
    /// in microseconds
    pub ack_poll_interval_us: u64,
    /// Outer timeout for radio device discovery, in seconds
    pub discovery_timeout_s: u64,
    /// Outer timeout for radio connect handshakes, in seconds
    pub connect_timeout_s: u64,
    /// Timeout for per-device attribute polls (name/address/RSSI), in
    /// milliseconds
    pub attribute_timeout_ms: u64,
    /// Tear the connection down when a request exhausts its retries,
    /// instead of leaving it up for the caller to decide
    #[serde(default)]
    pub teardown_on_timeout: bool,
}

impl LinkConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: LinkConfig =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Per-attempt acknowledgment deadline
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Reader thread drain interval
    pub fn reader_poll_interval(&self) -> Duration {
        Duration::from_micros(self.reader_poll_interval_us)
    }

    /// Acknowledgment poll interval
    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_micros(self.ack_poll_interval_us)
    }

    /// Radio discovery deadline
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_s)
    }

    /// Radio connect deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s)
    }

    /// Device attribute poll deadline
    pub fn attribute_timeout(&self) -> Duration {
        Duration::from_millis(self.attribute_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 1000,
            retries: 10,
            reader_poll_interval_us: 500,
            ack_poll_interval_us: 200,
            discovery_timeout_s: 10,
            connect_timeout_s: 10,
            attribute_timeout_ms: 2000,
            teardown_on_timeout: false,
        }
    }
}
