//! Session configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::datalog::DEFAULT_BUFFER_CAPACITY;
use crate::protocol::{DiscoveryConfig, DEBUG_PREFIX, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Keep-alive period expected by the firmware, in milliseconds
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 2000;

/// Session configuration
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Read/write timeout per operation in milliseconds
    pub timeout_ms: u64,
    /// Period of the 'K' keep-alive in milliseconds
    pub keep_alive_interval_ms: u64,
    /// Sleep between reader polls when no bytes are waiting, in milliseconds
    pub reader_poll_interval_ms: u64,
    /// Prefix of firmware diagnostic lines
    pub debug_prefix: String,
    /// Samples kept for live display
    pub buffer_capacity: usize,
    /// Directory for recordings without an absolute path
    pub log_dir: PathBuf,
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
    /// Device discovery
    pub discovery: DiscoveryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_MS,
            reader_poll_interval_ms: 2,
            debug_prefix: DEBUG_PREFIX.to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            log_dir: PathBuf::from("."),
            event_capacity: 256,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Write this config as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write config {}", path.display()))
    }

    /// Read/write timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Keep-alive period
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms.max(1))
    }

    /// Reader poll interval
    pub fn reader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reader_poll_interval_ms.max(1))
    }
}
