//! Data Logging
//!
//! Keeps the most recent sensor samples for live display and records every
//! sample to a CSV log while a recording is active.

mod buffer;
mod format;
mod recorder;
mod store;

pub use buffer::{BufferSnapshot, RollingBuffer, DEFAULT_BUFFER_CAPACITY};
pub use format::{read_log, resolve_log_path, LogRow, CSV_HEADER};
pub use recorder::{Recorder, RecordingSummary};
pub use store::SampleStore;

use serde::{Deserialize, Serialize};

use crate::protocol::OPERATION_COMPLETED;

/// Number of gas sensor channels on the device
pub const GAS_CHANNELS: usize = 7;

/// One reading as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    /// Device-assigned sequence number, restarted by the 'R' command
    pub item_number: u64,
    /// Gas channel readings, channel 1 first
    pub gas_values: [f64; GAS_CHANNELS],
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Firmware operation status; 2 means the configured cycles finished
    pub operation_status: i64,
}

impl SensorSample {
    /// Create a new sample
    pub fn new(
        item_number: u64,
        gas_values: [f64; GAS_CHANNELS],
        temperature: f64,
        humidity: f64,
        operation_status: i64,
    ) -> Self {
        Self {
            item_number,
            gas_values,
            temperature,
            humidity,
            operation_status,
        }
    }

    /// Check if the device reports its run as finished
    pub fn is_completed(&self) -> bool {
        self.operation_status == OPERATION_COMPLETED
    }
}
