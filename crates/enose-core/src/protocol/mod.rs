//! Serial Protocol Communication
//!
//! Implements the E-Nose line protocol: single-letter commands from the host,
//! newline-terminated text (identifier, debug lines, JSON objects) from the
//! device.

pub mod commands;
pub mod discovery;
mod error;
pub mod framing;
pub mod message;
pub mod serial;
pub mod stream;
mod transport;

pub use commands::{Command, DeviceSettings, RelaySetting};
pub use discovery::{DiscoveredDevice, Discovery, DiscoveryConfig, UsbId};
pub use error::ProtocolError;
pub use framing::LineFramer;
pub use message::{parse_line, DeviceMessage};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo, SerialBackend};
pub use stream::{CommunicationChannel, PortBackend, SerialChannel};
pub use transport::Transport;

/// Baud rate of the device's USB-UART link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Timeout for a single read or write in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Token the device answers to 'I'
pub const DEVICE_IDENTIFIER: &str = "ESP32_DEVICE_IDENTIFIER";

/// Prefix of firmware diagnostic lines
pub const DEBUG_PREFIX: &str = "DEBUG:";

/// Operation status reported once the configured cycles have finished
pub const OPERATION_COMPLETED: i64 = 2;
