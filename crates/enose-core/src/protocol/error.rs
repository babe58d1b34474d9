//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Discovery exhausted every candidate port
    #[error("E-Nose not found. Please check the connection.")]
    DeviceNotFound,

    /// The port answered the identification request with something else
    #[error("Identifier mismatch: expected '{expected}', got '{actual}'")]
    HandshakeMismatch { expected: String, actual: String },

    /// Open/read/write failure at the OS or driver level
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Timed out waiting for the device")]
    Timeout,

    /// Line is not valid structured data (or a known shape with bad fields)
    #[error("Malformed message: {0}")]
    ParseError(String),

    /// Valid JSON with a shape the host does not know
    #[error("Unrecognized message: {0}")]
    UnrecognizedMessage(String),

    #[error("Not connected to the device")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
