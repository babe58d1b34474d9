//! Inbound message classification
//!
//! Every decoded line falls into exactly one class: a debug passthrough, a
//! sensor sample, a settings report, or an error (malformed or unrecognized).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DeviceSettings, ProtocolError};
use crate::datalog::SensorSample;

/// Key marking a sensor sample object
pub const SAMPLE_KEY: &str = "itemNumber";

/// Key marking a settings report object
pub const SETTINGS_KEY: &str = "relaySolenoid1";

/// A classified line from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceMessage {
    /// Diagnostic text from the firmware (prefix included)
    Diagnostic(String),
    /// One multi-channel reading
    Sample(SensorSample),
    /// Current device settings
    Settings(DeviceSettings),
}

/// Classify one line.
///
/// Lines starting with `debug_prefix` are never parsed. Anything else must be
/// a JSON object of a known shape.
pub fn parse_line(line: &str, debug_prefix: &str) -> Result<DeviceMessage, ProtocolError> {
    if line.starts_with(debug_prefix) {
        return Ok(DeviceMessage::Diagnostic(line.to_string()));
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::ParseError(format!("{e}: {line}")))?;

    let Some(object) = value.as_object() else {
        return Err(ProtocolError::UnrecognizedMessage(line.to_string()));
    };

    if object.contains_key(SAMPLE_KEY) {
        let sample: SensorSample = serde_json::from_value(value)
            .map_err(|e| ProtocolError::ParseError(format!("bad sample ({e}): {line}")))?;
        Ok(DeviceMessage::Sample(sample))
    } else if object.contains_key(SETTINGS_KEY) {
        let settings: DeviceSettings = serde_json::from_value(value)
            .map_err(|e| ProtocolError::ParseError(format!("bad settings ({e}): {line}")))?;
        Ok(DeviceMessage::Settings(settings))
    } else {
        Err(ProtocolError::UnrecognizedMessage(line.to_string()))
    }
}
