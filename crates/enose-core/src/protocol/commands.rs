//! Protocol commands
//!
//! Defines the single-letter commands understood by the E-Nose firmware and
//! the settings payload carried by the save command.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Longest relay on-time accepted by the settings form, in seconds
pub const MAX_RELAY_DURATION_SECS: u32 = 1000;

/// Largest cycle count accepted by the settings form
pub const MAX_CYCLES: u32 = 100;

/// Host-to-device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Request the identifier token ('I')
    Identify,

    /// Start a session ('C')
    Connect,

    /// Keep the session alive ('K')
    KeepAlive,

    /// Start alternating the relays ('A')
    StartCycling,

    /// Stop alternating the relays ('B')
    StopCycling,

    /// Restart the item number sequence ('R')
    ResetSequence,

    /// Store new settings; followed by a JSON payload ('S')
    SaveSettings,

    /// Ask the device to report its settings ('L')
    LoadSettings,
}

impl Command {
    /// Get the command byte sent on the wire
    pub fn byte(&self) -> u8 {
        match self {
            Command::Identify => b'I',
            Command::Connect => b'C',
            Command::KeepAlive => b'K',
            Command::StartCycling => b'A',
            Command::StopCycling => b'B',
            Command::ResetSequence => b'R',
            Command::SaveSettings => b'S',
            Command::LoadSettings => b'L',
        }
    }

    /// Look up a command from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(Command::Identify),
            b'C' => Some(Command::Connect),
            b'K' => Some(Command::KeepAlive),
            b'A' => Some(Command::StartCycling),
            b'B' => Some(Command::StopCycling),
            b'R' => Some(Command::ResetSequence),
            b'S' => Some(Command::SaveSettings),
            b'L' => Some(Command::LoadSettings),
            _ => None,
        }
    }

    /// Check if the device answers this command with a line
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::Identify | Command::LoadSettings | Command::SaveSettings
        )
    }
}

/// On-time setting for one relay solenoid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySetting {
    /// Seconds the relay stays energised per half-cycle
    pub duration: u32,
}

/// Device settings as exchanged by the `S` and `L` commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    /// Relay solenoid 1
    pub relay_solenoid1: RelaySetting,
    /// Relay solenoid 2
    pub relay_solenoid2: RelaySetting,
    /// Number of cycles to run
    pub cycle: u32,
}

impl DeviceSettings {
    /// Create settings from relay durations (seconds) and a cycle count
    pub fn new(relay1_secs: u32, relay2_secs: u32, cycles: u32) -> Self {
        Self {
            relay_solenoid1: RelaySetting {
                duration: relay1_secs,
            },
            relay_solenoid2: RelaySetting {
                duration: relay2_secs,
            },
            cycle: cycles,
        }
    }

    /// Check the ranges the device accepts
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (name, relay) in [
            ("relaySolenoid1", self.relay_solenoid1),
            ("relaySolenoid2", self.relay_solenoid2),
        ] {
            if relay.duration > MAX_RELAY_DURATION_SECS {
                return Err(ProtocolError::InvalidSettings(format!(
                    "{} duration {}s exceeds {}s",
                    name, relay.duration, MAX_RELAY_DURATION_SECS
                )));
            }
        }
        if !(1..=MAX_CYCLES).contains(&self.cycle) {
            return Err(ProtocolError::InvalidSettings(format!(
                "cycle count {} outside 1..={}",
                self.cycle, MAX_CYCLES
            )));
        }
        Ok(())
    }

    /// Build the full save command: 'S' followed by the JSON payload
    pub fn to_save_command(&self) -> Result<Vec<u8>, ProtocolError> {
        self.validate()?;
        let mut bytes = vec![Command::SaveSettings.byte()];
        serde_json::to_writer(&mut bytes, self)
            .map_err(|e| ProtocolError::InvalidSettings(e.to_string()))?;
        Ok(bytes)
    }
}
