//! Device Session
//!
//! Owns the single live connection to the device: discovery, the reader and
//! dispatcher threads, the keep-alive timer, and recording control. State and
//! events are published as plain data for whatever presentation layer sits on
//! top.

mod config;
mod dispatcher;
mod keepalive;
mod manager;
mod reader;

pub use config::{SessionConfig, DEFAULT_KEEP_ALIVE_MS};
pub use manager::SessionManager;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::datalog::{RecordingSummary, SampleStore, SensorSample};
use crate::protocol::{Command, DeviceSettings, ProtocolError, Transport};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No device session
    Disconnected,
    /// Discovery and handshake in progress
    Identifying,
    /// Session live
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionState::Disconnected => "Not connected",
            SessionState::Identifying => "Searching for device",
            SessionState::Connected => "Connected",
        };
        f.write_str(text)
    }
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `stop_recording` was called
    User,
    /// The device reported its cycles as completed
    Completed,
    /// Writing the log failed
    LogError,
    /// The session ended while recording
    Disconnected,
}

/// Everything a presentation layer needs to follow a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// A sample was added to the buffer
    Sample(SensorSample),
    /// The device reported its settings
    Settings(DeviceSettings),
    /// Firmware diagnostic line
    Diagnostic(String),
    /// Recording started into this file
    RecordingStarted(PathBuf),
    /// Recording ended
    RecordingStopped {
        /// Log written, if it closed cleanly
        summary: Option<RecordingSummary>,
        /// What ended it
        reason: StopReason,
    },
    /// User-facing status text
    Status(String),
}

/// State shared between the manager and its background threads
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) store: SampleStore,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    settings: Mutex<Option<DeviceSettings>>,
}

impl Shared {
    pub(crate) fn new(buffer_capacity: usize, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            store: SampleStore::new(buffer_capacity),
            events,
            state,
            settings: Mutex::new(None),
        }
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("session state {:?} -> {:?}", previous, state);
            self.publish(SessionEvent::StateChanged(state));
        }
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text);
        self.publish(SessionEvent::Status(text));
    }

    pub(crate) fn settings(&self) -> Option<DeviceSettings> {
        *self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_settings(&self, settings: Option<DeviceSettings>) {
        *self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    /// Finish the log and announce it. `None` when nothing was recording,
    /// otherwise the summary if the log closed cleanly.
    pub(crate) fn finish_recording(&self, reason: StopReason) -> Option<Option<RecordingSummary>> {
        let outcome = self.store.stop_recording()?;
        Some(self.announce_stop(outcome, reason))
    }

    /// Publish the end of a recording already taken out of the store
    pub(crate) fn announce_stop(
        &self,
        outcome: io::Result<RecordingSummary>,
        reason: StopReason,
    ) -> Option<RecordingSummary> {
        let summary = match outcome {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("failed to close log: {}", e);
                None
            }
        };
        self.publish(SessionEvent::RecordingStopped {
            summary: summary.clone(),
            reason,
        });
        summary
    }
}

/// End the recording and send 'B'. Only the caller that actually took the
/// recording sends 'B'; `Ok(None)` also covers a log that failed to close.
pub(crate) fn stop_cycling(
    shared: &Shared,
    transport: &Transport,
    reason: StopReason,
) -> Result<Option<RecordingSummary>, ProtocolError> {
    let Some(summary) = shared.finish_recording(reason) else {
        return Ok(None);
    };
    if let Err(e) = transport.send(Command::StopCycling) {
        warn!("failed to send stop command: {}", e);
        return Err(e);
    }
    Ok(summary)
}
