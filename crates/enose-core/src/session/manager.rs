//! Session manager
//!
//! Drives the connection lifecycle from the control context:
//! `Disconnected -> Identifying -> Connected -> Disconnected`.
//!
//! A live session owns three threads. The reader drains the transport, the
//! dispatcher routes what it reads, and the keep-alive timer pings the device.
//! All three share one [`Transport`], so every write goes through the same lock.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::dispatcher::Dispatcher;
use super::keepalive::KeepAlive;
use super::reader::ReaderLoop;
use super::{stop_cycling, SessionConfig, SessionEvent, SessionState, Shared, StopReason};
use crate::datalog::{resolve_log_path, BufferSnapshot, RecordingSummary};
use crate::protocol::{
    Command, DeviceSettings, Discovery, PortBackend, PortInfo, ProtocolError, SerialBackend,
    Transport,
};

struct ActiveSession {
    id: Uuid,
    port: PortInfo,
    transport: Transport,
    reader: Option<ReaderLoop>,
    dispatcher: Option<JoinHandle<()>>,
    keep_alive: Option<KeepAlive>,
    link_lost: Arc<AtomicBool>,
}

impl ActiveSession {
    fn is_live(&self) -> bool {
        !self.link_lost.load(Ordering::Acquire)
    }

    /// Stop the threads in dependency order. The transport is released when
    /// the session is dropped afterwards.
    fn shutdown(&mut self) {
        if let Some(mut keep_alive) = self.keep_alive.take() {
            keep_alive.stop();
        }
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        // The reader's sender is gone, so the dispatcher drains and exits
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }
}

/// Owns the single device session
pub struct SessionManager {
    config: SessionConfig,
    backend: Arc<dyn PortBackend>,
    shared: Arc<Shared>,
    session: Option<ActiveSession>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("port", &self.port().map(|p| p.name.clone()))
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl SessionManager {
    /// Create a manager that talks to real serial ports
    pub fn new(config: SessionConfig) -> Self {
        let backend = SerialBackend::new(config.baud_rate, config.timeout());
        Self::with_backend(config, Arc::new(backend))
    }

    /// Create a manager over any port backend (demo device, test double)
    pub fn with_backend(config: SessionConfig, backend: Arc<dyn PortBackend>) -> Self {
        let shared = Arc::new(Shared::new(config.buffer_capacity, config.event_capacity));
        Self {
            config,
            backend,
            shared,
            session: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Check if a session is up and its link is intact
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(ActiveSession::is_live)
    }

    /// Receive every [`SessionEvent`] from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    /// Watch the session state
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe_state()
    }

    /// Port of the current session
    pub fn port(&self) -> Option<&PortInfo> {
        self.session.as_ref().map(|s| &s.port)
    }

    /// Id of the current session, used in log spans
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Consistent copy of the rolling buffer
    pub fn snapshot(&self) -> BufferSnapshot {
        self.shared.store.snapshot()
    }

    /// Last settings report received this session
    pub fn latest_settings(&self) -> Option<DeviceSettings> {
        self.shared.settings()
    }

    /// Check if samples are being logged
    pub fn is_recording(&self) -> bool {
        self.shared.store.is_recording()
    }

    /// When the keep-alive last reached the device
    pub fn last_keep_alive(&self) -> Option<DateTime<Utc>> {
        self.session
            .as_ref()
            .and_then(|s| s.keep_alive.as_ref())
            .and_then(KeepAlive::last_sent)
    }

    /// Find the device and start a session
    pub fn connect(&mut self) -> Result<PortInfo, ProtocolError> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }
        // Reap a session whose link already died
        self.disconnect();

        self.shared.set_state(SessionState::Identifying);
        self.shared.status("Searching for E-Nose...");

        let discovery = Discovery::new(self.backend.as_ref(), &self.config.discovery);
        let found = match discovery.find_device() {
            Ok(found) => found,
            Err(e) => {
                self.shared.set_state(SessionState::Disconnected);
                match &e {
                    ProtocolError::DeviceNotFound => self.shared.status(e.to_string()),
                    other => self.shared.status(format!("Error: {}", other)),
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let span = info_span!("session", id = %id, port = %found.port.name);
        info!(parent: &span, "device identified, starting session");

        let mut session = ActiveSession {
            id,
            port: found.port,
            transport: found.transport,
            reader: None,
            dispatcher: None,
            keep_alive: None,
            link_lost: Arc::new(AtomicBool::new(false)),
        };
        self.shared.set_settings(None);

        if let Err(e) = self.start_session(&mut session, span) {
            warn!("session setup failed: {}", e);
            session.shutdown();
            self.shared.set_state(SessionState::Disconnected);
            self.shared.status(format!("Error: {}", e));
            return Err(e);
        }

        let port = session.port.clone();
        self.session = Some(session);
        self.shared.set_state(SessionState::Connected);
        self.shared.status(format!("Connected to {}", port.name));
        Ok(port)
    }

    fn start_session(
        &self,
        session: &mut ActiveSession,
        span: tracing::Span,
    ) -> Result<(), ProtocolError> {
        let (tx, rx) = mpsc::channel();

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.shared),
            session.transport.clone(),
            self.config.debug_prefix.clone(),
            Arc::clone(&session.link_lost),
        );
        let dispatch_span = span.clone();
        session.dispatcher = Some(
            std::thread::Builder::new()
                .name("enose-dispatch".into())
                .spawn(move || {
                    let _enter = dispatch_span.enter();
                    dispatcher.run(rx);
                })?,
        );

        session.reader = Some(ReaderLoop::spawn(
            session.transport.clone(),
            tx,
            self.config.discovery.identifier.clone(),
            self.config.reader_poll_interval(),
            span.clone(),
        )?);

        session.transport.send(Command::Connect)?;
        session.keep_alive = Some(KeepAlive::spawn(
            Arc::clone(&self.shared),
            session.transport.clone(),
            self.config.keep_alive_interval(),
            span,
        )?);
        session.transport.send(Command::LoadSettings)?;
        Ok(())
    }

    /// End the session. Does nothing when there is none.
    pub fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let port = session.port.name.clone();
        session.shutdown();
        self.shared.finish_recording(StopReason::Disconnected);
        drop(session);
        debug!(port = %port, "transport closed");

        self.shared.set_state(SessionState::Disconnected);
        self.shared.status(format!("Disconnected from {}", port));
    }

    /// Reap a session whose link died. Returns the state afterwards.
    pub fn poll(&mut self) -> SessionState {
        if self.session.as_ref().is_some_and(|s| !s.is_live()) {
            info!("link lost, cleaning up session");
            self.disconnect();
        }
        self.state()
    }

    fn transport(&mut self) -> Result<Transport, ProtocolError> {
        self.poll();
        self.session
            .as_ref()
            .map(|s| s.transport.clone())
            .ok_or(ProtocolError::NotConnected)
    }

    /// A timed-out write leaves the device in an unknown state, so the session
    /// is torn down. Other errors are only reported.
    fn write_failed(&mut self, e: ProtocolError) -> ProtocolError {
        self.shared.status(format!("Error: {}", e));
        if matches!(e, ProtocolError::Timeout) {
            warn!("write timed out, closing session");
            self.disconnect();
        }
        e
    }

    /// Ask the device to report its settings
    pub fn load_settings(&mut self) -> Result<(), ProtocolError> {
        let transport = self.transport()?;
        transport
            .send(Command::LoadSettings)
            .map_err(|e| self.write_failed(e))
    }

    /// Validate and send new settings in a single write
    pub fn save_settings(&mut self, settings: &DeviceSettings) -> Result<(), ProtocolError> {
        let command = settings.to_save_command()?;
        let transport = self.transport()?;
        transport
            .write_all(&command)
            .map_err(|e| self.write_failed(e))?;
        info!(?settings, "settings sent");
        Ok(())
    }

    /// Clear the buffer, open a new log and start the device cycling.
    ///
    /// `target` of `None` names the log after the current time. A recording
    /// already running is closed and reported stopped first. Returns the
    /// resolved log path.
    pub fn start_recording(&mut self, target: Option<&Path>) -> Result<PathBuf, ProtocolError> {
        let transport = self.transport()?;
        let path = resolve_log_path(&self.config.log_dir, target, Utc::now().timestamp());

        if let Some(previous) = self.shared.store.start_recording(&path)? {
            self.shared.announce_stop(previous, StopReason::User);
        }
        let sent = transport
            .send(Command::StartCycling)
            .and_then(|_| transport.send(Command::ResetSequence));
        if let Err(e) = sent {
            self.shared.store.stop_recording();
            return Err(self.write_failed(e));
        }

        self.shared
            .publish(SessionEvent::RecordingStarted(path.clone()));
        self.shared
            .status(format!("Recording to {}", path.display()));
        Ok(path)
    }

    /// Stop the device cycling and close the log
    pub fn stop_recording(&mut self) -> Result<Option<RecordingSummary>, ProtocolError> {
        let transport = match self.transport() {
            Ok(transport) => transport,
            // No device to tell, but the log still gets closed
            Err(_) => return Ok(self.shared.finish_recording(StopReason::User).flatten()),
        };
        let summary = stop_cycling(&self.shared, &transport, StopReason::User)
            .map_err(|e| self.write_failed(e))?;
        if let Some(summary) = &summary {
            self.shared.status(format!(
                "Recording stopped, {} rows in {}",
                summary.rows,
                summary.path.display()
            ));
        }
        Ok(summary)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
