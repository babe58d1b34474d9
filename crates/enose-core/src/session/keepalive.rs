//! Keep-alive timer
//!
//! Sends `K` on a fixed period while the session is connected. A failed send
//! is reported but does not end the session; link loss is the reader's call.

use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn, Span};

use super::{SessionState, Shared};
use crate::protocol::{Command, ProtocolError, Transport};

pub(crate) struct KeepAlive {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    last_sent: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl KeepAlive {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        transport: Transport,
        interval: Duration,
        span: Span,
    ) -> Result<Self, ProtocolError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let last_sent = Arc::new(Mutex::new(None));
        let stamp = Arc::clone(&last_sent);

        let handle = std::thread::Builder::new()
            .name("enose-keepalive".into())
            .spawn(move || {
                let _enter = span.enter();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Stop requested or owner dropped
                        _ => break,
                    }
                    if shared.state() != SessionState::Connected {
                        continue;
                    }
                    match transport.send(Command::KeepAlive) {
                        Ok(()) => {
                            trace!("keep-alive sent");
                            *stamp.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
                        }
                        Err(e) => {
                            warn!("keep-alive failed: {}", e);
                            shared.status(format!("Error: {}", e));
                        }
                    }
                }
                debug!("keep-alive stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            last_sent,
        })
    }

    /// When the last `K` went out
    pub(crate) fn last_sent(&self) -> Option<DateTime<Utc>> {
        *self.last_sent.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cancel the timer and wait for it. No `K` is sent after this returns.
    pub(crate) fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}
