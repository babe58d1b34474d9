//! Reader loop
//!
//! Drains the transport on a dedicated thread and forwards decoded lines to
//! the dispatcher. Stopping is cooperative: the flag is checked every poll and
//! [`ReaderLoop::stop`] joins the thread, so the transport is never closed
//! under an in-flight read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn, Span};

use crate::protocol::{LineFramer, ProtocolError, Transport};

/// What the reader hands to the dispatcher
#[derive(Debug)]
pub(crate) enum ReaderEvent {
    /// One decoded line, trailing whitespace removed
    Line(String),
    /// The transport failed; the reader has exited
    Failed(ProtocolError),
}

pub(crate) struct ReaderLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderLoop {
    /// Start reading `transport` on a new thread
    pub(crate) fn spawn(
        transport: Transport,
        lines: Sender<ReaderEvent>,
        identifier: String,
        poll_interval: Duration,
        span: Span,
    ) -> Result<Self, ProtocolError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("enose-reader".into())
            .spawn(move || {
                let _enter = span.enter();
                run(&transport, &lines, &identifier, poll_interval, &flag);
                debug!("reader loop exited");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit and wait until it has
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    transport: &Transport,
    lines: &Sender<ReaderEvent>,
    identifier: &str,
    poll_interval: Duration,
    stop: &AtomicBool,
) {
    let mut framer = LineFramer::default();
    let mut buf = [0u8; 512];

    while !stop.load(Ordering::Acquire) {
        let n = match transport.read_available(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("read failed, stopping reader: {}", e);
                let _ = lines.send(ReaderEvent::Failed(e));
                return;
            }
        };
        if n == 0 {
            std::thread::sleep(poll_interval);
            continue;
        }

        for line in framer.push(&buf[..n]) {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(identifier) {
                // Late reply to an identification request
                trace!("dropping identifier line");
                continue;
            }
            if lines.send(ReaderEvent::Line(line)).is_err() {
                debug!("dispatcher gone, stopping reader");
                return;
            }
        }
    }
}
