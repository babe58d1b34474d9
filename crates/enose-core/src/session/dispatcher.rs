//! Message dispatcher
//!
//! Consumes lines from the reader in arrival order and routes each one:
//! diagnostics to the log, samples to the store, settings to the session.
//! Malformed lines are dropped without touching any state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, warn};

use super::reader::ReaderEvent;
use super::{stop_cycling, SessionEvent, SessionState, Shared, StopReason};
use crate::protocol::{parse_line, DeviceMessage, ProtocolError, Transport};

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    transport: Transport,
    debug_prefix: String,
    link_lost: Arc<AtomicBool>,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        transport: Transport,
        debug_prefix: String,
        link_lost: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            transport,
            debug_prefix,
            link_lost,
        }
    }

    /// Process events until the reader hangs up or reports a failure
    pub(crate) fn run(self, events: Receiver<ReaderEvent>) {
        for event in events {
            match event {
                ReaderEvent::Line(line) => self.dispatch(&line),
                ReaderEvent::Failed(e) => {
                    self.link_lost.store(true, Ordering::Release);
                    self.shared.finish_recording(StopReason::Disconnected);
                    self.shared.set_state(SessionState::Disconnected);
                    self.shared.status(format!("Error: {}", e));
                    break;
                }
            }
        }
        debug!("dispatcher exited");
    }

    /// Route one line
    pub(crate) fn dispatch(&self, line: &str) {
        match parse_line(line, &self.debug_prefix) {
            Ok(DeviceMessage::Diagnostic(text)) => {
                debug!(target: "enose::device", "{}", text);
                self.shared.publish(SessionEvent::Diagnostic(text));
            }
            Ok(DeviceMessage::Sample(sample)) => {
                if let Err(e) = self.shared.store.append(sample) {
                    self.shared.status(format!("Error writing log: {}", e));
                    if let Err(e) = stop_cycling(&self.shared, &self.transport, StopReason::LogError) {
                        self.shared.status(format!("Error: {}", e));
                    }
                }
                self.shared.publish(SessionEvent::Sample(sample));

                if sample.is_completed() && self.shared.store.is_recording() {
                    debug!(item = sample.item_number, "device reports cycles completed");
                    match stop_cycling(&self.shared, &self.transport, StopReason::Completed) {
                        Ok(_) => self.shared.status("Recording completed"),
                        Err(e) => self.shared.status(format!("Error: {}", e)),
                    }
                }
            }
            Ok(DeviceMessage::Settings(settings)) => {
                debug!(?settings, "settings received");
                self.shared.set_settings(Some(settings));
                self.shared.publish(SessionEvent::Settings(settings));
            }
            Err(ProtocolError::ParseError(detail)) => {
                warn!("dropping malformed line: {}", detail);
            }
            Err(e) => {
                warn!("dropping line: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalog::Recorder;
    use crate::protocol::{CommunicationChannel, DeviceSettings};
    use pretty_assertions::assert_eq;
    use std::io::{self, Read, Write};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Sink {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Sink {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for Sink {
        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(0)
        }
    }

    /// Log sink that starts refusing writes once `full` is set
    struct Flaky {
        full: Arc<AtomicBool>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.full.load(Ordering::Acquire) {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Shared>, Sink) {
        let sink = Sink::default();
        let shared = Arc::new(Shared::new(100, 64));
        let transport = Transport::new("sink", Box::new(sink.clone()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&shared),
            transport,
            "DEBUG:".to_string(),
            Arc::new(AtomicBool::new(false)),
        );
        (dispatcher, shared, sink)
    }

    fn sample_line(n: u64, status: i64) -> String {
        format!(
            r#"{{"itemNumber":{n},"gasValues":[1,2,3,4,5,6,7],"temperature":21.5,"humidity":40,"operationStatus":{status}}}"#
        )
    }

    #[test]
    fn test_sample_reaches_buffer() {
        let (dispatcher, shared, _) = dispatcher();
        dispatcher.dispatch(&sample_line(5, 1));
        let snap = shared.store.snapshot();
        assert_eq!(snap.item_numbers, vec![5]);
        assert_eq!(snap.gas[6], vec![7.0]);
        assert_eq!(snap.temperature, vec![21.5]);
    }

    #[test]
    fn test_debug_and_garbage_never_buffered() {
        let (dispatcher, shared, _) = dispatcher();
        let mut events = shared.subscribe();
        dispatcher.dispatch(r#"DEBUG: {"itemNumber":1}"#);
        dispatcher.dispatch("not json at all");
        dispatcher.dispatch(r#"{"itemNumber":"x"}"#);
        dispatcher.dispatch(r#"{"unexpected":true}"#);
        dispatcher.dispatch("[1,2,3]");
        assert!(shared.store.is_empty());

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Diagnostic(r#"DEBUG: {"itemNumber":1}"#.to_string())
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_settings_stored() {
        let (dispatcher, shared, _) = dispatcher();
        dispatcher.dispatch(
            r#"{"relaySolenoid1":{"duration":10},"relaySolenoid2":{"duration":20},"cycle":3}"#,
        );
        assert_eq!(shared.settings(), Some(DeviceSettings::new(10, 20, 3)));
    }

    #[test]
    fn test_completion_stops_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, shared, sink) = dispatcher();
        shared
            .store
            .start_recording(&dir.path().join("run.csv"))
            .unwrap();

        dispatcher.dispatch(&sample_line(1, 1));
        dispatcher.dispatch(&sample_line(2, 2));

        assert!(!shared.store.is_recording());
        assert_eq!(sink.written.lock().unwrap().as_slice(), b"B");
        let text = std::fs::read_to_string(dir.path().join("run.csv")).unwrap();
        assert_eq!(text.lines().count(), 3);

        // Completion while idle sends nothing
        dispatcher.dispatch(&sample_line(3, 2));
        assert_eq!(sink.written.lock().unwrap().as_slice(), b"B");
    }

    #[test]
    fn test_log_failure_stops_cycling() {
        let (dispatcher, shared, sink) = dispatcher();
        let full = Arc::new(AtomicBool::new(false));
        let recorder = Recorder::from_writer(
            PathBuf::from("full.csv"),
            Box::new(Flaky {
                full: Arc::clone(&full),
            }),
        )
        .unwrap();
        assert!(shared.store.install(recorder).is_none());
        let mut events = shared.subscribe();

        dispatcher.dispatch(&sample_line(1, 1));
        full.store(true, Ordering::Release);
        dispatcher.dispatch(&sample_line(2, 1));

        assert!(!shared.store.is_recording());
        assert_eq!(shared.store.len(), 2);
        assert_eq!(sink.written.lock().unwrap().as_slice(), b"B");

        let stopped: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, SessionEvent::RecordingStopped { .. }))
            .collect();
        assert_eq!(
            stopped,
            vec![SessionEvent::RecordingStopped {
                summary: None,
                reason: StopReason::LogError,
            }]
        );
    }

    #[test]
    fn test_failure_marks_link_lost() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, shared, sink) = dispatcher();
        let link_lost = Arc::clone(&dispatcher.link_lost);
        shared.set_state(SessionState::Connected);
        shared
            .store
            .start_recording(&dir.path().join("lost.csv"))
            .unwrap();
        let mut events = shared.subscribe();

        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(ReaderEvent::Line(sample_line(1, 0))).unwrap();
        tx.send(ReaderEvent::Failed(ProtocolError::SerialError(
            "unplugged".into(),
        )))
        .unwrap();
        dispatcher.run(rx);

        assert!(link_lost.load(Ordering::Acquire));
        assert_eq!(shared.state(), SessionState::Disconnected);
        assert_eq!(shared.store.len(), 1);
        assert!(!shared.store.is_recording());
        // No 'B' to a dead link
        assert!(sink.written.lock().unwrap().is_empty());

        let stopped = std::iter::from_fn(|| events.try_recv().ok())
            .find(|e| matches!(e, SessionEvent::RecordingStopped { .. }));
        match stopped {
            Some(SessionEvent::RecordingStopped { summary, reason }) => {
                assert_eq!(reason, StopReason::Disconnected);
                assert_eq!(summary.unwrap().rows, 1);
            }
            other => panic!("expected a stopped recording, got {:?}", other),
        }
    }
}
