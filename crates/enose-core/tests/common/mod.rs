//! Shared test doubles for the integration tests
#![allow(dead_code)]

use enose_core::protocol::{CommunicationChannel, PortBackend, PortInfo, ProtocolError};
use enose_core::session::SessionConfig;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const IDENTIFIER: &str = "ESP32_DEVICE_IDENTIFIER";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct DeviceState {
    identify_reply: Option<String>,
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    fail_reads: bool,
    fail_writes: Option<io::ErrorKind>,
}

/// Scripted device: answers `I` with a fixed reply, records every write and
/// lets the test push lines as if the firmware sent them
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// A device that answers with the real identifier
    pub fn answering() -> Self {
        Self::replying(IDENTIFIER)
    }

    /// A device that answers `I` with `reply`
    pub fn replying(reply: &str) -> Self {
        let device = Self::default();
        device.lock().identify_reply = Some(reply.to_string());
        device
    }

    /// A device that never answers
    pub fn silent() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    /// Queue a line (newline added) for the host to read
    pub fn push_line(&self, line: &str) {
        let mut state = self.lock();
        state.inbound.extend(line.as_bytes());
        state.inbound.push_back(b'\n');
    }

    /// Every write, one entry per call
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All written bytes as text, keep-alives removed
    pub fn commands(&self) -> String {
        self.lock()
            .writes
            .iter()
            .flatten()
            .filter(|&&b| b != b'K')
            .map(|&b| b as char)
            .collect()
    }

    /// Number of keep-alives received
    pub fn keep_alives(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.as_slice() == b"K")
            .count()
    }

    /// Make every read fail, as if the cable was pulled
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make every write fail with `kind`
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.lock().fail_writes = kind;
    }
}

struct MockChannel(MockDevice);

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        if let Some(kind) = state.fail_writes {
            return Err(io::Error::new(kind, "write failed"));
        }
        state.writes.push(buf.to_vec());
        if buf == b"I" {
            if let Some(reply) = state.identify_reply.clone() {
                state.inbound.extend(reply.as_bytes());
                state.inbound.extend(b"\r\n");
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MockChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.0.lock().inbound.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.0.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.inbound.len() as u32)
    }
}

/// Backend over a fixed set of ports, recording every open
#[derive(Clone, Default)]
pub struct MockBackend {
    ports: Vec<PortInfo>,
    devices: HashMap<String, MockDevice>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enumerated port with a device behind it
    pub fn with_port(mut self, port: PortInfo, device: MockDevice) -> Self {
        self.devices.insert(port.name.clone(), device);
        self.ports.push(port);
        self
    }

    /// Add a device reachable by name only (not enumerated)
    pub fn with_hidden(mut self, name: &str, device: MockDevice) -> Self {
        self.devices.insert(name.to_string(), device);
        self
    }

    /// Port names in the order they were opened
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl PortBackend for MockBackend {
    fn list_ports(&self) -> Vec<PortInfo> {
        self.ports.clone()
    }

    fn open(&self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        self.opened.lock().unwrap().push(name.to_string());
        match self.devices.get(name) {
            Some(device) => Ok(Box::new(MockChannel(device.clone()))),
            None => Err(ProtocolError::SerialError(format!("{} does not exist", name))),
        }
    }
}

/// Config with short timeouts and no fallback ports
pub fn fast_config(log_dir: &Path) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.keep_alive_interval_ms = 5_000;
    config.reader_poll_interval_ms = 1;
    config.log_dir = log_dir.to_path_buf();
    config.discovery.response_timeout_ms = 100;
    config.discovery.poll_interval_ms = 1;
    config.discovery.fallback_ports = Vec::new();
    config
}

/// A sample line as the firmware prints it
pub fn sample_line(item: u64, status: i64) -> String {
    format!(
        r#"{{"itemNumber":{item},"gasValues":[{a},2,3,4,5,6,7],"temperature":21.5,"humidity":40.25,"operationStatus":{status}}}"#,
        a = item * 10
    )
}

/// Poll `condition` until it holds or two seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
