//! Demo Mode - Simulated E-Nose for testing
//!
//! Speaks the device side of the serial protocol so the whole session stack
//! can run without hardware. Readings sit on a per-channel baseline, rise
//! while solenoid 1 is open (sample exposure) and decay while solenoid 2 is
//! open (purge), with a little random noise on top.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::datalog::{SensorSample, GAS_CHANNELS};
use crate::protocol::{
    Command, CommunicationChannel, DeviceSettings, PortBackend, PortInfo, ProtocolError,
    DEVICE_IDENTIFIER,
};

/// Port name the demo backend answers on
pub const DEMO_PORT: &str = "demo";

/// Resting value of each gas channel
const BASELINE: [f64; GAS_CHANNELS] = [120.0, 340.0, 85.0, 510.0, 260.0, 190.0, 430.0];

/// Peak response as a multiple of the baseline
const RESPONSE_GAIN: [f64; GAS_CHANNELS] = [1.9, 1.4, 2.6, 1.2, 1.7, 2.1, 1.3];

/// Tuning knobs for the simulated device
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Token returned for `I`
    pub identifier: String,
    /// Time between samples
    pub sample_interval: Duration,
    /// Simulated device seconds per real second
    pub time_scale: f64,
    /// Fixed RNG seed, for repeatable readings
    pub seed: Option<u64>,
    /// Settings the device boots with
    pub settings: DeviceSettings,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            identifier: DEVICE_IDENTIFIER.to_string(),
            sample_interval: Duration::from_secs(1),
            time_scale: 1.0,
            seed: None,
            settings: DeviceSettings::new(30, 60, 5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CycleState {
    /// Solenoids closed
    Idle,
    /// Cycling since `started`
    Running { started: Instant },
    /// All cycles done, waiting for `B`
    Completed,
}

/// Simulated device behind a [`CommunicationChannel`]
pub struct DemoDevice {
    options: DemoOptions,
    settings: DeviceSettings,
    rng: StdRng,
    /// Bytes waiting for the host
    outbound: VecDeque<u8>,
    /// Partial `S` payload, with current brace depth
    pending_settings: Option<(Vec<u8>, usize)>,
    connected: bool,
    cycle: CycleState,
    item_number: u64,
    last_sample: Instant,
    level: [f64; GAS_CHANNELS],
}

impl Default for DemoDevice {
    fn default() -> Self {
        Self::new(DemoOptions::default())
    }
}

impl DemoDevice {
    /// Create a demo device
    pub fn new(options: DemoOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings: options.settings,
            options,
            rng,
            outbound: VecDeque::new(),
            pending_settings: None,
            connected: false,
            cycle: CycleState::Idle,
            item_number: 0,
            last_sample: Instant::now(),
            level: BASELINE,
        }
    }

    /// Settings currently held by the device
    pub fn settings(&self) -> DeviceSettings {
        self.settings
    }

    /// Check if the host has sent `C`
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Check if a cycling run is in progress
    pub fn is_cycling(&self) -> bool {
        matches!(self.cycle, CycleState::Running { .. })
    }

    fn emit_line(&mut self, line: &str) {
        trace!("demo device -> {}", line);
        self.outbound.extend(line.as_bytes());
        self.outbound.push_back(b'\n');
    }

    fn emit_json<T: serde::Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => self.emit_line(&line),
            Err(e) => self.emit_line(&format!("DEBUG: serialize failed: {}", e)),
        }
    }

    fn handle_byte(&mut self, byte: u8) {
        if let Some((mut payload, mut depth)) = self.pending_settings.take() {
            payload.push(byte);
            match byte {
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth == 0 && payload.contains(&b'{') {
                self.apply_settings(&payload);
            } else {
                self.pending_settings = Some((payload, depth));
            }
            return;
        }

        match Command::from_byte(byte) {
            Some(Command::Identify) => {
                let identifier = self.options.identifier.clone();
                self.emit_line(&identifier);
            }
            Some(Command::Connect) => {
                self.connected = true;
                self.last_sample = Instant::now();
                self.emit_line("DEBUG: host connected");
            }
            Some(Command::KeepAlive) => {}
            Some(Command::StartCycling) => {
                self.cycle = CycleState::Running {
                    started: Instant::now(),
                };
                self.emit_line("DEBUG: cycling started");
            }
            Some(Command::StopCycling) => {
                self.cycle = CycleState::Idle;
                self.emit_line("DEBUG: cycling stopped");
            }
            Some(Command::ResetSequence) => self.item_number = 0,
            Some(Command::SaveSettings) => self.pending_settings = Some((Vec::new(), 0)),
            Some(Command::LoadSettings) => {
                let settings = self.settings;
                self.emit_json(&settings);
            }
            // Line endings and stray bytes are ignored by the firmware
            None => {}
        }
    }

    fn apply_settings(&mut self, payload: &[u8]) {
        match serde_json::from_slice::<DeviceSettings>(payload) {
            Ok(settings) => {
                debug!(?settings, "demo device stored settings");
                self.settings = settings;
                self.emit_json(&settings);
            }
            Err(e) => self.emit_line(&format!("DEBUG: invalid settings: {}", e)),
        }
    }

    /// Emit every sample that has come due
    fn tick(&mut self) {
        if !self.connected {
            return;
        }
        let interval = self.options.sample_interval.max(Duration::from_millis(1));
        while self.last_sample.elapsed() >= interval {
            self.last_sample += interval;
            let sample = self.next_sample();
            self.emit_json(&sample);
        }
    }

    /// Position in the current cycle, as (solenoid 1 open, operation status)
    fn phase(&mut self) -> (bool, i64) {
        let CycleState::Running { started } = self.cycle else {
            let status = if self.cycle == CycleState::Completed { 2 } else { 0 };
            return (false, status);
        };
        let exposure = f64::from(self.settings.relay_solenoid1.duration);
        let purge = f64::from(self.settings.relay_solenoid2.duration);
        let period = (exposure + purge).max(1.0);
        let elapsed = started.elapsed().as_secs_f64() * self.options.time_scale;

        if elapsed >= period * f64::from(self.settings.cycle) {
            self.cycle = CycleState::Completed;
            return (false, 2);
        }
        (elapsed % period < exposure, 1)
    }

    fn next_sample(&mut self) -> SensorSample {
        let (exposed, status) = self.phase();
        let mut gas = [0.0; GAS_CHANNELS];
        for (i, value) in gas.iter_mut().enumerate() {
            let target = if exposed {
                BASELINE[i] * RESPONSE_GAIN[i]
            } else {
                BASELINE[i]
            };
            self.level[i] += (target - self.level[i]) * 0.25;
            let noise = self.rng.gen_range(-1.5..1.5);
            *value = (self.level[i] + noise).round();
        }
        let temperature = 24.0 + self.rng.gen_range(-0.3..0.3);
        let humidity = 45.0 + self.rng.gen_range(-1.0..1.0);

        self.item_number += 1;
        SensorSample::new(self.item_number, gas, temperature, humidity, status)
    }
}

impl Read for DemoDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.tick();
        if self.outbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for DemoDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.handle_byte(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for DemoDevice {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.tick();
        Ok(u32::try_from(self.outbound.len()).unwrap_or(u32::MAX))
    }
}

/// Port backend exposing a single [`DemoDevice`] on [`DEMO_PORT`]
#[derive(Debug, Clone, Default)]
pub struct DemoBackend {
    options: DemoOptions,
}

impl DemoBackend {
    /// Create a backend whose devices use `options`
    pub fn new(options: DemoOptions) -> Self {
        Self { options }
    }
}

impl PortBackend for DemoBackend {
    fn list_ports(&self) -> Vec<PortInfo> {
        let mut port = PortInfo::usb(DEMO_PORT, 0x303a, 0x1001);
        port.product = Some("E-Nose (demo)".to_string());
        vec![port]
    }

    fn open(&self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        if name != DEMO_PORT {
            return Err(ProtocolError::SerialError(format!(
                "demo backend has no port {}",
                name
            )));
        }
        Ok(Box::new(DemoDevice::new(self.options.clone())))
    }
}
