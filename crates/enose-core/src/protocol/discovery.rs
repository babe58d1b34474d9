//! Device discovery
//!
//! Finds the E-Nose among the host's serial ports. Candidates are tried in
//! three passes (USB id matches, every enumerated port, a static fallback
//! list) and the first port that answers the identification request with the
//! expected token wins. Probe failures only mean "try the next port".
//!
//! The identification exchange done here is the only handshake of a session:
//! the matched port stays open and is handed over as a [`Transport`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::stream::PortBackend;
use super::transport::Transport;
use super::{Command, PortInfo, ProtocolError, DEVICE_IDENTIFIER};

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    /// Vendor ID
    pub vid: u16,
    /// Product ID
    pub pid: u16,
}

impl UsbId {
    /// Create a vendor/product pair
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Check a port's reported IDs against this pair
    pub fn matches(&self, port: &PortInfo) -> bool {
        port.vid == Some(self.vid) && port.pid == Some(self.pid)
    }
}

/// USB-UART bridges found on the ESP32 boards the device is built on
pub const DEFAULT_DEVICE_IDS: [UsbId; 5] = [
    UsbId::new(0x10c4, 0xea60), // Silicon Labs CP210x
    UsbId::new(0x1a86, 0x7523), // WCH CH340
    UsbId::new(0x1a86, 0x55d4), // WCH CH9102
    UsbId::new(0x303a, 0x1001), // Espressif USB-Serial/JTAG
    UsbId::new(0x0403, 0x6001), // FTDI FT232R
];

/// Well-known device paths tried when enumeration finds nothing
pub fn default_fallback_ports() -> Vec<String> {
    #[cfg(target_os = "linux")]
    let ports: &[&str] = &["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2", "/dev/ttyACM0"];
    #[cfg(target_os = "macos")]
    let ports: &[&str] = &["/dev/cu.SLAB_USBtoUART", "/dev/cu.usbserial-0001"];
    #[cfg(target_os = "windows")]
    let ports: &[&str] = &["COM3", "COM4"];
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let ports: &[&str] = &[];

    ports.iter().map(|p| p.to_string()).collect()
}

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Probe only this port and report its failure instead of searching
    pub port: Option<String>,
    /// Token the device sends back for 'I'
    pub identifier: String,
    /// How long to wait for the identification reply, in milliseconds
    pub response_timeout_ms: u64,
    /// Pause between opening a port and sending 'I', in milliseconds
    pub settle_delay_ms: u64,
    /// Interval between checks for incoming bytes, in milliseconds
    pub poll_interval_ms: u64,
    /// USB IDs probed first
    pub device_ids: Vec<UsbId>,
    /// Paths probed last
    pub fallback_ports: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: None,
            identifier: DEVICE_IDENTIFIER.to_string(),
            response_timeout_ms: super::DEFAULT_TIMEOUT_MS,
            settle_delay_ms: 0,
            poll_interval_ms: 2,
            device_ids: DEFAULT_DEVICE_IDS.to_vec(),
            fallback_ports: default_fallback_ports(),
        }
    }
}

/// A port that answered the identification request, still open
#[derive(Debug)]
pub struct DiscoveredDevice {
    /// Port the device was found on
    pub port: PortInfo,
    /// Open handle, handshake already done
    pub transport: Transport,
}

/// Perform the identification exchange on an open transport
pub fn identify(transport: &Transport, config: &DiscoveryConfig) -> Result<(), ProtocolError> {
    transport.clear_input()?;
    if config.settle_delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(config.settle_delay_ms));
        transport.clear_input()?;
    }
    transport.send(Command::Identify)?;
    let line = transport.read_line(
        Duration::from_millis(config.response_timeout_ms),
        Duration::from_millis(config.poll_interval_ms.max(1)),
    )?;
    if line == config.identifier {
        Ok(())
    } else {
        Err(ProtocolError::HandshakeMismatch {
            expected: config.identifier.clone(),
            actual: line,
        })
    }
}

/// Searches a [`PortBackend`] for the device
pub struct Discovery<'a> {
    backend: &'a dyn PortBackend,
    config: &'a DiscoveryConfig,
}

impl<'a> Discovery<'a> {
    /// Create a discovery run over `backend`
    pub fn new(backend: &'a dyn PortBackend, config: &'a DiscoveryConfig) -> Self {
        Self { backend, config }
    }

    /// Find the device, honouring a configured port override
    pub fn find_device(&self) -> Result<DiscoveredDevice, ProtocolError> {
        let ports = self.backend.list_ports();
        if let Some(name) = &self.config.port {
            let port = ports
                .into_iter()
                .find(|p| &p.name == name)
                .unwrap_or_else(|| PortInfo::named(name.clone()));
            info!(port = %port.name, "probing configured port");
            let transport = self.probe(&port)?;
            return Ok(DiscoveredDevice { port, transport });
        }
        self.find_among(&ports)
    }

    /// Run the three discovery passes over an already enumerated port list
    pub fn find_among(&self, ports: &[PortInfo]) -> Result<DiscoveredDevice, ProtocolError> {
        let mut probed: HashSet<String> = HashSet::new();

        let by_id = ports
            .iter()
            .filter(|p| self.config.device_ids.iter().any(|id| id.matches(p)));
        if let Some(found) = self.first_match(by_id.cloned(), &mut probed, "usb id") {
            return Ok(found);
        }

        if let Some(found) = self.first_match(ports.iter().cloned(), &mut probed, "enumerated") {
            return Ok(found);
        }

        let fallback = self.config.fallback_ports.iter().map(PortInfo::named);
        if let Some(found) = self.first_match(fallback, &mut probed, "fallback") {
            return Ok(found);
        }

        info!("device not found after probing {} ports", probed.len());
        Err(ProtocolError::DeviceNotFound)
    }

    fn first_match(
        &self,
        candidates: impl Iterator<Item = PortInfo>,
        probed: &mut HashSet<String>,
        pass: &str,
    ) -> Option<DiscoveredDevice> {
        for port in candidates {
            if !probed.insert(port.name.clone()) {
                continue;
            }
            match self.probe(&port) {
                Ok(transport) => {
                    info!(port = %port.name, pass, "device identified");
                    return Some(DiscoveredDevice { port, transport });
                }
                Err(e) => debug!(port = %port.name, pass, "probe failed: {}", e),
            }
        }
        None
    }

    /// Open one port and run the identification exchange. The port is closed
    /// again unless it answers correctly.
    pub fn probe(&self, port: &PortInfo) -> Result<Transport, ProtocolError> {
        let channel = self.backend.open(&port.name)?;
        let transport = Transport::new(port.name.clone(), channel);
        identify(&transport, self.config)?;
        Ok(transport)
    }
}
