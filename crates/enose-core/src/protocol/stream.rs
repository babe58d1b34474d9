use serialport::SerialPort;
use std::io::{self, Read, Write};

use super::{PortInfo, ProtocolError};

/// Byte stream to the device (a serial port, the demo device, or a test double)
pub trait CommunicationChannel: Read + Write + Send {
    /// Discard anything received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Get number of bytes available to read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// Source of candidate ports and opened channels
pub trait PortBackend: Send + Sync {
    /// Enumerate candidate ports on this host
    fn list_ports(&self) -> Vec<PortInfo>;

    /// Open and configure a port by name
    fn open(&self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}
