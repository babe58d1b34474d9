//! Shared transport handle
//!
//! One channel per session. Reads from the reader loop and writes from the
//! control context, keep-alive and dispatcher are all serialized through the
//! same lock. Readers only hold it for a non-blocking "bytes available, read
//! them" step, so a command write never waits behind a blocking read.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::framing::{decode_latin1, MAX_LINE_LEN};
use super::stream::CommunicationChannel;
use super::{Command, ProtocolError};

type SharedChannel = Arc<Mutex<Box<dyn CommunicationChannel>>>;

/// Cloneable handle to the open device channel
#[derive(Clone)]
pub struct Transport {
    port_name: Arc<str>,
    channel: SharedChannel,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port_name", &self.port_name)
            .field("handles", &Arc::strong_count(&self.channel))
            .finish()
    }
}

fn map_io(e: io::Error) -> ProtocolError {
    if e.kind() == io::ErrorKind::TimedOut {
        ProtocolError::Timeout
    } else {
        ProtocolError::SerialError(e.to_string())
    }
}

impl Transport {
    /// Take ownership of an opened channel
    pub fn new(port_name: impl Into<String>, channel: Box<dyn CommunicationChannel>) -> Self {
        Self {
            port_name: Arc::from(port_name.into()),
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    /// Name of the port this transport talks to
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn CommunicationChannel>> {
        // A panic while holding the lock leaves the byte stream itself intact
        self.channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a single-byte command
    pub fn send(&self, command: Command) -> Result<(), ProtocolError> {
        debug!(port = %self.port_name, "sending command {:?}", command);
        self.write_all(&[command.byte()])
    }

    /// Write raw bytes as one unit
    pub fn write_all(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut channel = self.lock();
        channel.write_all(bytes).map_err(map_io)?;
        channel.flush().map_err(map_io)?;
        trace!("wrote {} bytes: {:02x?}", bytes.len(), bytes);
        Ok(())
    }

    /// Read whatever is already buffered, up to `buf.len()` bytes. Returns 0
    /// when nothing is waiting; never blocks for new data.
    pub fn read_available(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut channel = self.lock();
        let available = channel.bytes_to_read().map_err(map_io)? as usize;
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }
        let to_read = available.min(buf.len());
        match channel.read(&mut buf[..to_read]) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(ProtocolError::SerialError(e.to_string())),
        }
    }

    /// Read one newline-terminated line, waiting at most `timeout`.
    ///
    /// Reads byte by byte so nothing after the terminator is consumed. The line
    /// is decoded as Latin-1 and trimmed. A peer that streams bytes without a
    /// newline still hits the deadline, and a record longer than
    /// [`MAX_LINE_LEN`] is rejected.
    pub fn read_line(&self, timeout: Duration, poll: Duration) -> Result<String, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if Instant::now() >= deadline {
                debug!(
                    port = %self.port_name,
                    "read_line timed out with {} bytes: {:?}",
                    line.len(),
                    decode_latin1(&line[..line.len().min(64)])
                );
                return Err(ProtocolError::Timeout);
            }
            match self.read_available(&mut byte)? {
                0 => std::thread::sleep(poll),
                _ if byte[0] == b'\n' => {
                    return Ok(decode_latin1(&line).trim().to_string());
                }
                _ => {
                    line.push(byte[0]);
                    if line.len() > MAX_LINE_LEN {
                        return Err(ProtocolError::ParseError(format!(
                            "no line terminator within {} bytes",
                            MAX_LINE_LEN
                        )));
                    }
                }
            }
        }
    }

    /// Drop stale input (e.g. boot messages) before an exchange
    pub fn clear_input(&self) -> Result<(), ProtocolError> {
        self.lock().clear_input_buffer().map_err(map_io)
    }

    /// Number of live handles sharing the channel
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Loopback {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for Loopback {
        fn clear_input_buffer(&mut self) -> io::Result<()> {
            self.inbound.clear();
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(self.inbound.len() as u32)
        }
    }

    #[test]
    fn test_read_line_stops_at_terminator() {
        let channel = Loopback {
            inbound: b"ESP32_DEVICE_IDENTIFIER\r\n{\"x\":1}\n".iter().copied().collect(),
            ..Default::default()
        };
        let transport = Transport::new("loop", Box::new(channel));
        let line = transport
            .read_line(Duration::from_millis(50), Duration::from_millis(1))
            .unwrap();
        assert_eq!(line, "ESP32_DEVICE_IDENTIFIER");

        let mut buf = [0u8; 64];
        let n = transport.read_available(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"{\"x\":1}\n");
    }

    #[test]
    fn test_read_line_timeout() {
        let transport = Transport::new("loop", Box::new(Loopback::default()));
        let result = transport.read_line(Duration::from_millis(10), Duration::from_millis(1));
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    /// Streams `x` forever, never a newline
    struct Chatter;

    impl Read for Chatter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(b'x');
            Ok(buf.len())
        }
    }

    impl Write for Chatter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for Chatter {
        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(64)
        }
    }

    #[test]
    fn test_read_line_gives_up_on_endless_stream() {
        let transport = Transport::new("chatter", Box::new(Chatter));
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = transport.read_line(Duration::from_millis(50), Duration::from_millis(1));
            let _ = tx.send(result);
        });
        let result = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("read_line returned");
        assert!(matches!(
            result,
            Err(ProtocolError::Timeout) | Err(ProtocolError::ParseError(_))
        ));
    }

    #[test]
    fn test_read_line_rejects_oversized_record() {
        let channel = Loopback {
            inbound: std::iter::repeat(b'x').take(MAX_LINE_LEN + 10).collect(),
            ..Default::default()
        };
        let transport = Transport::new("loop", Box::new(channel));
        let result = transport.read_line(Duration::from_secs(5), Duration::from_millis(1));
        assert!(matches!(result, Err(ProtocolError::ParseError(_))));
    }

    #[test]
    fn test_clones_share_channel() {
        let transport = Transport::new("loop", Box::new(Loopback::default()));
        let other = transport.clone();
        assert_eq!(transport.handle_count(), 2);
        other.send(Command::KeepAlive).unwrap();
        drop(other);
        assert_eq!(transport.handle_count(), 1);
    }
}
