//! Line framing
//!
//! The device speaks newline-terminated text. Bytes are decoded as Latin-1 so
//! that boot noise and line glitches (any byte 0-255) never fail decoding.

use tracing::warn;

/// Longest record kept while waiting for a newline
pub const MAX_LINE_LEN: usize = 4096;

/// Decode bytes as ISO-8859-1: every byte maps to the code point of the same value
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Splits an incoming byte stream into text lines
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_len: usize,
    /// Dropping bytes of an oversized record until its newline shows up
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}

impl LineFramer {
    /// Create a framer that drops records longer than `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
            discarding: false,
        }
    }

    /// Feed bytes, returning every line completed by them.
    /// Lines come back decoded with trailing whitespace (including '\r') removed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(decode_latin1(&self.pending).trim_end().to_string());
                }
                self.pending.clear();
                continue;
            }
            if self.discarding {
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() > self.max_len {
                warn!(
                    "discarding {} byte record with no line terminator",
                    self.pending.len()
                );
                self.pending.clear();
                self.discarding = true;
            }
        }
        lines
    }

    /// Bytes buffered toward the next line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
