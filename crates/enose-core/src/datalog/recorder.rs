//! Data recorder
//!
//! Writes samples to a CSV log while a recording is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::format::{write_header, write_row};
use super::SensorSample;

/// Outcome of a finished recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSummary {
    /// Log file written
    pub path: PathBuf,
    /// Data rows written (header excluded)
    pub rows: usize,
    /// When the recording started
    pub started_at: DateTime<Utc>,
}

/// An open log file
pub struct Recorder {
    path: PathBuf,
    writer: BufWriter<Box<dyn Write + Send>>,
    rows: usize,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish()
    }
}

impl Recorder {
    /// Create (or truncate) the log file and write its header
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Self::from_writer(path, Box::new(file))
    }

    /// Log into an already opened sink; `path` is only reported back
    pub fn from_writer(path: PathBuf, sink: Box<dyn Write + Send>) -> io::Result<Self> {
        let mut writer = BufWriter::new(sink);
        write_header(&mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), "recording started");
        Ok(Self {
            path,
            writer,
            rows: 0,
            started_at: Utc::now(),
        })
    }

    /// Append one sample. Each row is flushed so a crash loses nothing
    /// already acknowledged.
    pub fn record(&mut self, sample: &SensorSample) -> io::Result<()> {
        write_row(&mut self.writer, sample)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and close the log
    pub fn finish(mut self) -> io::Result<RecordingSummary> {
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "recording finished");
        Ok(self.summary())
    }

    fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            path: self.path.clone(),
            rows: self.rows,
            started_at: self.started_at,
        }
    }
}
