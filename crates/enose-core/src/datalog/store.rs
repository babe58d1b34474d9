//! Sample store
//!
//! The rolling buffer and the active recorder behind one lock. An append
//! (log row plus buffer update) and a snapshot never interleave, so readers
//! only ever see whole samples.

use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{BufferSnapshot, Recorder, RecordingSummary, RollingBuffer, SensorSample};

#[derive(Debug)]
struct StoreInner {
    buffer: RollingBuffer,
    recorder: Option<Recorder>,
}

/// Thread-safe rolling buffer plus recorder
#[derive(Debug)]
pub struct SampleStore {
    inner: Mutex<StoreInner>,
}

impl SampleStore {
    /// Create a store keeping `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                buffer: RollingBuffer::new(capacity),
                recorder: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a sample to the buffer and, when recording, to the log.
    ///
    /// A failed log write is returned; the sample is still buffered and the
    /// recording stays open until someone stops it.
    pub fn append(&self, sample: SensorSample) -> io::Result<()> {
        let mut inner = self.lock();
        let mut result = Ok(());
        if let Some(recorder) = inner.recorder.as_mut() {
            if let Err(e) = recorder.record(&sample) {
                warn!(path = %recorder.path().display(), "log write failed: {}", e);
                result = Err(e);
            }
        }
        inner.buffer.push(sample);
        result
    }

    /// Consistent copy of every series
    pub fn snapshot(&self) -> BufferSnapshot {
        self.lock().buffer.snapshot()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<SensorSample> {
        self.lock().buffer.latest().copied()
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Check if no samples are buffered
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Clear the buffer
    pub fn reset(&self) {
        self.lock().buffer.reset();
    }

    /// Check if a recording is active
    pub fn is_recording(&self) -> bool {
        self.lock().recorder.is_some()
    }

    /// Clear the buffer and start logging to `path` (truncated).
    ///
    /// A recording already in progress is finished first and its outcome
    /// returned.
    pub fn start_recording(&self, path: &Path) -> io::Result<Option<io::Result<RecordingSummary>>> {
        let recorder = Recorder::create(path)?;
        Ok(self.install(recorder))
    }

    /// Clear the buffer and log into `recorder`, finishing any previous one
    pub fn install(&self, recorder: Recorder) -> Option<io::Result<RecordingSummary>> {
        let mut inner = self.lock();
        let previous = inner.recorder.take().map(|previous| {
            debug!(path = %previous.path().display(), "replacing active recording");
            previous.finish()
        });
        inner.buffer.reset();
        inner.recorder = Some(recorder);
        previous
    }

    /// Stop logging. Returns `None` when no recording was active, otherwise
    /// the outcome of closing the log. Only one caller ever gets `Some` for a
    /// given recording.
    pub fn stop_recording(&self) -> Option<io::Result<RecordingSummary>> {
        let recorder = self.lock().recorder.take()?;
        Some(recorder.finish())
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_BUFFER_CAPACITY)
    }
}
