//! Rolling sample buffer
//!
//! Fixed-capacity FIFO of recent samples. Samples are stored whole, so the
//! per-channel series handed out in a [`BufferSnapshot`] are index-aligned by
//! construction: entry `i` of every series comes from the same sample.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{SensorSample, GAS_CHANNELS};

/// Number of samples kept for live display
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Most recent samples, oldest first
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: VecDeque<SensorSample>,
    capacity: usize,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl RollingBuffer {
    /// Create an empty buffer holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest ones beyond capacity
    pub fn push(&mut self, sample: SensorSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Remove every sample
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Number of samples held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest sample
    pub fn latest(&self) -> Option<&SensorSample> {
        self.samples.back()
    }

    /// Samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SensorSample> {
        self.samples.iter()
    }

    /// Copy the buffer out as parallel series
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            item_numbers: self.samples.iter().map(|s| s.item_number).collect(),
            gas: std::array::from_fn(|ch| self.samples.iter().map(|s| s.gas_values[ch]).collect()),
            temperature: self.samples.iter().map(|s| s.temperature).collect(),
            humidity: self.samples.iter().map(|s| s.humidity).collect(),
        }
    }
}

/// Read-only copy of the buffer as index-aligned series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSnapshot {
    /// Sequence numbers
    pub item_numbers: Vec<u64>,
    /// One series per gas channel
    pub gas: [Vec<f64>; GAS_CHANNELS],
    /// Temperature series
    pub temperature: Vec<f64>,
    /// Humidity series
    pub humidity: Vec<f64>,
}

impl BufferSnapshot {
    /// Number of samples in the snapshot
    pub fn len(&self) -> usize {
        self.item_numbers.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.item_numbers.is_empty()
    }

    /// Check that every series has the same length
    pub fn is_aligned(&self) -> bool {
        let n = self.item_numbers.len();
        self.gas.iter().all(|series| series.len() == n)
            && self.temperature.len() == n
            && self.humidity.len() == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u64) -> SensorSample {
        let v = n as f64;
        SensorSample::new(n, [v, v + 1.0, v + 2.0, v + 3.0, v + 4.0, v + 5.0, v + 6.0], v / 2.0, v / 4.0, 1)
    }

    #[test]
    fn test_keeps_last_capacity_samples() {
        let mut buffer = RollingBuffer::default();
        for n in 0..250 {
            buffer.push(sample(n));
            assert!(buffer.len() <= DEFAULT_BUFFER_CAPACITY);
        }
        assert_eq!(buffer.len(), 100);
        let kept: Vec<u64> = buffer.iter().map(|s| s.item_number).collect();
        assert_eq!(kept, (150..250).collect::<Vec<_>>());
        assert_eq!(buffer.latest().map(|s| s.item_number), Some(249));
    }

    #[test]
    fn test_snapshot_series_aligned() {
        let mut buffer = RollingBuffer::new(3);
        for n in 1..=5 {
            buffer.push(sample(n));
        }
        let snap = buffer.snapshot();
        assert!(snap.is_aligned());
        assert_eq!(snap.item_numbers, vec![3, 4, 5]);
        assert_eq!(snap.gas[0], vec![3.0, 4.0, 5.0]);
        assert_eq!(snap.gas[6], vec![9.0, 10.0, 11.0]);
        assert_eq!(snap.temperature, vec![1.5, 2.0, 2.5]);
        assert_eq!(snap.humidity, vec![0.75, 1.0, 1.25]);
    }

    #[test]
    fn test_reset_matches_fresh_buffer() {
        let mut used = RollingBuffer::new(10);
        for n in 0..25 {
            used.push(sample(n));
        }
        used.reset();
        assert!(used.is_empty());

        let mut fresh = RollingBuffer::new(10);
        for n in 100..104 {
            used.push(sample(n));
            fresh.push(sample(n));
        }
        assert_eq!(used.snapshot(), fresh.snapshot());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buffer = RollingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(sample(1));
        buffer.push(sample(2));
        assert_eq!(buffer.snapshot().item_numbers, vec![2]);
    }
}
