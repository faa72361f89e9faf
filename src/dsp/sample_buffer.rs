//! Sample buffer — bounded ring of timestamped mono audio samples.

/// A fixed-capacity ring buffer holding the most recent audio samples.
///
/// Every `add` stamps the buffer with the timestamp (ms, monotonic clock
/// domain) of the newest sample, so a window read back from the buffer can
/// be placed on the same time axis as the producer.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    write_index: usize,
    full: bool,
    end_timestamp: f64,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            write_index: 0,
            full: false,
            end_timestamp: 0.0,
        }
    }

    /// Create a buffer large enough to retain `retention_ms` of audio.
    pub fn with_duration(retention_ms: f64, sample_rate: f64) -> Self {
        let capacity = (retention_ms / 1000.0 * sample_rate).round() as usize;
        Self::new(capacity)
    }

    /// Append `samples`, overwriting the oldest data once full.
    ///
    /// `end_timestamp` is the time of the last sample in `samples` and is
    /// recorded even when the slice is empty.
    pub fn add(&mut self, end_timestamp: f64, samples: &[f32]) {
        self.end_timestamp = end_timestamp;

        let capacity = self.samples.len();
        if samples.len() >= capacity {
            // Only the newest `capacity` samples survive; lay them out from 0.
            let tail = &samples[samples.len() - capacity..];
            self.samples.copy_from_slice(tail);
            self.write_index = 0;
            self.full = true;
            return;
        }

        if self.write_index + samples.len() >= capacity {
            self.full = true;
        }

        let first = (capacity - self.write_index).min(samples.len());
        self.samples[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.samples[..rest].copy_from_slice(&samples[first..]);

        self.write_index = (self.write_index + samples.len()) % capacity;
    }

    /// Forget all held samples. Capacity is retained.
    pub fn clear(&mut self) {
        self.write_index = 0;
        self.full = false;
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        if self.full { self.samples.len() } else { self.write_index }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Timestamp of the most recently written sample.
    pub fn end_timestamp(&self) -> f64 {
        self.end_timestamp
    }

    /// Return the newest `count` samples, oldest first, with the end timestamp.
    ///
    /// `None` or a count larger than the held length returns everything held.
    pub fn window(&self, count: Option<usize>) -> (f64, Vec<f32>) {
        let len = self.len();
        let count = count.map_or(len, |c| c.min(len));
        let capacity = self.samples.len();

        let mut out = Vec::with_capacity(count);
        let start = (self.write_index + capacity - count) % capacity;
        if start + count <= capacity {
            out.extend_from_slice(&self.samples[start..start + count]);
        } else {
            out.extend_from_slice(&self.samples[start..]);
            out.extend_from_slice(&self.samples[..start + count - capacity]);
        }

        (self.end_timestamp, out)
    }

    /// Mean of the held samples (0.0 when empty).
    pub fn average(&self) -> f64 {
        let held = self.held();
        if held.is_empty() {
            return 0.0;
        }
        held.iter().map(|&s| s as f64).sum::<f64>() / held.len() as f64
    }

    /// Root mean square of the held samples (0.0 when empty).
    pub fn root_mean_square(&self) -> f64 {
        let held = self.held();
        if held.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = held.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / held.len() as f64).sqrt()
    }

    // Held samples in storage order; only valid for order-free statistics.
    fn held(&self) -> &[f32] {
        &self.samples[..self.len()]
    }
}
