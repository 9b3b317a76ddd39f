//! Fixed-capacity input history addressed by absolute sample index.

use super::types::{AbsIndex, Sample};

/// Power-of-two ring holding the most recent `capacity` input samples.
///
/// Samples are addressed by their absolute index since the last reset, so
/// readers never track wrap-around themselves. The buffer never allocates
/// after construction.
#[derive(Debug, Clone)]
pub struct RingHistory {
    data: Vec<Sample>,
    mask: usize,
    write_abs: AbsIndex,
}

/// Floor on the ring size regardless of sample rate.
pub const MIN_HISTORY_CAPACITY: usize = 1 << 16;

/// Extra room kept beyond the analysis horizon so epochs are pruned
/// before their samples are overwritten.
pub const HISTORY_SAFETY_MARGIN: usize = 8192;

impl RingHistory {
    /// Creates a ring with at least `min_capacity` samples, rounded up to a
    /// power of two.
    pub fn with_capacity(min_capacity: usize) -> Self {
        let cap = min_capacity.max(2).next_power_of_two();
        Self {
            data: vec![0.0; cap],
            mask: cap - 1,
            write_abs: 0,
        }
    }

    /// Creates a ring sized for `sample_rate`: 0.6 s of history plus the
    /// safety margin, never smaller than [`MIN_HISTORY_CAPACITY`].
    pub fn for_sample_rate(sample_rate: f64) -> Self {
        let wanted = (0.6 * sample_rate).ceil() as usize + HISTORY_SAFETY_MARGIN;
        Self::with_capacity(wanted.max(MIN_HISTORY_CAPACITY))
    }

    /// Returns the fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Absolute index one past the most recently written sample.
    #[inline]
    pub fn write_abs(&self) -> AbsIndex {
        self.write_abs
    }

    /// Oldest absolute index still held by the ring.
    #[inline]
    pub fn oldest_abs(&self) -> AbsIndex {
        (self.write_abs - self.capacity() as AbsIndex).max(0)
    }

    /// Returns true if `n` has been written and not yet overwritten.
    #[inline]
    pub fn contains(&self, n: AbsIndex) -> bool {
        n >= self.oldest_abs() && n < self.write_abs
    }

    /// Zeroes the history and rewinds the write head to 0.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_abs = 0;
    }

    /// Appends a block of samples.
    pub fn push_slice(&mut self, input: &[Sample]) {
        let cap = self.capacity();
        // Only the newest `cap` samples can survive.
        let skip = input.len().saturating_sub(cap);
        self.write_abs += skip as AbsIndex;
        let input = &input[skip..];

        let start = (self.write_abs as usize) & self.mask;
        let first = input.len().min(cap - start);
        self.data[start..start + first].copy_from_slice(&input[..first]);
        let rest = input.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&input[first..]);
        }
        self.write_abs += input.len() as AbsIndex;
    }

    /// Reads the sample at absolute index `n`.
    ///
    /// Positions that were never written or have been overwritten read as 0.
    #[inline]
    pub fn read(&self, n: AbsIndex) -> Sample {
        if self.contains(n) {
            self.data[(n as usize) & self.mask]
        } else {
            0.0
        }
    }

    /// Copies `out.len()` samples starting at absolute index `start`.
    pub fn copy_range(&self, start: AbsIndex, out: &mut [Sample]) {
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.read(start + i as AbsIndex);
        }
    }

    /// RMS of the samples in `[start, end)`, reading out-of-range positions as 0.
    pub fn rms(&self, start: AbsIndex, end: AbsIndex) -> f64 {
        if end <= start {
            return 0.0;
        }
        let sum: f64 = (start..end)
            .map(|n| {
                let s = self.read(n) as f64;
                s * s
            })
            .sum();
        (sum / (end - start) as f64).sqrt()
    }
}
