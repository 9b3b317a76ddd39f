//! Epoch log and marker.
//!
//! An epoch is a pitch mark: an absolute input position at a waveform peak,
//! roughly one period after the previous one. The marker extends the log
//! once per pitched block; synthesis voices read it to pick grain centres.
//!
//! Epochs are addressed by a monotonically increasing sequence number
//! rather than their position in the deque, so pruning old entries never
//! invalidates an index a voice is holding.

use std::collections::VecDeque;

use crate::core::ring_history::{RingHistory, HISTORY_SAFETY_MARGIN};
use crate::core::types::AbsIndex;

/// Minimum distance between consecutive epochs, as a fraction of the period.
pub const MIN_SPACING_FRACTION: f64 = 0.3;
/// Half-width of the peak search around a continuing anchor, in periods.
pub const SNAP_FRACTION: f64 = 0.2;
/// Half-width of the peak search for the first anchor after a restart.
pub const RESTART_SNAP_FRACTION: f64 = 0.5;
/// Anchors stay this many periods behind the write head, leaving room for
/// a full grain plus peak snapping and alignment shifts.
pub const MARK_HORIZON_PERIODS: f64 = 1.3;
/// Minimum block confidence for an epoch to be flagged voiced.
pub const VOICED_CONFIDENCE: f64 = 0.2;
/// Fundamental range, in Hz, over which an epoch may be flagged voiced.
pub const VOICED_MIN_HZ: f64 = 40.0;
pub const VOICED_MAX_HZ: f64 = 1200.0;

/// A single pitch mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Absolute input position.
    pub n_abs: AbsIndex,
    /// Period estimate at the time of marking, in samples.
    pub period: f64,
    /// RMS of the input over one period centred on the epoch.
    pub rms: f32,
    /// Whether the surrounding input was judged voiced.
    pub voiced: bool,
}

/// Append-only (plus prune-from-front) sequence of epochs.
#[derive(Debug, Clone)]
pub struct EpochLog {
    epochs: VecDeque<Epoch>,
    /// Sequence number of `epochs[0]`.
    head_seq: u64,
    version: u64,
    /// Position of the most recent anchor; the next one is sought a period later.
    cursor: Option<f64>,
}

impl EpochLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            epochs: VecDeque::with_capacity(capacity),
            head_seq: 0,
            version: 0,
            cursor: None,
        }
    }

    /// Sizes the log so a full ring of the densest epochs fits without
    /// reallocating.
    pub fn for_history(ring_capacity: usize, sample_rate: f64) -> Self {
        let min_spacing = (MIN_SPACING_FRACTION * sample_rate / super::pitch::MAX_F0_HZ)
            .floor()
            .max(1.0) as usize;
        Self::with_capacity(ring_capacity / min_spacing + 16)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Counter bumped on every append, prune or clear.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Sequence number of the oldest retained epoch.
    #[inline]
    pub fn first_seq(&self) -> u64 {
        self.head_seq
    }

    /// Sequence number one past the newest epoch.
    #[inline]
    pub fn end_seq(&self) -> u64 {
        self.head_seq + self.epochs.len() as u64
    }

    /// Sequence number of the newest epoch.
    #[inline]
    pub fn last_seq(&self) -> Option<u64> {
        self.end_seq().checked_sub(1).filter(|&s| s >= self.head_seq)
    }

    #[inline]
    pub fn get(&self, seq: u64) -> Option<&Epoch> {
        let offset = seq.checked_sub(self.head_seq)?;
        self.epochs.get(offset as usize)
    }

    #[inline]
    pub fn latest(&self) -> Option<&Epoch> {
        self.epochs.back()
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, Epoch> {
        self.epochs.iter()
    }

    /// Sequence number of the epoch closest to position `n`.
    pub fn seq_nearest(&self, n: f64) -> Option<u64> {
        if self.epochs.is_empty() {
            return None;
        }
        let idx = self.epochs.partition_point(|e| (e.n_abs as f64) < n);
        let best = if idx == 0 {
            0
        } else if idx == self.epochs.len() {
            idx - 1
        } else {
            let before = n - self.epochs[idx - 1].n_abs as f64;
            let after = self.epochs[idx].n_abs as f64 - n;
            if before <= after {
                idx - 1
            } else {
                idx
            }
        };
        Some(self.head_seq + best as u64)
    }

    pub(crate) fn push(&mut self, epoch: Epoch) {
        self.epochs.push_back(epoch);
        self.version += 1;
    }

    /// Drops epochs strictly before `n`. Returns how many were removed.
    pub fn prune_before(&mut self, n: AbsIndex) -> usize {
        let mut removed = 0;
        while self.epochs.front().is_some_and(|e| e.n_abs < n) {
            self.epochs.pop_front();
            removed += 1;
        }
        if removed > 0 {
            self.head_seq += removed as u64;
            self.version += 1;
        }
        removed
    }

    /// Drops every epoch while keeping sequence numbers monotonic.
    pub fn clear(&mut self) {
        if !self.epochs.is_empty() {
            self.head_seq += self.epochs.len() as u64;
            self.epochs.clear();
            self.version += 1;
        }
        self.cursor = None;
    }
}

/// Places new epochs one period apart, snapped to local waveform maxima.
#[derive(Debug, Clone)]
pub struct EpochMarker {
    sample_rate: f64,
    /// How far behind the write head a restarted marker begins.
    lookback: usize,
}

impl EpochMarker {
    pub fn new(sample_rate: f64, lookback: usize) -> Self {
        Self {
            sample_rate,
            lookback,
        }
    }

    /// Extends `log` up to [`MARK_HORIZON_PERIODS`] periods before the write head.
    ///
    /// Returns the number of epochs appended. When the newest epoch is older
    /// than the lookback window the log is cleared and marking restarts
    /// inside the window.
    pub fn mark(
        &self,
        log: &mut EpochLog,
        ring: &RingHistory,
        period: f64,
        confidence: f64,
    ) -> usize {
        if !period.is_finite() || period < 2.0 {
            return 0;
        }
        let write = ring.write_abs();
        let floor = (write - self.lookback as AbsIndex) as f64;
        let horizon = (write - (period * MARK_HORIZON_PERIODS).ceil() as AbsIndex) as f64;
        let oldest_allowed = write - ring.capacity() as AbsIndex;

        let (mut pos, mut snap) = match log.cursor {
            Some(c) if c + period >= floor => (c + period, SNAP_FRACTION),
            _ => {
                log.clear();
                (floor.max(0.0), RESTART_SNAP_FRACTION)
            }
        };

        let f0 = self.sample_rate / period;
        let voiced = confidence >= VOICED_CONFIDENCE && (VOICED_MIN_HZ..=VOICED_MAX_HZ).contains(&f0);
        let half = (period * 0.5).round() as AbsIndex;

        let mut appended = 0;
        while pos <= horizon {
            let radius = (snap * period).round().max(1.0) as AbsIndex;
            let n = snap_to_peak(ring, pos.round() as AbsIndex, radius, write);

            let too_old = n <= oldest_allowed;
            let too_close = log
                .latest()
                .is_some_and(|e| ((n - e.n_abs) as f64) < MIN_SPACING_FRACTION * period);
            if !too_old && !too_close {
                let rms = ring.rms(n - half, n + half.max(1)) as f32;
                log.push(Epoch {
                    n_abs: n,
                    period,
                    rms,
                    voiced,
                });
                log.cursor = Some(n as f64);
                pos = n as f64 + period;
                appended += 1;
            } else {
                pos += period;
            }
            snap = SNAP_FRACTION;
        }
        appended
    }

    /// Removes epochs whose samples are about to leave the ring.
    pub fn prune(&self, log: &mut EpochLog, ring: &RingHistory) -> usize {
        let limit =
            ring.write_abs() - ring.capacity() as AbsIndex + HISTORY_SAFETY_MARGIN as AbsIndex;
        log.prune_before(limit)
    }
}

/// Position of the largest sample within `centre ± radius`, clipped to
/// written samples. Ties resolve to the earliest position.
fn snap_to_peak(ring: &RingHistory, centre: AbsIndex, radius: AbsIndex, write: AbsIndex) -> AbsIndex {
    let lo = (centre - radius).max(ring.oldest_abs());
    let hi = (centre + radius).min(write - 1);
    if hi < lo {
        return centre;
    }
    let mut best = lo;
    let mut best_val = f32::NEG_INFINITY;
    for n in lo..=hi {
        let v = ring.read(n);
        if v > best_val {
            best_val = v;
            best = n;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SR: f64 = 48_000.0;

    fn sine_ring(freq: f64, len: usize) -> RingHistory {
        let mut ring = RingHistory::for_sample_rate(SR);
        let data: Vec<f32> = (0..len)
            .map(|n| (0.5 * (2.0 * PI * freq * n as f64 / SR).sin()) as f32)
            .collect();
        ring.push_slice(&data);
        ring
    }

    #[test]
    fn test_marks_peaks_one_period_apart() {
        let ring = sine_ring(200.0, 8192);
        let mut log = EpochLog::for_history(ring.capacity(), SR);
        let marker = EpochMarker::new(SR, 3840);
        let added = marker.mark(&mut log, &ring, 240.0, 0.99);
        assert!(added >= 14, "added {}", added);
        let epochs: Vec<_> = log.iter().copied().collect();
        for pair in epochs.windows(2) {
            assert_eq!(pair[1].n_abs - pair[0].n_abs, 240);
        }
        // Peaks of sin at 200 Hz sit at 60 + 240k.
        for e in &epochs {
            assert_eq!(e.n_abs.rem_euclid(240), 60, "epoch {}", e.n_abs);
            assert!(e.voiced);
            assert!((e.rms - 0.3536).abs() < 0.01);
        }
        let last = epochs.last().unwrap().n_abs;
        assert!(last <= ring.write_abs() - 240);
    }

    #[test]
    fn test_continues_from_cursor() {
        let mut ring = sine_ring(200.0, 4096);
        let mut log = EpochLog::for_history(ring.capacity(), SR);
        let marker = EpochMarker::new(SR, 3840);
        marker.mark(&mut log, &ring, 240.0, 0.99);
        let first_seq = log.first_seq();
        let v = log.version();

        let more: Vec<f32> = (4096..4608)
            .map(|n| (0.5 * (2.0 * PI * 200.0 * n as f64 / SR).sin()) as f32)
            .collect();
        ring.push_slice(&more);
        let added = marker.mark(&mut log, &ring, 240.0, 0.99);
        assert!(added >= 2);
        assert_eq!(log.first_seq(), first_seq);
        assert!(log.version() > v);
        let epochs: Vec<_> = log.iter().map(|e| e.n_abs).collect();
        for pair in epochs.windows(2) {
            assert_eq!(pair[1] - pair[0], 240);
        }
    }

    #[test]
    fn test_restart_clears_stale_epochs() {
        let ring = sine_ring(200.0, 8192);
        let mut log = EpochLog::for_history(ring.capacity(), SR);
        let marker = EpochMarker::new(SR, 3840);
        marker.mark(&mut log, &ring, 240.0, 0.99);
        let end_before = log.end_seq();

        let mut ring2 = ring.clone();
        ring2.push_slice(&vec![0.0; 10_000]);
        let tail: Vec<f32> = (0..4096)
            .map(|n| (0.5 * (2.0 * PI * 300.0 * n as f64 / SR).sin()) as f32)
            .collect();
        ring2.push_slice(&tail);
        marker.mark(&mut log, &ring2, 160.0, 0.99);
        assert!(log.first_seq() >= end_before, "stale epochs survived");
        let floor = ring2.write_abs() - 3840 - 80;
        assert!(log.iter().all(|e| e.n_abs >= floor));
    }

    #[test]
    fn test_unvoiced_flag() {
        let ring = sine_ring(200.0, 8192);
        let mut log = EpochLog::for_history(ring.capacity(), SR);
        let marker = EpochMarker::new(SR, 3840);
        marker.mark(&mut log, &ring, 240.0, 0.1);
        assert!(log.iter().all(|e| !e.voiced));
    }

    #[test]
    fn test_prune_keeps_sequence_numbers() {
        let mut log = EpochLog::with_capacity(16);
        for i in 0..10 {
            log.push(Epoch {
                n_abs: i * 100,
                period: 100.0,
                rms: 0.1,
                voiced: true,
            });
        }
        assert_eq!(log.version(), 10);
        assert_eq!(log.get(7).unwrap().n_abs, 700);
        assert_eq!(log.prune_before(450), 5);
        assert_eq!(log.version(), 11);
        assert_eq!(log.first_seq(), 5);
        assert!(log.get(4).is_none());
        assert_eq!(log.get(7).unwrap().n_abs, 700);
        assert_eq!(log.last_seq(), Some(9));
        assert_eq!(log.prune_before(0), 0);
        assert_eq!(log.version(), 11);
    }

    #[test]
    fn test_seq_nearest() {
        let mut log = EpochLog::with_capacity(8);
        assert_eq!(log.seq_nearest(10.0), None);
        for n in [100, 200, 300] {
            log.push(Epoch {
                n_abs: n,
                period: 100.0,
                rms: 0.1,
                voiced: true,
            });
        }
        assert_eq!(log.seq_nearest(0.0), Some(0));
        assert_eq!(log.seq_nearest(240.0), Some(1));
        assert_eq!(log.seq_nearest(260.0), Some(2));
        assert_eq!(log.seq_nearest(1e6), Some(2));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.first_seq(), 3);
        assert_eq!(log.last_seq(), None);
    }

    #[test]
    fn test_prune_against_ring() {
        let mut ring = RingHistory::with_capacity(1 << 16);
        let mut log = EpochLog::with_capacity(64);
        log.push(Epoch {
            n_abs: 10,
            period: 100.0,
            rms: 0.1,
            voiced: true,
        });
        let marker = EpochMarker::new(SR, 3840);
        ring.push_slice(&vec![0.0; 50_000]);
        assert_eq!(marker.prune(&mut log, &ring), 0);
        ring.push_slice(&vec![0.0; 30_000]);
        assert_eq!(marker.prune(&mut log, &ring), 1);
    }
}
