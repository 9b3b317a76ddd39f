//! Per-channel analysis: input history, pitch tracking and epoch marking.

use log::debug;

use super::epoch::{EpochLog, EpochMarker};
use super::pitch::{PitchEstimate, PitchEstimator};
use crate::core::ring_history::RingHistory;
use crate::core::types::{AbsIndex, Sample};

/// Summary of one analysed block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAnalysis {
    pub estimate: PitchEstimate,
    /// Epochs appended during this block.
    pub appended: usize,
    /// Epochs pruned during this block.
    pub pruned: usize,
}

/// Read-only view of the analysis state handed to synthesis voices.
///
/// A voice sees the same history, epochs and period as every other voice
/// rendering the same block.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisView<'a> {
    pub ring: &'a RingHistory,
    pub epochs: &'a EpochLog,
    /// Smoothed period from the estimator.
    pub period: f64,
    /// Whether the block carried a usable pitch.
    pub pitched: bool,
}

/// Owns everything one channel's voices read from.
#[derive(Debug)]
pub struct ChannelAnalyzer {
    ring: RingHistory,
    estimator: PitchEstimator,
    marker: EpochMarker,
    epochs: EpochLog,
    last: PitchEstimate,
    was_pitched: bool,
}

impl ChannelAnalyzer {
    pub fn new(sample_rate: f64) -> Self {
        let ring = RingHistory::for_sample_rate(sample_rate);
        let estimator = PitchEstimator::new(sample_rate);
        let marker = EpochMarker::new(sample_rate, estimator.window_len());
        let epochs = EpochLog::for_history(ring.capacity(), sample_rate);
        let last = PitchEstimate {
            period: estimator.period(),
            confidence: 0.0,
        };
        Self {
            ring,
            estimator,
            marker,
            epochs,
            last,
            was_pitched: false,
        }
    }

    /// Clears history, epochs and pitch state.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.estimator.reset();
        self.epochs.clear();
        self.last = PitchEstimate {
            period: self.estimator.period(),
            confidence: 0.0,
        };
        self.was_pitched = false;
    }

    /// Absolute index of the next sample to be written.
    #[inline]
    pub fn write_abs(&self) -> AbsIndex {
        self.ring.write_abs()
    }

    /// Appends `block` and updates pitch and epochs.
    pub fn analyze_block(&mut self, block: &[Sample]) -> BlockAnalysis {
        self.ring.push_slice(block);

        let rms = if block.is_empty() {
            0.0
        } else {
            let sum: f64 = block.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum / block.len() as f64).sqrt()
        };
        let estimate = self.estimator.analyze(&self.ring, rms);

        let appended = if estimate.is_pitched() {
            self.marker
                .mark(&mut self.epochs, &self.ring, estimate.period, estimate.confidence)
        } else {
            0
        };
        let pruned = self.marker.prune(&mut self.epochs, &self.ring);

        if estimate.is_pitched() != self.was_pitched {
            if estimate.is_pitched() {
                debug!(
                    "pitch acquired at {}: period {:.2} samples, confidence {:.2}",
                    self.ring.write_abs(),
                    estimate.period,
                    estimate.confidence
                );
            } else {
                debug!("pitch lost at {}", self.ring.write_abs());
            }
            self.was_pitched = estimate.is_pitched();
        }

        self.last = estimate;
        BlockAnalysis {
            estimate,
            appended,
            pruned,
        }
    }

    /// Snapshot for the voices rendering the block just analysed.
    #[inline]
    pub fn view(&self) -> AnalysisView<'_> {
        AnalysisView {
            ring: &self.ring,
            epochs: &self.epochs,
            period: self.last.period,
            pitched: self.last.is_pitched(),
        }
    }

    #[inline]
    pub fn ring(&self) -> &RingHistory {
        &self.ring
    }

    #[inline]
    pub fn epochs(&self) -> &EpochLog {
        &self.epochs
    }

    #[inline]
    pub fn last_estimate(&self) -> PitchEstimate {
        self.last
    }
}
