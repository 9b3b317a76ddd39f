//! Normalized-autocorrelation pitch estimator.
//!
//! Once per block the estimator looks at the most recent 80 ms of input,
//! computes a linear autocorrelation through one forward and one inverse
//! FFT, normalizes every lag by the energies of the two overlapping
//! segments, and picks the strongest lag in the 60 Hz to 1600 Hz range.
//! The raw lag is then octave-corrected, refined to sub-sample precision
//! with a parabola and folded into an adaptively smoothed period.
//!
//! All buffers and FFT plans are created in [`PitchEstimator::new`], so
//! [`PitchEstimator::analyze`] never allocates.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::core::fft::{autocorr_fft_len, COMPLEX_ZERO, ENERGY_EPSILON};
use crate::core::ring_history::RingHistory;

/// Lowest fundamental searched, in Hz.
pub const MIN_F0_HZ: f64 = 60.0;
/// Highest fundamental searched, in Hz.
pub const MAX_F0_HZ: f64 = 1600.0;
/// Lowest fundamental the smoothed period may describe, in Hz.
pub const SMOOTHED_MIN_F0_HZ: f64 = 50.0;
/// Default fundamental before the first detection, in Hz.
pub const DEFAULT_F0_HZ: f64 = 200.0;
/// Analysis window length in seconds.
pub const WINDOW_SECONDS: f64 = 0.08;
/// Normalized correlation below which a block is treated as unpitched.
pub const CONFIDENCE_THRESHOLD: f64 = 0.30;
/// A half-lag scoring at least this fraction of the best lag replaces it.
pub const OCTAVE_RATIO: f64 = 0.70;
/// Maximum multiplicative penalty applied to the longest lag.
const SHORT_LAG_BIAS: f64 = 0.01;
/// Blocks quieter than this RMS are not analysed.
pub const SILENCE_RMS: f64 = 1e-4;

/// Result of one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Smoothed fundamental period in samples.
    pub period: f64,
    /// Normalized correlation at the chosen lag, or 0 when unpitched.
    pub confidence: f64,
}

impl PitchEstimate {
    /// True when the block carried a usable pitch.
    #[inline]
    pub fn is_pitched(&self) -> bool {
        self.confidence > 0.0
    }
}

/// Block-rate fundamental period tracker.
pub struct PitchEstimator {
    sample_rate: f64,
    window_len: usize,
    min_lag: usize,
    max_lag: usize,
    period: f64,
    confidence: f64,
    /// Set once a detection has replaced the default period.
    seeded: bool,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    prefix_sq: Vec<f64>,
    norm_corr: Vec<f64>,
    fft_fwd: Arc<dyn Fft<f32>>,
    fft_inv: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for PitchEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchEstimator")
            .field("sample_rate", &self.sample_rate)
            .field("window_len", &self.window_len)
            .field("lag_range", &(self.min_lag..=self.max_lag))
            .field("period", &self.period)
            .field("confidence", &self.confidence)
            .finish()
    }
}

impl PitchEstimator {
    pub fn new(sample_rate: f64) -> Self {
        let window_len = (WINDOW_SECONDS * sample_rate).round() as usize;
        let min_lag = ((sample_rate / MAX_F0_HZ).round() as usize).max(2);
        let max_lag = ((sample_rate / MIN_F0_HZ).round() as usize)
            .min(window_len.saturating_sub(2))
            .max(min_lag + 2);
        let fft_len = autocorr_fft_len(window_len);

        let mut planner = FftPlanner::new();
        let fft_fwd = planner.plan_fft_forward(fft_len);
        let fft_inv = planner.plan_fft_inverse(fft_len);
        let scratch_len = fft_fwd
            .get_inplace_scratch_len()
            .max(fft_inv.get_inplace_scratch_len());

        Self {
            sample_rate,
            window_len,
            min_lag,
            max_lag,
            period: sample_rate / DEFAULT_F0_HZ,
            confidence: 0.0,
            seeded: false,
            frame: vec![0.0; window_len],
            spectrum: vec![COMPLEX_ZERO; fft_len],
            scratch: vec![COMPLEX_ZERO; scratch_len],
            prefix_sq: vec![0.0; window_len + 1],
            norm_corr: vec![0.0; max_lag + 2],
            fft_fwd,
            fft_inv,
        }
    }

    /// Restores the default period and clears confidence.
    pub fn reset(&mut self) {
        self.period = self.sample_rate / DEFAULT_F0_HZ;
        self.confidence = 0.0;
        self.seeded = false;
    }

    /// Analysis window length in samples.
    #[inline]
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Current smoothed period in samples.
    #[inline]
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Confidence of the most recent analysis.
    #[inline]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Searched lag range in samples.
    #[inline]
    pub fn lag_range(&self) -> (usize, usize) {
        (self.min_lag, self.max_lag)
    }

    fn current(&self) -> PitchEstimate {
        PitchEstimate {
            period: self.period,
            confidence: self.confidence,
        }
    }

    /// Analyses the newest window of `ring`.
    ///
    /// `block_rms` is the RMS of the block just pushed; quiet blocks and
    /// histories shorter than one window report zero confidence and leave
    /// the smoothed period untouched.
    pub fn analyze(&mut self, ring: &RingHistory, block_rms: f64) -> PitchEstimate {
        let end = ring.write_abs();
        if block_rms < SILENCE_RMS || end < self.window_len as i64 {
            self.confidence = 0.0;
            return self.current();
        }
        ring.copy_range(end - self.window_len as i64, &mut self.frame);
        self.analyze_frame();
        self.current()
    }

    fn analyze_frame(&mut self) {
        let w = self.window_len;

        self.prefix_sq[0] = 0.0;
        for (i, &s) in self.frame.iter().enumerate() {
            self.prefix_sq[i + 1] = self.prefix_sq[i] + (s as f64) * (s as f64);
        }

        for (i, c) in self.spectrum.iter_mut().enumerate() {
            *c = match self.frame.get(i) {
                Some(&s) => Complex::new(s, 0.0),
                None => COMPLEX_ZERO,
            };
        }
        self.fft_fwd
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        for c in self.spectrum.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.fft_inv
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = 1.0 / self.spectrum.len() as f64;
        let lo = self.min_lag - 1;
        let hi = self.max_lag + 1;
        let total = self.prefix_sq[w];
        for tau in lo..=hi {
            let raw = self.spectrum[tau].re as f64 * scale;
            let e_head = self.prefix_sq[w - tau];
            let e_tail = total - self.prefix_sq[tau];
            self.norm_corr[tau] = if e_head < ENERGY_EPSILON || e_tail < ENERGY_EPSILON {
                0.0
            } else {
                raw / (e_head * e_tail).sqrt()
            };
        }

        // Argmax with a gentle preference for short lags.
        let span = (self.max_lag - self.min_lag).max(1) as f64;
        let mut best_tau = self.min_lag;
        let mut best_score = f64::NEG_INFINITY;
        for tau in self.min_lag..=self.max_lag {
            let bias = 1.0 - SHORT_LAG_BIAS * (tau - self.min_lag) as f64 / span;
            let score = self.norm_corr[tau] * bias;
            if score > best_score {
                best_score = score;
                best_tau = tau;
            }
        }

        let best_r = self.norm_corr[best_tau];
        if best_r < CONFIDENCE_THRESHOLD {
            self.confidence = 0.0;
            return;
        }

        let tau = self.octave_correct(best_tau, best_r);
        let refined = tau as f64 + self.parabolic_offset(tau);
        let confidence = self.norm_corr[tau].clamp(0.0, 1.0);

        if !self.seeded || self.confidence <= 0.0 {
            self.period = refined;
            self.seeded = true;
        } else {
            let deviation = (refined - self.period).abs() / self.period;
            let alpha = if deviation > 0.5 {
                0.7
            } else if confidence > 0.7 {
                0.3
            } else {
                0.1
            };
            self.period = (1.0 - alpha) * self.period + alpha * refined;
        }
        self.period = self.period.clamp(
            self.sample_rate / MAX_F0_HZ,
            self.sample_rate / SMOOTHED_MIN_F0_HZ,
        );
        self.confidence = confidence;
    }

    /// Walks down to the lowest submultiple lag that still correlates at
    /// least [`OCTAVE_RATIO`] as strongly as the best lag.
    fn octave_correct(&self, best_tau: usize, best_r: f64) -> usize {
        let mut tau = best_tau;
        loop {
            let half = (tau + 1) / 2;
            if half < self.min_lag + 1 {
                return tau;
            }
            let mut cand = half;
            for t in [half - 1, half + 1] {
                if t >= self.min_lag && self.norm_corr[t] > self.norm_corr[cand] {
                    cand = t;
                }
            }
            if self.norm_corr[cand] >= OCTAVE_RATIO * best_r {
                tau = cand;
            } else {
                return tau;
            }
        }
    }

    fn parabolic_offset(&self, tau: usize) -> f64 {
        let a = self.norm_corr[tau - 1];
        let b = self.norm_corr[tau];
        let c = self.norm_corr[tau + 1];
        let denom = a - 2.0 * b + c;
        if denom < -1e-12 {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    }
}
