//! Pitch-synchronous overlap-add voice.
//!
//! Each voice walks the shared epoch log with its own cursor and places
//! Hann-windowed grains on a synthesis grid spaced `ref_period / alpha`
//! apart. Grain selection follows a Bresenham accumulator so that, over any
//! run of grains, the analysis index advances by `grains / alpha` rounded.
//! Before a grain is written it is nudged by a few samples to best match the
//! previous grain, its polarity is matched, and its level is pulled toward
//! a slow RMS envelope.
//!
//! Grain tails that reach past the current block are kept in a carry buffer
//! and added into the next block, so block boundaries never cut a grain.
//! The reference period is refreshed once per block from the epoch log.

use crate::analysis::analyzer::AnalysisView;
use crate::analysis::epoch::Epoch;
use crate::core::denormal::{flush, flush_f64};
use crate::core::fft::ENERGY_EPSILON;
use crate::core::types::{AbsIndex, Sample};
use crate::core::window::fill_hann;

use super::params::*;

/// Largest pitch ratio a voice renders; larger ratios are clamped.
pub const MAX_RATIO: f64 = 8.0;

/// Why a voice produced no synthesized output for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceReason {
    /// The pitch ratio was non-finite or not positive.
    DegenerateRatio,
    /// The epoch log held too few epochs.
    EpochStarvation,
    /// The block carried no usable pitch.
    Unpitched,
    /// The voice is inactive or muted.
    Bypassed,
}

/// Result of rendering one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOutcome {
    Rendered,
    Silent(SilenceReason),
}

impl VoiceOutcome {
    #[inline]
    pub fn is_rendered(&self) -> bool {
        matches!(self, VoiceOutcome::Rendered)
    }
}

/// One harmony voice.
#[derive(Debug, Clone)]
pub struct PsolaVoice {
    params: SynthParams,
    /// Absolute output position of the next grain centre.
    syn_time: f64,
    /// Sequence number of the epoch feeding the next grain.
    k_seq: u64,
    /// Fractional part of the Bresenham accumulator, in `[0, 1)`.
    acc: f64,
    anchored: bool,
    ref_period: f64,
    ref_version: Option<u64>,
    rms_env: f64,
    have_prev: bool,
    prev_grain: Vec<Sample>,
    prev_len: usize,
    window: Vec<Sample>,
    grain: Vec<Sample>,
    carry: Vec<Sample>,
    /// Absolute output index of `carry[0]`.
    carry_start: AbsIndex,
    distances: Vec<f64>,
    steps_taken: u64,
    grains_rendered: u64,
}

impl PsolaVoice {
    pub fn new(params: SynthParams) -> Self {
        let grain_cap = params.grain_capacity;
        let carry_cap = params.carry_capacity;
        let span = params.ref_period_span;
        let default_period = params.default_period;
        Self {
            params,
            syn_time: 0.0,
            k_seq: 0,
            acc: 0.0,
            anchored: false,
            ref_period: default_period,
            ref_version: None,
            rms_env: 0.0,
            have_prev: false,
            prev_grain: vec![0.0; grain_cap],
            prev_len: 0,
            window: vec![0.0; grain_cap],
            grain: vec![0.0; grain_cap],
            carry: vec![0.0; carry_cap],
            carry_start: 0,
            distances: vec![0.0; span],
            steps_taken: 0,
            grains_rendered: 0,
        }
    }

    /// Forgets all synthesis state; the next grain is placed no earlier
    /// than `syn_start`.
    pub fn reset(&mut self, syn_start: AbsIndex) {
        self.syn_time = syn_start as f64;
        self.k_seq = 0;
        self.acc = 0.0;
        self.anchored = false;
        self.ref_period = self.params.default_period;
        self.ref_version = None;
        self.rms_env = 0.0;
        self.have_prev = false;
        self.prev_len = 0;
        self.carry.fill(0.0);
        self.carry_start = syn_start;
        self.steps_taken = 0;
        self.grains_rendered = 0;
    }

    /// Current reference period in samples.
    #[inline]
    pub fn ref_period(&self) -> f64 {
        self.ref_period
    }

    /// Absolute output position of the next grain centre.
    #[inline]
    pub fn syn_time(&self) -> f64 {
        self.syn_time
    }

    /// Sum of Bresenham steps since the last reset.
    #[inline]
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Grains emitted since the last reset.
    #[inline]
    pub fn grains_rendered(&self) -> u64 {
        self.grains_rendered
    }

    /// Slow RMS envelope used for energy equalization.
    #[inline]
    pub fn rms_envelope(&self) -> f64 {
        self.rms_env
    }

    /// Nominal delay between input and output in samples.
    #[inline]
    pub fn latency_samples(&self) -> f64 {
        LATENCY_PERIODS * self.ref_period
    }

    /// Renders one block covering output positions
    /// `out_start .. out_start + out.len()`.
    ///
    /// `out` is overwritten. Call once per block with contiguous positions.
    pub fn render(
        &mut self,
        alpha: f64,
        view: AnalysisView<'_>,
        out: &mut [Sample],
        out_start: AbsIndex,
    ) -> VoiceOutcome {
        out.fill(0.0);
        let out_end = out_start + out.len() as AbsIndex;

        let reason = if !alpha.is_finite() || alpha <= 0.0 {
            Some(SilenceReason::DegenerateRatio)
        } else if !view.pitched {
            Some(SilenceReason::Unpitched)
        } else if view.epochs.len() < MIN_EPOCHS {
            Some(SilenceReason::EpochStarvation)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.fall_silent(out_end);
            return VoiceOutcome::Silent(reason);
        }
        let alpha = alpha.clamp(1.0 / MAX_RATIO, MAX_RATIO);

        self.update_ref_period(&view);
        self.drain_carry(out, out_start);

        let epochs = view.epochs;
        let (first, last) = match epochs.last_seq() {
            Some(last) => (epochs.first_seq(), last),
            None => {
                self.fall_silent(out_end);
                return VoiceOutcome::Silent(SilenceReason::EpochStarvation);
            }
        };
        if !self.anchored {
            self.anchor(&view, out_start);
        }
        self.k_seq = self.k_seq.clamp(first, last);

        let hop = self.ref_period / alpha;
        while self.syn_time < out_end as f64 {
            self.emit_grain(&view, hop, out, out_start);
            self.syn_time += hop;
            self.advance(&view, alpha, first, last);
        }
        VoiceOutcome::Rendered
    }

    /// Marks the voice idle through `out_end`; the next rendered block
    /// re-anchors from scratch.
    pub fn suspend(&mut self, out_end: AbsIndex) {
        self.fall_silent(out_end);
    }

    fn fall_silent(&mut self, out_end: AbsIndex) {
        self.syn_time = self.syn_time.max(out_end as f64);
        self.anchored = false;
        self.have_prev = false;
        self.rms_env = 0.0;
        self.acc = 0.0;
        self.carry.fill(0.0);
        self.carry_start = out_end;
    }

    fn anchor(&mut self, view: &AnalysisView<'_>, out_start: AbsIndex) {
        self.syn_time = self.syn_time.max(out_start as f64);
        let target = self.syn_time - LATENCY_PERIODS * self.ref_period;
        self.k_seq = view
            .epochs
            .seq_nearest(target)
            .unwrap_or(view.epochs.first_seq());
        self.acc = 0.0;
        self.have_prev = false;
        self.anchored = true;
    }

    /// Adds pending grain tails into `out` and shifts the remainder down.
    fn drain_carry(&mut self, out: &mut [Sample], out_start: AbsIndex) {
        if self.carry_start != out_start {
            self.carry.fill(0.0);
        } else {
            let n = out.len().min(self.carry.len());
            for (o, c) in out[..n].iter_mut().zip(self.carry[..n].iter()) {
                *o += flush(*c);
            }
            self.carry.copy_within(n.., 0);
            let cap = self.carry.len();
            self.carry[cap - n..].fill(0.0);
        }
        self.carry_start = out_start + out.len() as AbsIndex;
    }

    /// Median spacing of recent voiced epochs, recomputed only when the log
    /// has changed since the last call.
    fn update_ref_period(&mut self, view: &AnalysisView<'_>) {
        let version = view.epochs.version();
        if self.ref_version == Some(version) {
            return;
        }
        self.ref_version = Some(version);

        let max_distance = self.params.ref_max_distance();
        let span = self.distances.len();
        let mut count = 0;
        if view.epochs.len() >= 3 {
            let mut newer: Option<&Epoch> = None;
            for e in view.epochs.iter().rev() {
                if let Some(n) = newer {
                    let d = (n.n_abs - e.n_abs) as f64;
                    if n.voiced && e.voiced && d > REF_MIN_DISTANCE && d <= max_distance {
                        self.distances[count] = d;
                        count += 1;
                        if count == span {
                            break;
                        }
                    }
                }
                newer = Some(e);
            }
        }

        let period = if count == 0 {
            view.period
        } else {
            let d = &mut self.distances[..count];
            d.sort_unstable_by(f64::total_cmp);
            let median = if count % 2 == 1 {
                d[count / 2]
            } else {
                0.5 * (d[count / 2 - 1] + d[count / 2])
            };
            // Epochs sit on whole samples, so a fractional period shows up as
            // a mix of neighbouring distances. Averaging that cluster keeps
            // the median from flipping between them from block to block.
            let (sum, n) = d
                .iter()
                .filter(|&&x| (x - median).abs() <= 1.0)
                .fold((0.0, 0usize), |(s, n), &x| (s + x, n + 1));
            if n > 0 {
                sum / n as f64
            } else {
                median
            }
        };
        self.ref_period = period.clamp(2.0, self.params.max_period);
    }

    /// Windows, aligns and overlap-adds the grain for `self.k_seq`.
    fn emit_grain(
        &mut self,
        view: &AnalysisView<'_>,
        hop: f64,
        out: &mut [Sample],
        out_start: AbsIndex,
    ) {
        let epochs = view.epochs;
        let Some(epoch) = epochs.get(self.k_seq) else {
            return;
        };
        let c = epoch.n_abs;
        let ref_period = self.ref_period;

        // The grain spans from the previous epoch to the next one. A missing
        // neighbour mirrors the other side.
        let left_gap = self
            .k_seq
            .checked_sub(1)
            .and_then(|s| epochs.get(s))
            .map(|e| (c - e.n_abs) as f64);
        let right_gap = epochs.get(self.k_seq + 1).map(|e| (e.n_abs - c) as f64);
        let span = left_gap.or(right_gap).unwrap_or(ref_period)
            + right_gap.or(left_gap).unwrap_or(ref_period);
        let mut len = span
            .round()
            .min(max_grain_len(ref_period, hop))
            .max(MIN_GRAIN_LEN as f64) as usize;
        if len % 2 == 0 {
            len += 1;
        }
        if len > self.grain.len() {
            len = self.grain.len() - (1 - self.grain.len() % 2);
        }
        let half = len / 2;
        let window_energy = fill_hann(&mut self.window[..len]);

        let prev_half = self.prev_len / 2;
        let core = ((CORE_FRACTION * ref_period).round() as usize)
            .min(half)
            .min(prev_half);

        let shift = if self.have_prev && core > 0 {
            self.best_shift(view, c, half, prev_half, core, ref_period)
        } else {
            0
        };

        let start = c + shift - half as AbsIndex;
        let mut energy = 0.0f64;
        for i in 0..len {
            let v = self.window[i] * view.ring.read(start + i as AbsIndex);
            self.grain[i] = v;
            energy += (v as f64) * (v as f64);
        }
        let cur_rms = if window_energy > ENERGY_EPSILON {
            (energy / window_energy).sqrt()
        } else {
            0.0
        };

        self.rms_env = if self.rms_env <= 0.0 {
            cur_rms
        } else {
            flush_f64(RMS_ENV_DECAY * self.rms_env + (1.0 - RMS_ENV_DECAY) * cur_rms)
        };

        let sign = if self.have_prev && core > 0 {
            let mut dot = 0.0f64;
            for j in 0..=2 * core {
                let a = self.grain[half - core + j] as f64;
                let b = self.prev_grain[prev_half - core + j] as f64;
                dot += a * b;
            }
            if dot < 0.0 {
                -1.0
            } else {
                1.0
            }
        } else {
            1.0
        };

        let eq = if cur_rms > ENERGY_EPSILON {
            (self.rms_env / cur_rms).clamp(GAIN_MIN, GAIN_MAX)
        } else {
            1.0
        };
        let gain = (sign * grain_gain(eq, len, hop)) as f32;

        let out_len = out.len() as AbsIndex;
        let carry_len = self.carry.len() as AbsIndex;
        let first = self.syn_time.round() as AbsIndex - half as AbsIndex - out_start;
        for i in 0..len {
            let pos = first + i as AbsIndex;
            let v = gain * self.grain[i];
            if pos < 0 {
                continue;
            } else if pos < out_len {
                out[pos as usize] += v;
            } else if pos - out_len < carry_len {
                self.carry[(pos - out_len) as usize] += v;
            }
        }

        let sign = sign as f32;
        for (p, g) in self.prev_grain[..len].iter_mut().zip(self.grain[..len].iter()) {
            *p = sign * *g;
        }
        self.prev_len = len;
        self.have_prev = true;
        self.grains_rendered += 1;
    }

    /// Shift in `±SEARCH_FRACTION · ref_period` whose windowed core best
    /// matches the previous grain's core.
    fn best_shift(
        &self,
        view: &AnalysisView<'_>,
        c: AbsIndex,
        half: usize,
        prev_half: usize,
        core: usize,
        ref_period: f64,
    ) -> AbsIndex {
        let search = (SEARCH_FRACTION * ref_period).round().max(1.0) as AbsIndex;
        let mut best_shift = 0;
        let mut best_score = f64::NEG_INFINITY;
        for d in -search..=search {
            let base = c + d - core as AbsIndex;
            let (mut dot, mut ea, mut eb) = (0.0f64, 0.0f64, 0.0f64);
            for j in 0..=2 * core {
                let a = self.window[half - core + j] as f64 * view.ring.read(base + j as AbsIndex) as f64;
                let b = self.prev_grain[prev_half - core + j] as f64;
                dot += a * b;
                ea += a * a;
                eb += b * b;
            }
            let denom = (ea * eb).sqrt();
            let cosine = if denom > ENERGY_EPSILON { dot / denom } else { 0.0 };
            let score = cosine - SHIFT_PENALTY * d.abs() as f64;
            if score > best_score {
                best_score = score;
                best_shift = d;
            }
        }
        best_shift
    }

    /// Bresenham step to the next analysis epoch, then a one-epoch nudge if
    /// the source has drifted more than a period from the latency target.
    fn advance(&mut self, view: &AnalysisView<'_>, alpha: f64, first: u64, last: u64) {
        self.acc += 1.0 / alpha;
        let step = self.acc.floor();
        self.acc -= step;
        let step = step as u64;
        self.steps_taken += step;
        self.k_seq = self.k_seq.saturating_add(step).clamp(first, last);

        let target = self.syn_time - LATENCY_PERIODS * self.ref_period;
        if let Some(e) = view.epochs.get(self.k_seq) {
            let tolerance = e.period.max(1.0);
            let pos = e.n_abs as f64;
            if pos > target + tolerance && self.k_seq > first {
                self.k_seq -= 1;
            } else if pos < target - tolerance && self.k_seq < last {
                self.k_seq += 1;
            }
        }
    }
}

/// Longest grain for a reference period and synthesis hop.
///
/// Above unity ratio the grain is held to two hops. A window spanning two
/// source periods has a spectral zero at twice the source frequency and
/// would cancel an octave-up voice.
fn max_grain_len(ref_period: f64, hop: f64) -> f64 {
    let mut max_len = MAX_GRAIN_PERIODS * ref_period;
    if hop < ref_period {
        max_len = max_len.min(2.0 * hop);
    }
    max_len.floor()
}

/// Overlap-add gain for a grain of `len` samples placed every `hop` samples,
/// given its energy-equalization ratio `eq`.
fn grain_gain(eq: f64, len: usize, hop: f64) -> f64 {
    // Coherent normalization while grains overlap at least twice,
    // power normalization when they spread further apart.
    let overlap = len.saturating_sub(1) as f64 / hop;
    let density = if overlap >= 2.0 {
        2.0 / overlap
    } else {
        (2.0 / overlap).sqrt()
    };
    (eq * density).clamp(GAIN_MIN, GAIN_MAX)
}
