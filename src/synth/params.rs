use crate::analysis::pitch::DEFAULT_F0_HZ;

/// Shortest grain ever rendered, in samples.
pub const MIN_GRAIN_LEN: usize = 32;
/// Longest grain relative to the reference period.
pub const MAX_GRAIN_PERIODS: f64 = 3.0;
/// Micro-alignment search half-width as a fraction of the reference period.
pub const SEARCH_FRACTION: f64 = 0.10;
/// Half-width of the grain core compared during alignment and polarity checks.
pub const CORE_FRACTION: f64 = 0.30;
/// Alignment score penalty per sample of shift.
pub const SHIFT_PENALTY: f64 = 0.002;
/// One-pole decay of the grain RMS envelope.
pub const RMS_ENV_DECAY: f64 = 0.995;
/// Clamp on the energy-equalization ratio and on the total grain gain.
pub const GAIN_MIN: f64 = 0.5;
pub const GAIN_MAX: f64 = 2.0;
/// Fewer epochs than this silences a voice.
pub const MIN_EPOCHS: usize = 4;
/// Epoch distances at or below this are ignored by the reference period.
pub const REF_MIN_DISTANCE: f64 = 16.0;
/// Epoch distances above this fraction of the sample rate are ignored.
pub const REF_MAX_FRACTION: f64 = 0.03;
/// Nominal distance, in reference periods, between the synthesis head and
/// the grain source. Must exceed the marker horizon plus one epoch step and
/// the drift tolerance so the source epoch always exists.
pub const LATENCY_PERIODS: f64 = 3.5;

/// Derived per-voice sizes and limits.
#[derive(Debug, Clone)]
pub struct SynthParams {
    pub sample_rate: f64,
    /// Largest reference period a voice can hold.
    pub max_period: f64,
    /// Capacity of grain and window scratch.
    pub grain_capacity: usize,
    /// Capacity of the overlap-add carry into the next block.
    pub carry_capacity: usize,
    /// Number of epoch distances in the reference-period median.
    pub ref_period_span: usize,
    /// Reference period used before any epochs exist.
    pub default_period: f64,
}

impl SynthParams {
    pub fn new(sample_rate: f64, ref_period_span: usize) -> Self {
        // Reference periods come from epoch distances (capped at 3% of the
        // rate) or from the smoothed estimator period (capped at fs / 50).
        let max_period = (REF_MAX_FRACTION * sample_rate).max(sample_rate / 50.0);
        let grain_capacity = (MAX_GRAIN_PERIODS * max_period).ceil() as usize + 2;
        let carry_capacity = grain_capacity + max_period.ceil() as usize + 2;
        Self {
            sample_rate,
            max_period,
            grain_capacity: grain_capacity.max(MIN_GRAIN_LEN + 1),
            carry_capacity,
            ref_period_span: ref_period_span.max(1),
            default_period: sample_rate / DEFAULT_F0_HZ,
        }
    }

    /// Largest reference-period distance accepted from the epoch log.
    #[inline]
    pub fn ref_max_distance(&self) -> f64 {
        REF_MAX_FRACTION * self.sample_rate
    }
}
