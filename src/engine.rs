//! Block-processing harmonizer engine.
//!
//! [`Harmonizer`] owns one [`ChannelAnalyzer`] and a fixed set of
//! [`PsolaVoice`]s per channel. Every block runs the same fixed sequence:
//! push input, estimate pitch, extend the epoch log, then render and mix each
//! voice. All buffers are sized when the engine is prepared, so processing
//! never allocates.

use log::debug;

use crate::analysis::analyzer::ChannelAnalyzer;
use crate::analysis::epoch::EpochLog;
use crate::core::denormal::flush;
use crate::core::types::{
    AbsIndex, FallbackPolicy, HarmonizerConfig, Sample, VoiceParams, MAX_VOICES,
};
use crate::error::{HarmonizerError, Result};
use crate::harmony::interval::IntervalResolver;
use crate::harmony::scale::ScaleKind;
use crate::synth::params::SynthParams;
use crate::synth::psola::{PsolaVoice, SilenceReason, VoiceOutcome};

/// Mixed output is clamped to this magnitude.
pub const OUTPUT_LIMIT: f32 = 2.0;

#[derive(Debug)]
struct VoiceSlot {
    synth: PsolaVoice,
    scratch: Vec<Sample>,
    outcome: VoiceOutcome,
}

#[derive(Debug)]
struct ChannelState {
    analyzer: ChannelAnalyzer,
    voices: Vec<VoiceSlot>,
}

impl ChannelState {
    fn new(config: &HarmonizerConfig) -> Self {
        let params = SynthParams::new(config.sample_rate, config.ref_period_span);
        let voices = (0..MAX_VOICES)
            .map(|_| VoiceSlot {
                synth: PsolaVoice::new(params.clone()),
                scratch: vec![0.0; config.max_block_size],
                outcome: VoiceOutcome::Silent(SilenceReason::Unpitched),
            })
            .collect();
        Self {
            analyzer: ChannelAnalyzer::new(config.sample_rate),
            voices,
        }
    }
}

/// Real-time polyphonic harmonizer.
///
/// # Example
///
/// ```
/// use harmonizer::{Harmonizer, HarmonizerConfig};
///
/// let config = HarmonizerConfig::new(48_000.0).with_voice(0, 7, 1.0);
/// let mut engine = Harmonizer::new(config).unwrap();
/// let input = vec![0.0f32; 512];
/// let mut output = vec![0.0f32; 512];
/// engine.process(&input, &mut output).unwrap();
/// assert!(output.iter().all(|&s| s == 0.0));
/// ```
#[derive(Debug)]
pub struct Harmonizer {
    config: HarmonizerConfig,
    resolver: IntervalResolver,
    channels: Vec<ChannelState>,
    /// Per-channel de-interleave scratch for [`Harmonizer::process_interleaved`].
    split_in: Vec<Vec<Sample>>,
    split_out: Vec<Vec<Sample>>,
}

impl Harmonizer {
    /// Validates `config` and allocates every buffer the engine will use.
    pub fn new(config: HarmonizerConfig) -> Result<Self> {
        config.validate()?;
        let resolver = IntervalResolver::new(config.scale, config.root_key)?;
        let mut engine = Self {
            config,
            resolver,
            channels: Vec::new(),
            split_in: Vec::new(),
            split_out: Vec::new(),
        };
        engine.allocate();
        Ok(engine)
    }

    /// Re-prepares for a new sample rate and block size. All state is reset.
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize) -> Result<()> {
        let config = self
            .config
            .clone()
            .with_sample_rate(sample_rate)
            .with_max_block_size(max_block_size);
        config.validate()?;
        self.config = config;
        self.allocate();
        Ok(())
    }

    fn allocate(&mut self) {
        let nc = self.config.channels as usize;
        self.channels = (0..nc).map(|_| ChannelState::new(&self.config)).collect();
        self.split_in = vec![vec![0.0; self.config.max_block_size]; nc];
        self.split_out = vec![vec![0.0; self.config.max_block_size]; nc];

        let params = SynthParams::new(self.config.sample_rate, self.config.ref_period_span);
        debug!(
            "prepared: {} Hz, {} channel(s), block {}, ring {} samples, grain capacity {}",
            self.config.sample_rate,
            nc,
            self.config.max_block_size,
            self.channels
                .first()
                .map_or(0, |c| c.analyzer.ring().capacity()),
            params.grain_capacity
        );
    }

    /// Clears history, epochs and all voice state without reallocating.
    pub fn reset(&mut self) {
        for state in self.channels.iter_mut() {
            state.analyzer.reset();
            for slot in state.voices.iter_mut() {
                slot.synth.reset(0);
                slot.outcome = VoiceOutcome::Silent(SilenceReason::Unpitched);
            }
        }
        debug!("reset");
    }

    /// Current configuration, including between-block parameter changes.
    #[inline]
    pub fn config(&self) -> &HarmonizerConfig {
        &self.config
    }

    /// Sets one voice's requested shift and volume.
    pub fn set_voice(&mut self, index: usize, semitones: i32, volume: f32) -> Result<()> {
        if index >= MAX_VOICES {
            return Err(HarmonizerError::InvalidVoice {
                index,
                count: MAX_VOICES,
            });
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(HarmonizerError::InvalidInput(format!(
                "voice volume must be finite and non-negative, got {}",
                volume
            )));
        }
        self.config.voices[index] = VoiceParams::new(semitones, volume);
        Ok(())
    }

    /// Selects a scale by table index (0..10) and root key (0..12).
    pub fn set_scale(&mut self, scale_index: usize, root_key: u8) -> Result<()> {
        let scale = ScaleKind::from_index(scale_index)?;
        self.set_scale_kind(scale, root_key)
    }

    pub fn set_scale_kind(&mut self, scale: ScaleKind, root_key: u8) -> Result<()> {
        self.resolver = IntervalResolver::new(scale, root_key)?;
        self.config.scale = scale;
        self.config.root_key = root_key;
        Ok(())
    }

    pub fn set_voice_count(&mut self, voice_count: usize) -> Result<()> {
        if voice_count == 0 || voice_count > MAX_VOICES {
            return Err(HarmonizerError::InvalidVoice {
                index: voice_count,
                count: MAX_VOICES,
            });
        }
        self.config.voice_count = voice_count;
        Ok(())
    }

    pub fn set_fallback(&mut self, fallback: FallbackPolicy) {
        self.config.fallback = fallback;
    }

    /// Processes one block of channel 0.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        self.process_channel(0, input, output)
    }

    /// Processes one block of channel `ch`.
    ///
    /// On error no state is modified.
    pub fn process_channel(
        &mut self,
        ch: usize,
        input: &[Sample],
        output: &mut [Sample],
    ) -> Result<()> {
        if ch >= self.channels.len() {
            return Err(HarmonizerError::InvalidChannels(ch as u16));
        }
        if input.len() != output.len() {
            return Err(HarmonizerError::LengthMismatch {
                input: input.len(),
                output: output.len(),
            });
        }
        if input.len() > self.config.max_block_size {
            return Err(HarmonizerError::BlockTooLarge {
                provided: input.len(),
                maximum: self.config.max_block_size,
            });
        }
        if input.iter().any(|s| !s.is_finite()) {
            return Err(HarmonizerError::InvalidInput(
                "input contains NaN or infinite samples".to_string(),
            ));
        }
        if input.is_empty() {
            return Ok(());
        }

        let voice_count = self.config.voice_count;
        let fallback = self.config.fallback;
        let voice_params = self.config.voices;
        let mut ratios = [1.0f64; MAX_VOICES];
        for (i, r) in ratios.iter_mut().enumerate() {
            *r = self.resolver.ratio(voice_params[i].semitones, i, voice_count);
        }

        let ChannelState { analyzer, voices } = &mut self.channels[ch];
        let out_start: AbsIndex = analyzer.write_abs();
        let out_end = out_start + input.len() as AbsIndex;
        analyzer.analyze_block(input);
        let view = analyzer.view();

        output.fill(0.0);
        let n = input.len();
        for (i, slot) in voices.iter_mut().enumerate() {
            let params = voice_params[i];
            let outcome = if i >= voice_count || params.volume == 0.0 {
                slot.synth.suspend(out_end);
                VoiceOutcome::Silent(SilenceReason::Bypassed)
            } else {
                slot.synth
                    .render(ratios[i], view, &mut slot.scratch[..n], out_start)
            };

            match outcome {
                VoiceOutcome::Rendered => {
                    for (o, &v) in output.iter_mut().zip(slot.scratch[..n].iter()) {
                        *o += params.volume * v;
                    }
                }
                VoiceOutcome::Silent(SilenceReason::Unpitched)
                | VoiceOutcome::Silent(SilenceReason::EpochStarvation)
                    if fallback == FallbackPolicy::Dry =>
                {
                    for (o, &x) in output.iter_mut().zip(input.iter()) {
                        *o += params.volume * x;
                    }
                }
                VoiceOutcome::Silent(_) => {}
            }

            if outcome != slot.outcome {
                debug!(
                    "channel {} voice {}: {:?} -> {:?} at {}",
                    ch, i, slot.outcome, outcome, out_start
                );
                slot.outcome = outcome;
            }
        }

        for s in output.iter_mut() {
            *s = flush(s.clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT));
        }
        Ok(())
    }

    /// Processes one block of interleaved frames across every channel.
    pub fn process_interleaved(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        let nc = self.channels.len();
        if input.len() != output.len() {
            return Err(HarmonizerError::LengthMismatch {
                input: input.len(),
                output: output.len(),
            });
        }
        if input.len() % nc != 0 {
            return Err(HarmonizerError::InvalidInput(format!(
                "{} samples is not a multiple of {} channels",
                input.len(),
                nc
            )));
        }
        let frames = input.len() / nc;
        if frames > self.config.max_block_size {
            return Err(HarmonizerError::BlockTooLarge {
                provided: frames,
                maximum: self.config.max_block_size,
            });
        }
        if input.iter().any(|s| !s.is_finite()) {
            return Err(HarmonizerError::InvalidInput(
                "input contains NaN or infinite samples".to_string(),
            ));
        }

        for ch in 0..nc {
            for (f, s) in self.split_in[ch][..frames].iter_mut().enumerate() {
                *s = input[f * nc + ch];
            }
        }
        let mut split_in = std::mem::take(&mut self.split_in);
        let mut split_out = std::mem::take(&mut self.split_out);
        let mut result = Ok(());
        for ch in 0..nc {
            result = self.process_channel(ch, &split_in[ch][..frames], &mut split_out[ch][..frames]);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            for ch in 0..nc {
                for (f, &s) in split_out[ch][..frames].iter().enumerate() {
                    output[f * nc + ch] = s;
                }
            }
        }
        std::mem::swap(&mut self.split_in, &mut split_in);
        std::mem::swap(&mut self.split_out, &mut split_out);
        result
    }

    /// Confidence of the last analysed block on `ch`.
    pub fn pitch_confidence(&self, ch: usize) -> Option<f64> {
        self.channels
            .get(ch)
            .map(|c| c.analyzer.last_estimate().confidence)
    }

    /// Smoothed pitch period on `ch`, in samples.
    pub fn period(&self, ch: usize) -> Option<f64> {
        self.channels.get(ch).map(|c| c.analyzer.last_estimate().period)
    }

    pub fn epochs(&self, ch: usize) -> Option<&EpochLog> {
        self.channels.get(ch).map(|c| c.analyzer.epochs())
    }

    pub fn epoch_count(&self, ch: usize) -> Option<usize> {
        self.epochs(ch).map(|e| e.len())
    }

    pub fn epoch_log_version(&self, ch: usize) -> Option<u64> {
        self.epochs(ch).map(|e| e.version())
    }

    pub fn voice(&self, ch: usize, index: usize) -> Option<&PsolaVoice> {
        self.channels
            .get(ch)
            .and_then(|c| c.voices.get(index))
            .map(|v| &v.synth)
    }

    pub fn voice_outcome(&self, ch: usize, index: usize) -> Option<VoiceOutcome> {
        self.channels
            .get(ch)
            .and_then(|c| c.voices.get(index))
            .map(|v| v.outcome)
    }

    pub fn voice_rms_envelope(&self, ch: usize, index: usize) -> Option<f64> {
        self.voice(ch, index).map(|v| v.rms_envelope())
    }

    /// Shift voice `index` actually plays under the current scale and voice count.
    pub fn resolved_semitones(&self, index: usize) -> Option<i32> {
        let params = self.config.voices.get(index)?;
        Some(
            self.resolver
                .resolve(params.semitones, index, self.config.voice_count),
        )
    }

    /// Nominal input-to-output delay of channel 0, voice 0, in samples.
    pub fn latency_samples(&self) -> f64 {
        self.voice(0, 0).map_or(0.0, |v| v.latency_samples())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_block(freq: f64, sr: f64, start: usize, len: usize) -> Vec<f32> {
        (start..start + len)
            .map(|n| (0.5 * (2.0 * PI * freq * n as f64 / sr).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_rejects_bad_blocks_without_side_effects() {
        let mut engine = Harmonizer::new(HarmonizerConfig::default()).unwrap();
        let input = vec![0.1f32; 600];
        let mut output = vec![0.0f32; 600];
        assert!(matches!(
            engine.process(&input, &mut output),
            Err(HarmonizerError::BlockTooLarge {
                provided: 600,
                maximum: 512
            })
        ));
        let mut short = vec![0.0f32; 10];
        assert!(matches!(
            engine.process(&input[..11], &mut short),
            Err(HarmonizerError::LengthMismatch { .. })
        ));
        let mut bad = vec![0.0f32; 4];
        bad[2] = f32::NAN;
        let mut out4 = vec![0.0f32; 4];
        assert!(engine.process(&bad, &mut out4).is_err());
        assert!(engine.process_channel(1, &input[..4], &mut out4).is_err());
        assert_eq!(engine.epoch_log_version(0), Some(0));
        assert_eq!(engine.channels[0].analyzer.write_abs(), 0);
    }

    #[test]
    fn test_parameter_updates() {
        let mut engine = Harmonizer::new(HarmonizerConfig::default()).unwrap();
        assert!(engine.set_voice(4, 0, 1.0).is_err());
        assert!(engine.set_voice(0, 0, f32::NAN).is_err());
        assert!(engine.set_scale(10, 0).is_err());
        assert!(engine.set_scale(0, 12).is_err());
        assert!(engine.set_voice_count(0).is_err());

        engine.set_scale(0, 0).unwrap();
        engine.set_voice(0, 3, 1.0).unwrap();
        assert_eq!(engine.resolved_semitones(0), Some(4));
        engine.set_voice_count(2).unwrap();
        engine.set_voice(1, 0, 1.0).unwrap();
        assert_eq!(engine.resolved_semitones(1), Some(4));
        assert_eq!(engine.config().scale, ScaleKind::Major);
    }

    #[test]
    fn test_bypassed_voices_report_bypassed() {
        let config = HarmonizerConfig::default()
            .with_voice_count(2)
            .with_voice(1, 7, 0.0);
        let mut engine = Harmonizer::new(config).unwrap();
        let mut out = vec![0.0f32; 512];
        for b in 0..16 {
            let input = sine_block(220.0, 48_000.0, b * 512, 512);
            engine.process(&input, &mut out).unwrap();
        }
        assert_eq!(engine.voice_outcome(0, 0), Some(VoiceOutcome::Rendered));
        assert_eq!(
            engine.voice_outcome(0, 1),
            Some(VoiceOutcome::Silent(SilenceReason::Bypassed))
        );
        assert_eq!(
            engine.voice_outcome(0, 3),
            Some(VoiceOutcome::Silent(SilenceReason::Bypassed))
        );
        assert!(engine.epoch_count(0).unwrap() > 4);
        assert!(engine.latency_samples() > 0.0);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut engine = Harmonizer::new(HarmonizerConfig::default()).unwrap();
        let mut out = vec![0.0f32; 512];
        for b in 0..12 {
            let input = sine_block(330.0, 48_000.0, b * 512, 512);
            engine.process(&input, &mut out).unwrap();
        }
        assert!(engine.epoch_count(0).unwrap() > 0);
        engine.reset();
        assert_eq!(engine.epoch_count(0), Some(0));
        assert_eq!(engine.pitch_confidence(0), Some(0.0));
        assert!((engine.period(0).unwrap() - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_prepare_rejects_bad_rate() {
        let mut engine = Harmonizer::new(HarmonizerConfig::default()).unwrap();
        assert!(engine.prepare(0.0, 512).is_err());
        assert!(engine.prepare(44_100.0, 0).is_err());
        engine.prepare(44_100.0, 256).unwrap();
        assert_eq!(engine.config().sample_rate, 44_100.0);
        assert_eq!(engine.config().max_block_size, 256);
    }

    #[test]
    fn test_interleaved_channels_are_independent() {
        let config = HarmonizerConfig::default().with_channels(2);
        let mut engine = Harmonizer::new(config).unwrap();
        let mut out = vec![0.0f32; 1024];
        for b in 0..20 {
            let left = sine_block(200.0, 48_000.0, b * 512, 512);
            let mut input = vec![0.0f32; 1024];
            for (f, &l) in left.iter().enumerate() {
                input[2 * f] = l;
            }
            engine.process_interleaved(&input, &mut out).unwrap();
        }
        assert!(engine.pitch_confidence(0).unwrap() > 0.9);
        assert_eq!(engine.pitch_confidence(1), Some(0.0));
        assert_eq!(engine.epoch_count(1), Some(0));
        assert!(out.iter().skip(1).step_by(2).all(|&s| s == 0.0));
        assert!(out.iter().step_by(2).any(|&s| s.abs() > 0.1));
    }
}
