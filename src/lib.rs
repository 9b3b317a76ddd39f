#![forbid(unsafe_code)]
//! Real-time polyphonic harmonizer built on TD-PSOLA.
//!
//! `harmonizer` tracks the pitch of a monophonic input, marks one epoch per
//! pitch period, and renders up to four harmony voices by re-spacing
//! Hann-windowed grains taken around those epochs. Voice intervals can be
//! quantized to one of ten scales, with chord-tone offsets added
//! automatically when several voices are active.
//!
//! # Quick Start
//!
//! ```
//! use harmonizer::{HarmonizerConfig, ScaleKind};
//!
//! // 1 second of 220 Hz sine at 48 kHz
//! let input: Vec<f32> = (0..48_000)
//!     .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 48_000.0).sin())
//!     .collect();
//!
//! let config = HarmonizerConfig::new(48_000.0)
//!     .with_scale(ScaleKind::Major, 9)
//!     .with_voice(0, 3, 1.0);
//!
//! let output = harmonizer::harmonize(&input, &config).unwrap();
//! assert_eq!(output.len(), input.len());
//! ```
//!
//! # Streaming
//!
//! For real-time use, create a [`Harmonizer`] once and feed it blocks no
//! longer than `max_block_size`:
//!
//! ```
//! use harmonizer::{Harmonizer, HarmonizerConfig};
//!
//! let mut engine = Harmonizer::new(HarmonizerConfig::new(44_100.0)).unwrap();
//! let block = vec![0.0f32; 512];
//! let mut out = vec![0.0f32; 512];
//! engine.process(&block, &mut out).unwrap();
//! // engine.set_voice(0, 7, 0.8) between blocks to change the interval
//! ```

pub mod analysis;
pub mod core;
pub mod engine;
pub mod error;
pub mod harmony;
pub mod io;
pub mod synth;

pub use analysis::epoch::{Epoch, EpochLog};
pub use core::types::{
    AbsIndex, AudioBuffer, FallbackPolicy, HarmonizerConfig, Sample, VoiceParams, MAX_VOICES,
};
pub use engine::Harmonizer;
pub use error::{HarmonizerError, Result};
pub use harmony::interval::{semitones_to_ratio, IntervalResolver};
pub use harmony::scale::ScaleKind;
pub use synth::psola::{PsolaVoice, SilenceReason, VoiceOutcome};

/// Runs interleaved `input` through a freshly prepared engine.
///
/// The input is processed in blocks of `config.max_block_size` frames using
/// `config.channels` channels. The output has the same length as the input.
pub fn harmonize(input: &[f32], config: &HarmonizerConfig) -> Result<Vec<f32>> {
    let mut engine = Harmonizer::new(config.clone())?;
    let nc = config.channels as usize;
    if input.len() % nc != 0 {
        return Err(HarmonizerError::InvalidInput(format!(
            "{} samples is not a multiple of {} channels",
            input.len(),
            nc
        )));
    }

    let mut output = vec![0.0f32; input.len()];
    let chunk = config.max_block_size * nc;
    for (inp, out) in input.chunks(chunk).zip(output.chunks_mut(chunk)) {
        if nc == 1 {
            engine.process(inp, out)?;
        } else {
            engine.process_interleaved(inp, out)?;
        }
    }
    Ok(output)
}

/// Harmonizes an [`AudioBuffer`], taking sample rate and channel count from
/// the buffer rather than the config.
pub fn harmonize_buffer(buffer: &AudioBuffer, config: &HarmonizerConfig) -> Result<AudioBuffer> {
    let effective = config
        .clone()
        .with_sample_rate(buffer.sample_rate as f64)
        .with_channels(buffer.channels);
    let data = harmonize(&buffer.data, &effective)?;
    AudioBuffer::new(data, buffer.channels, buffer.sample_rate)
}
