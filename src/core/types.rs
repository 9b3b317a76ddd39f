use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarmonizerError, Result};
use crate::harmony::scale::ScaleKind;

/// A single audio sample (32-bit float, nominal range -1.0 to 1.0).
pub type Sample = f32;

/// Absolute sample position since the last reset.
///
/// Written samples always have non-negative indices; signed arithmetic keeps
/// "n samples before the write head" computations free of underflow checks.
pub type AbsIndex = i64;

/// Maximum number of harmony voices.
pub const MAX_VOICES: usize = 4;

/// Maximum number of channels processed by one harmonizer.
pub const MAX_CHANNELS: u16 = 8;

/// Supported sample-rate range in Hz.
pub const MIN_SAMPLE_RATE: f64 = 8_000.0;
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;

/// Largest block a host may submit per call.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Buffer holding audio samples in interleaved format.
///
/// For mono audio, samples are stored sequentially: `[s0, s1, s2, ...]`
/// For stereo audio, samples are interleaved: `[L0, R0, L1, R1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw interleaved sample data.
    pub data: Vec<Sample>,
    /// Number of channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer.
    ///
    /// # Errors
    /// Returns `HarmonizerError::InvalidChannels` if channels is 0 or above
    /// [`MAX_CHANNELS`], `HarmonizerError::InvalidSampleRate` if the rate is 0,
    /// and `HarmonizerError::InvalidInput` if the data length is not a whole
    /// number of frames.
    pub fn new(data: Vec<Sample>, channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(HarmonizerError::InvalidChannels(channels));
        }
        if sample_rate == 0 {
            return Err(HarmonizerError::InvalidSampleRate(0.0));
        }
        if data.len() % channels as usize != 0 {
            return Err(HarmonizerError::InvalidInput(format!(
                "{} samples is not a multiple of {} channels",
                data.len(),
                channels
            )));
        }
        Ok(Self {
            data,
            channels,
            sample_rate,
        })
    }

    /// Number of frames in the buffer (total samples / channels).
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.channels.max(1) as usize
    }

    /// Duration in seconds.
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate.max(1) as f64
    }

    /// Returns true if the buffer holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Extracts one channel as a contiguous vector.
    pub fn channel_data(&self, channel: u16) -> Vec<Sample> {
        let nc = self.channels as usize;
        self.data
            .iter()
            .skip(channel as usize)
            .step_by(nc.max(1))
            .copied()
            .collect()
    }
}

/// What a voice emits while it cannot synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// The voice contributes silence.
    #[default]
    Silence,
    /// The voice contributes the unshifted input, scaled by its volume.
    Dry,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = HarmonizerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silence" => Ok(FallbackPolicy::Silence),
            "dry" => Ok(FallbackPolicy::Dry),
            other => Err(HarmonizerError::InvalidInput(format!(
                "unknown fallback policy '{}'",
                other
            ))),
        }
    }
}

/// Per-voice control values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    /// Requested shift in semitones before scale quantization.
    pub semitones: i32,
    /// Linear output gain; 0 bypasses the voice.
    pub volume: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            semitones: 0,
            volume: 1.0,
        }
    }
}

impl VoiceParams {
    pub fn new(semitones: i32, volume: f32) -> Self {
        Self { semitones, volume }
    }
}

/// Configuration for a [`Harmonizer`](crate::Harmonizer).
///
/// # Example
///
/// ```
/// use harmonizer::{HarmonizerConfig, ScaleKind};
///
/// let config = HarmonizerConfig::new(48_000.0)
///     .with_max_block_size(256)
///     .with_voice_count(2)
///     .with_scale(ScaleKind::Major, 0)
///     .with_voice(0, 4, 0.8)
///     .with_voice(1, 7, 0.6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonizerConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Largest block the host will submit per channel.
    pub max_block_size: usize,
    /// Number of independently analysed channels.
    pub channels: u16,
    /// Number of active voices (1 to 4).
    pub voice_count: usize,
    /// Scale used to quantize harmony intervals.
    pub scale: ScaleKind,
    /// Root key of the scale, 0 = C through 11 = B.
    pub root_key: u8,
    /// Voice parameters; entries at or above `voice_count` are bypassed.
    pub voices: [VoiceParams; MAX_VOICES],
    /// Output of voices that cannot synthesize.
    pub fallback: FallbackPolicy,
    /// Number of recent epoch distances used for the reference period median.
    pub ref_period_span: usize,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block_size: 512,
            channels: 1,
            voice_count: 1,
            scale: ScaleKind::Chromatic,
            root_key: 0,
            voices: [VoiceParams::default(); MAX_VOICES],
            fallback: FallbackPolicy::Silence,
            ref_period_span: 15,
        }
    }
}

impl HarmonizerConfig {
    /// Creates a default configuration at the given sample rate.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_voice_count(mut self, voice_count: usize) -> Self {
        self.voice_count = voice_count;
        self
    }

    pub fn with_scale(mut self, scale: ScaleKind, root_key: u8) -> Self {
        self.scale = scale;
        self.root_key = root_key;
        self
    }

    /// Sets one voice's parameters. Indices past [`MAX_VOICES`] are ignored
    /// here and rejected by [`validate`](Self::validate) callers that use
    /// [`Harmonizer::set_voice`](crate::Harmonizer::set_voice).
    pub fn with_voice(mut self, index: usize, semitones: i32, volume: f32) -> Self {
        if let Some(v) = self.voices.get_mut(index) {
            *v = VoiceParams::new(semitones, volume);
        }
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_ref_period_span(mut self, span: usize) -> Self {
        self.ref_period_span = span;
        self
    }

    /// Checks every field against its supported range.
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite()
            || self.sample_rate < MIN_SAMPLE_RATE
            || self.sample_rate > MAX_SAMPLE_RATE
        {
            return Err(HarmonizerError::InvalidSampleRate(self.sample_rate));
        }
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE {
            return Err(HarmonizerError::InvalidBlockSize(self.max_block_size));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(HarmonizerError::InvalidChannels(self.channels));
        }
        if self.voice_count == 0 || self.voice_count > MAX_VOICES {
            return Err(HarmonizerError::InvalidVoice {
                index: self.voice_count,
                count: MAX_VOICES,
            });
        }
        if self.root_key >= 12 {
            return Err(HarmonizerError::InvalidRootKey(self.root_key));
        }
        for (i, v) in self.voices.iter().enumerate() {
            if !v.volume.is_finite() || v.volume < 0.0 {
                return Err(HarmonizerError::InvalidInput(format!(
                    "voice {} volume must be finite and non-negative, got {}",
                    i, v.volume
                )));
            }
        }
        if self.ref_period_span == 0 || self.ref_period_span > 256 {
            return Err(HarmonizerError::InvalidInput(format!(
                "ref_period_span must be in 1..=256, got {}",
                self.ref_period_span
            )));
        }
        Ok(())
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarmonizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.voice_count, 1);
        assert_eq!(config.ref_period_span, 15);
        assert_eq!(config.fallback, FallbackPolicy::Silence);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(matches!(
            HarmonizerConfig::new(1000.0).validate(),
            Err(HarmonizerError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            HarmonizerConfig::new(f64::NAN).validate(),
            Err(HarmonizerError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            HarmonizerConfig::default().with_max_block_size(0).validate(),
            Err(HarmonizerError::InvalidBlockSize(0))
        ));
        assert!(matches!(
            HarmonizerConfig::default().with_voice_count(5).validate(),
            Err(HarmonizerError::InvalidVoice { .. })
        ));
        assert!(matches!(
            HarmonizerConfig::default()
                .with_scale(ScaleKind::Major, 12)
                .validate(),
            Err(HarmonizerError::InvalidRootKey(12))
        ));
        assert!(HarmonizerConfig::default()
            .with_voice(0, 0, -1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let config = HarmonizerConfig::new(44_100.0)
            .with_voice_count(3)
            .with_scale(ScaleKind::Dorian, 2)
            .with_voice(2, -5, 0.25)
            .with_fallback(FallbackPolicy::Dry);
        let json = config.to_json_string().unwrap();
        let parsed = HarmonizerConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial = HarmonizerConfig::from_json_str(r#"{"voice_count": 2}"#).unwrap();
        assert_eq!(partial.voice_count, 2);
        assert_eq!(partial.sample_rate, 48_000.0);
    }

    #[test]
    fn test_fallback_from_str() {
        assert_eq!("dry".parse::<FallbackPolicy>().unwrap(), FallbackPolicy::Dry);
        assert_eq!(
            "Silence".parse::<FallbackPolicy>().unwrap(),
            FallbackPolicy::Silence
        );
        assert!("loud".parse::<FallbackPolicy>().is_err());
    }

    #[test]
    fn test_audio_buffer_channel_data() {
        let buf = AudioBuffer::new(vec![1.0, -1.0, 2.0, -2.0], 2, 48_000).unwrap();
        assert_eq!(buf.num_frames(), 2);
        assert_eq!(buf.channel_data(1), vec![-1.0, -2.0]);
        assert!(AudioBuffer::new(vec![0.0; 3], 2, 48_000).is_err());
    }
}
