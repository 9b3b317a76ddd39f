//! Error types for the harmonizer crate.

use thiserror::Error;

/// Errors reported by configuration, preparation and processing entry points.
///
/// Degenerate runtime conditions (unpitched input, too few epochs, a bad
/// pitch ratio) are not errors; they surface as
/// [`VoiceOutcome::Silent`](crate::synth::psola::VoiceOutcome) and produce
/// silence for the affected voice.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarmonizerError {
    /// Sample rate outside the supported range or not finite.
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),
    /// Maximum block size of zero or above the supported bound.
    #[error("invalid block size: {0}")]
    InvalidBlockSize(usize),
    /// Channel count of zero or above the supported bound.
    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),
    /// Voice index or voice count out of range.
    #[error("invalid voice {index}: {count} voices available")]
    InvalidVoice { index: usize, count: usize },
    /// Scale index outside the scale table.
    #[error("invalid scale index: {0}")]
    InvalidScale(usize),
    /// Root key outside `0..12`.
    #[error("invalid root key: {0}")]
    InvalidRootKey(u8),
    /// A block longer than the prepared maximum was submitted.
    #[error("block too large: {provided} frames provided, {maximum} allowed")]
    BlockTooLarge { provided: usize, maximum: usize },
    /// Input and output slices differ in length.
    #[error("length mismatch: input {input}, output {output}")]
    LengthMismatch { input: usize, output: usize },
    /// Any other malformed argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// File or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
    /// Configuration could not be parsed or serialized.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarmonizerError>;

impl From<std::io::Error> for HarmonizerError {
    fn from(err: std::io::Error) -> Self {
        HarmonizerError::Io(err.to_string())
    }
}

impl From<hound::Error> for HarmonizerError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => HarmonizerError::Io(e.to_string()),
            other => HarmonizerError::InvalidInput(format!("WAV: {}", other)),
        }
    }
}

impl From<serde_json::Error> for HarmonizerError {
    fn from(err: serde_json::Error) -> Self {
        HarmonizerError::Config(err.to_string())
    }
}
