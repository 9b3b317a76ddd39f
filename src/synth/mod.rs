//! TD-PSOLA grain synthesis.

pub mod params;
pub mod psola;

pub use params::SynthParams;
pub use psola::{PsolaVoice, SilenceReason, VoiceOutcome};
