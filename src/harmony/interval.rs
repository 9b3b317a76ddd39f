//! Maps a voice's requested shift to the semitone offset it actually plays.

use super::scale::ScaleKind;
use crate::error::{HarmonizerError, Result};

/// Resolved shifts are clamped to this many semitones either way.
pub const SEMITONE_LIMIT: i32 = 36;

/// Reference pitch the interval is quantized around (middle C).
pub const REFERENCE_NOTE: i32 = 60;

/// Chord-tone offsets added per voice when more than one voice is active.
const MAJOR_CHORD: [i32; 4] = [0, 4, 7, 11];
const MINOR_CHORD: [i32; 4] = [0, 3, 7, 10];

/// Scale-aware interval resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalResolver {
    scale: ScaleKind,
    root: u8,
}

impl IntervalResolver {
    pub fn new(scale: ScaleKind, root: u8) -> Result<Self> {
        if root >= 12 {
            return Err(HarmonizerError::InvalidRootKey(root));
        }
        Ok(Self { scale, root })
    }

    #[inline]
    pub fn scale(&self) -> ScaleKind {
        self.scale
    }

    #[inline]
    pub fn root(&self) -> u8 {
        self.root
    }

    /// Chord-tone offset for `voice_index`; zero for a single voice.
    pub fn harmony_offset(&self, voice_index: usize, voice_count: usize) -> i32 {
        if voice_count <= 1 {
            return 0;
        }
        let chord = if self.scale.has_major_third() {
            &MAJOR_CHORD
        } else {
            &MINOR_CHORD
        };
        chord.get(voice_index).copied().unwrap_or(0)
    }

    /// Semitone shift for a voice after harmony offset, scale quantization
    /// and clamping.
    pub fn resolve(&self, base_semitones: i32, voice_index: usize, voice_count: usize) -> i32 {
        let requested = base_semitones.saturating_add(self.harmony_offset(voice_index, voice_count));
        let note = REFERENCE_NOTE.saturating_add(requested);
        let quantized = self.scale.quantize(note, self.root) - REFERENCE_NOTE;
        quantized.clamp(-SEMITONE_LIMIT, SEMITONE_LIMIT)
    }

    /// Pitch ratio `2^(s/12)` for the resolved shift.
    pub fn ratio(&self, base_semitones: i32, voice_index: usize, voice_count: usize) -> f64 {
        semitones_to_ratio(self.resolve(base_semitones, voice_index, voice_count))
    }
}

/// Frequency ratio for a shift in semitones.
#[inline]
pub fn semitones_to_ratio(semitones: i32) -> f64 {
    (semitones as f64 / 12.0).exp2()
}
