//! Scale tables and pitch-class quantization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarmonizerError;

/// Musical scales, in index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    Major,
    NaturalMinor,
    Dorian,
    Mixolydian,
    HarmonicMinor,
    MelodicMinor,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
    Chromatic,
}

const MAJOR: &[u8] = &[0, 2, 4, 5, 7, 9, 11];
const NATURAL_MINOR: &[u8] = &[0, 2, 3, 5, 7, 8, 10];
const DORIAN: &[u8] = &[0, 2, 3, 5, 7, 9, 10];
const MIXOLYDIAN: &[u8] = &[0, 2, 4, 5, 7, 9, 10];
const HARMONIC_MINOR: &[u8] = &[0, 2, 3, 5, 7, 8, 11];
const MELODIC_MINOR: &[u8] = &[0, 2, 3, 5, 7, 9, 11];
const PENTATONIC_MAJOR: &[u8] = &[0, 2, 4, 7, 9];
const PENTATONIC_MINOR: &[u8] = &[0, 3, 5, 7, 10];
const BLUES: &[u8] = &[0, 3, 5, 6, 7, 10];
const CHROMATIC: &[u8] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

impl ScaleKind {
    /// All scales in index order.
    pub const ALL: [ScaleKind; 10] = [
        ScaleKind::Major,
        ScaleKind::NaturalMinor,
        ScaleKind::Dorian,
        ScaleKind::Mixolydian,
        ScaleKind::HarmonicMinor,
        ScaleKind::MelodicMinor,
        ScaleKind::PentatonicMajor,
        ScaleKind::PentatonicMinor,
        ScaleKind::Blues,
        ScaleKind::Chromatic,
    ];

    /// Scale at `index` in [`ScaleKind::ALL`].
    pub fn from_index(index: usize) -> Result<Self, HarmonizerError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(HarmonizerError::InvalidScale(index))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Semitone offsets from the root, ascending, starting at 0.
    pub fn degrees(self) -> &'static [u8] {
        match self {
            ScaleKind::Major => MAJOR,
            ScaleKind::NaturalMinor => NATURAL_MINOR,
            ScaleKind::Dorian => DORIAN,
            ScaleKind::Mixolydian => MIXOLYDIAN,
            ScaleKind::HarmonicMinor => HARMONIC_MINOR,
            ScaleKind::MelodicMinor => MELODIC_MINOR,
            ScaleKind::PentatonicMajor => PENTATONIC_MAJOR,
            ScaleKind::PentatonicMinor => PENTATONIC_MINOR,
            ScaleKind::Blues => BLUES,
            ScaleKind::Chromatic => CHROMATIC,
        }
    }

    /// True if the scale has a major third above the root.
    pub fn has_major_third(self) -> bool {
        self.degrees().contains(&4)
    }

    /// True if `note` (MIDI number) belongs to the scale rooted at `root`.
    pub fn contains(self, note: i32, root: u8) -> bool {
        let pc = (note - root as i32).rem_euclid(12) as u8;
        self.degrees().contains(&pc)
    }

    /// Replaces the pitch class of `note` with the nearest scale degree,
    /// keeping its octave.
    ///
    /// Nearness is measured around the pitch-class circle, but the octave is
    /// not carried: B in a scale whose nearest degree is C becomes the C at
    /// the bottom of the same octave. Equidistant degrees resolve upward.
    pub fn quantize(self, note: i32, root: u8) -> i32 {
        let pc = (note - root as i32).rem_euclid(12);
        let mut best: Option<(i32, i32)> = None;
        for &d in self.degrees() {
            let d = d as i32;
            // Signed circular distance from pc to d, in -5..=6.
            let mut delta = (d - pc).rem_euclid(12);
            if delta > 6 {
                delta -= 12;
            }
            let better = match best {
                None => true,
                Some((best_delta, _)) => {
                    delta.abs() < best_delta.abs()
                        || (delta.abs() == best_delta.abs() && delta > best_delta)
                }
            };
            if better {
                best = Some((delta, d));
            }
        }
        match best {
            Some((_, degree)) => note - pc + degree,
            None => note,
        }
    }

    /// Lower-case name as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            ScaleKind::Major => "major",
            ScaleKind::NaturalMinor => "natural_minor",
            ScaleKind::Dorian => "dorian",
            ScaleKind::Mixolydian => "mixolydian",
            ScaleKind::HarmonicMinor => "harmonic_minor",
            ScaleKind::MelodicMinor => "melodic_minor",
            ScaleKind::PentatonicMajor => "pentatonic_major",
            ScaleKind::PentatonicMinor => "pentatonic_minor",
            ScaleKind::Blues => "blues",
            ScaleKind::Chromatic => "chromatic",
        }
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleKind {
    type Err = HarmonizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let alias = match key.as_str() {
            "minor" => "natural_minor",
            "ionian" => "major",
            "aeolian" => "natural_minor",
            other => other,
        };
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == alias)
            .ok_or_else(|| HarmonizerError::InvalidInput(format!("unknown scale '{}'", s)))
    }
}

/// Parses a root key given as a pitch name (`C`, `F#`, `Bb`) or a number `0..12`.
pub fn parse_root_key(s: &str) -> Result<u8, HarmonizerError> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u8>() {
        return if n < 12 {
            Ok(n)
        } else {
            Err(HarmonizerError::InvalidRootKey(n))
        };
    }
    let mut chars = s.chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(HarmonizerError::InvalidInput(format!("unknown key '{}'", s))),
    };
    let accidental: i32 = match chars.as_str() {
        "" => 0,
        "#" | "s" | "sharp" => 1,
        "b" | "flat" => -1,
        _ => return Err(HarmonizerError::InvalidInput(format!("unknown key '{}'", s))),
    };
    Ok((base + accidental).rem_euclid(12) as u8)
}
