//! Scales and harmony interval resolution.

pub mod interval;
pub mod scale;

pub use interval::{semitones_to_ratio, IntervalResolver};
pub use scale::{parse_root_key, ScaleKind};
