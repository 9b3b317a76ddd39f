//! Input analysis: pitch estimation and epoch marking.

pub mod analyzer;
pub mod epoch;
pub mod pitch;

pub use analyzer::{AnalysisView, BlockAnalysis, ChannelAnalyzer};
pub use epoch::{Epoch, EpochLog, EpochMarker};
pub use pitch::{PitchEstimate, PitchEstimator};
