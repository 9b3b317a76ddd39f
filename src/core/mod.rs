//! Core types, input history, windows and numeric helpers.

pub mod denormal;
pub mod fft;
pub mod ring_history;
pub mod types;
pub mod window;

pub use ring_history::RingHistory;
pub use types::*;
pub use window::fill_hann;
