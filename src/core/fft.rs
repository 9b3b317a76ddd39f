//! FFT-related constants shared by the analysis code.

use rustfft::num_complex::Complex;

/// Zero-valued complex number, used for FFT buffer initialization.
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Energies below this are treated as silence in normalized correlations.
pub const ENERGY_EPSILON: f64 = 1e-12;

/// Smallest power-of-two FFT length that holds a linear (non-circular)
/// autocorrelation of `window_len` samples.
#[inline]
pub fn autocorr_fft_len(window_len: usize) -> usize {
    (2 * window_len).max(2).next_power_of_two()
}
