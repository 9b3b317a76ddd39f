//! Hann windows for variable-length synthesis grains.
//!
//! Grain lengths change from epoch to epoch, so windows are filled into
//! preallocated scratch instead of being cached per size.

use std::f64::consts::PI;

/// Fills `out` with a symmetric Hann window and returns the sum of squared
/// coefficients (the window energy).
///
/// Sizes 0 and 1 are degenerate: an empty window and a single unit tap.
pub fn fill_hann(out: &mut [f32]) -> f64 {
    match out.len() {
        0 => return 0.0,
        1 => {
            out[0] = 1.0;
            return 1.0;
        }
        _ => {}
    }
    let denom = (out.len() - 1) as f64;
    let mut energy = 0.0;
    for (i, w) in out.iter_mut().enumerate() {
        let x = (2.0 * PI * i as f64) / denom;
        let v = 0.5 * (1.0 - x.cos());
        *w = v as f32;
        energy += v * v;
    }
    energy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hann_window(size: usize) -> Vec<f32> {
        let mut w = vec![0.0; size];
        fill_hann(&mut w);
        w
    }

    #[test]
    fn test_hann_shape() {
        let w = hann_window(9);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-7);
        for i in 0..9 {
            assert!((w[i] - w[8 - i]).abs() < 1e-7, "not symmetric at {}", i);
        }
    }

    #[test]
    fn test_trivial_sizes() {
        let mut empty: [f32; 0] = [];
        assert_eq!(fill_hann(&mut empty), 0.0);
        let mut one = [0.0f32];
        assert_eq!(fill_hann(&mut one), 1.0);
        assert_eq!(one[0], 1.0);
    }

    #[test]
    fn test_energy_matches_coefficients() {
        let mut w = vec![0.0f32; 101];
        let e = fill_hann(&mut w);
        let direct: f64 = w.iter().map(|&v| (v as f64) * (v as f64)).sum();
        assert!((e - direct).abs() < 1e-4);
        // Hann energy approaches 3/8 of the length.
        assert!((e / 100.0 - 0.375).abs() < 0.01);
    }

    #[test]
    fn test_overlap_add_at_half_length_is_flat() {
        // Length 2h+1 windows spaced by h sum to one.
        let h = 50;
        let w = hann_window(2 * h + 1);
        for t in 0..h {
            let sum = w[t] + w[t + h];
            assert!((sum - 1.0).abs() < 1e-6, "t={} sum={}", t, sum);
        }
    }
}
