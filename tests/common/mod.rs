#![allow(dead_code)]

use std::f64::consts::PI;

use harmonizer::{Harmonizer, HarmonizerConfig, HarmonizerError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

pub const SR: u32 = 48_000;

pub fn gen_sine<F>(freq_hz: f64, sr: u32, n: usize, amp_fn: F) -> Vec<f32>
where
    F: Fn(usize) -> f32,
{
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * freq_hz * i as f64 / sr as f64;
            amp_fn(i) * phase.sin() as f32
        })
        .collect()
}

/// Pulse-like tone: `harmonics` cosine partials at `1/k` amplitude, scaled
/// so the peak equals `amp`.
pub fn gen_harmonic(freq_hz: f64, sr: u32, n: usize, amp: f32, harmonics: usize) -> Vec<f32> {
    let norm: f64 = (1..=harmonics).map(|k| 1.0 / k as f64).sum();
    (0..n)
        .map(|i| {
            let t = i as f64 / sr as f64;
            let s: f64 = (1..=harmonics)
                .map(|k| (2.0 * PI * k as f64 * freq_hz * t).cos() / k as f64)
                .sum();
            (amp as f64 * s / norm) as f32
        })
        .collect()
}

/// Sine whose frequency moves linearly from `f_start` to `f_end`.
pub fn gen_glide(f_start: f64, f_end: f64, sr: u32, n: usize, amp: f32) -> Vec<f32> {
    let mut phase = 0.0f64;
    (0..n)
        .map(|i| {
            let f = f_start + (f_end - f_start) * i as f64 / n.max(1) as f64;
            let v = amp * phase.sin() as f32;
            phase += 2.0 * PI * f / sr as f64;
            v
        })
        .collect()
}

/// Uniform white noise in `[-amp, amp]`.
pub fn gen_noise(n: usize, amp: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-amp..=amp)).collect()
}

pub fn windowed_rms(signal: &[f32], start: usize, len: usize) -> f64 {
    if signal.is_empty() || len == 0 {
        return 0.0;
    }
    let start = start.min(signal.len());
    let end = (start + len).min(signal.len());
    if end <= start {
        return 0.0;
    }
    let sum_sq: f64 = signal[start..end]
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    (sum_sq / (end - start) as f64).sqrt()
}

pub fn db(ratio: f64) -> f64 {
    20.0 * ratio.max(1e-300).log10()
}

/// Lag `l` maximizing the normalized correlation of `a[i]` with `b[i + l]`.
pub fn best_lag_crosscorr(a: &[f32], b: &[f32], max_lag: usize) -> isize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut best_lag = 0isize;
    let mut best_score = f64::NEG_INFINITY;

    for lag in -(max_lag as isize)..=(max_lag as isize) {
        let mut dot = 0.0f64;
        let mut a2 = 0.0f64;
        let mut b2 = 0.0f64;
        let mut n = 0usize;

        for (i, &av) in a.iter().enumerate() {
            let j = i as isize + lag;
            if j < 0 || j >= b.len() as isize {
                continue;
            }
            let av64 = av as f64;
            let bv64 = b[j as usize] as f64;
            dot += av64 * bv64;
            a2 += av64 * av64;
            b2 += bv64 * bv64;
            n += 1;
        }

        if n < 16 || a2 <= 0.0 || b2 <= 0.0 {
            continue;
        }
        let score = dot / (a2.sqrt() * b2.sqrt());
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    best_lag
}

pub fn rmse_with_lag(reference: &[f32], test: &[f32], lag: isize, start: usize, end: usize) -> f64 {
    if reference.is_empty() || test.is_empty() {
        return f64::INFINITY;
    }
    let end = end.min(reference.len());
    if end <= start {
        return f64::INFINITY;
    }

    let mut sum_sq = 0.0f64;
    let mut n = 0usize;
    for (i, &rv) in reference.iter().enumerate().take(end).skip(start) {
        let j = i as isize + lag;
        if j < 0 || j >= test.len() as isize {
            continue;
        }
        let diff = rv as f64 - test[j as usize] as f64;
        sum_sq += diff * diff;
        n += 1;
    }

    if n == 0 {
        f64::INFINITY
    } else {
        (sum_sq / n as f64).sqrt()
    }
}

/// Hann-windowed DFT magnitude of `signal` at `freq_hz`, in dB.
pub fn magnitude_db_at(signal: &[f32], sr: u32, freq_hz: f64) -> f64 {
    let n = signal.len();
    if n < 2 {
        return f64::NEG_INFINITY;
    }
    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (i, &s) in signal.iter().enumerate() {
        let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos();
        let angle = 2.0 * PI * freq_hz * i as f64 / sr as f64;
        let v = w * s as f64;
        re += v * angle.cos();
        im -= v * angle.sin();
    }
    db((re * re + im * im).sqrt() / n as f64)
}

/// Frequency of the strongest spectral peak above `min_hz`, refined by
/// parabolic interpolation on log magnitude.
pub fn dominant_frequency(signal: &[f32], sr: u32, min_hz: f64) -> f64 {
    let n = signal.len();
    let fft_len = (4 * n).next_power_of_two();
    let mut buf = vec![Complex::new(0.0f64, 0.0); fft_len];
    for (i, &s) in signal.iter().enumerate() {
        let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / (n.max(2) - 1) as f64).cos();
        buf[i] = Complex::new(w * s as f64, 0.0);
    }
    FftPlanner::new().plan_fft_forward(fft_len).process(&mut buf);

    let bin_hz = sr as f64 / fft_len as f64;
    let lo = ((min_hz / bin_hz).ceil() as usize).max(1);
    let hi = fft_len / 2 - 1;
    let mags: Vec<f64> = buf[..=hi + 1].iter().map(|c| c.norm().max(1e-30).ln()).collect();
    let mut best = lo;
    for k in lo..=hi {
        if mags[k] > mags[best] {
            best = k;
        }
    }
    let (a, b, c) = (mags[best - 1], mags[best], mags[best + 1]);
    let denom = a - 2.0 * b + c;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    (best as f64 + offset) * bin_hz
}

/// Fundamental frequency from normalized autocorrelation.
///
/// Takes the shortest lag in `sr / fmax ..= sr / fmin` whose correlation is
/// a local maximum within 10% of the best one, so multiples of the true
/// period are not mistaken for it.
pub fn autocorr_frequency(signal: &[f32], sr: u32, fmin: f64, fmax: f64) -> Option<f64> {
    let min_lag = (sr as f64 / fmax).floor().max(1.0) as usize;
    let max_lag = (sr as f64 / fmin).ceil() as usize;
    if signal.len() <= max_lag + 2 {
        return None;
    }
    let x: Vec<f64> = signal.iter().map(|&s| s as f64).collect();
    let corr = |lag: usize| -> f64 {
        let n = x.len() - lag;
        let (mut dot, mut e0, mut e1) = (0.0, 0.0, 0.0);
        for i in 0..n {
            dot += x[i] * x[i + lag];
            e0 += x[i] * x[i];
            e1 += x[i + lag] * x[i + lag];
        }
        let denom = (e0 * e1).sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    };
    let r: Vec<f64> = (min_lag - 1..=max_lag + 1).map(corr).collect();
    let best = r[1..r.len() - 1].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if best <= 0.0 {
        return None;
    }
    for i in 1..r.len() - 1 {
        if r[i] >= 0.9 * best && r[i] >= r[i - 1] && r[i] >= r[i + 1] {
            let denom = r[i - 1] - 2.0 * r[i] + r[i + 1];
            let offset = if denom.abs() > 1e-12 {
                (0.5 * (r[i - 1] - r[i + 1]) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            let lag = (min_lag - 1 + i) as f64 + offset;
            return Some(sr as f64 / lag);
        }
    }
    None
}

/// Residual of the best single-sinusoid fit, relative to the signal RMS,
/// in dB. The frequency is searched within `±span_hz` of `f_guess`.
pub fn sine_fit_residual_db(signal: &[f32], sr: u32, f_guess: f64, span_hz: f64) -> f64 {
    let n = signal.len();
    let total = windowed_rms(signal, 0, n);
    if total <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let steps = 200;
    let mut best = f64::INFINITY;
    for s in 0..=steps {
        let f = f_guess - span_hz + 2.0 * span_hz * s as f64 / steps as f64;
        best = best.min(fit_residual(signal, sr, f));
    }
    db(best / total)
}

/// RMS residual after least-squares fitting `a·cos + b·sin + c` at `freq`.
fn fit_residual(signal: &[f32], sr: u32, freq: f64) -> f64 {
    let w = 2.0 * PI * freq / sr as f64;
    // Normal equations for the basis (cos, sin, 1).
    let mut m = [[0.0f64; 3]; 3];
    let mut v = [0.0f64; 3];
    for (i, &s) in signal.iter().enumerate() {
        let basis = [(w * i as f64).cos(), (w * i as f64).sin(), 1.0];
        for r in 0..3 {
            for c in 0..3 {
                m[r][c] += basis[r] * basis[c];
            }
            v[r] += basis[r] * s as f64;
        }
    }
    let Some(coef) = solve3(m, v) else {
        return f64::INFINITY;
    };
    let mut sum_sq = 0.0f64;
    for (i, &s) in signal.iter().enumerate() {
        let fit = coef[0] * (w * i as f64).cos() + coef[1] * (w * i as f64).sin() + coef[2];
        let e = s as f64 - fit;
        sum_sq += e * e;
    }
    (sum_sq / signal.len().max(1) as f64).sqrt()
}

fn solve3(m: [[f64; 3]; 3], v: [f64; 3]) -> Option<[f64; 3]> {
    let det = |a: [[f64; 3]; 3]| -> f64 {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };
    let d = det(m);
    if d.abs() < 1e-12 {
        return None;
    }
    let mut out = [0.0; 3];
    for (col, o) in out.iter_mut().enumerate() {
        let mut a = m;
        for row in 0..3 {
            a[row][col] = v[row];
        }
        *o = det(a) / d;
    }
    Some(out)
}

/// Runs mono `input` through a fresh engine in blocks of `block` frames.
pub fn run_engine(
    input: &[f32],
    config: HarmonizerConfig,
    block: usize,
) -> Result<(Vec<f32>, Harmonizer), HarmonizerError> {
    let mut engine = Harmonizer::new(config)?;
    let mut output = vec![0.0f32; input.len()];
    for (inp, out) in input.chunks(block.max(1)).zip(output.chunks_mut(block.max(1))) {
        engine.process(inp, out)?;
    }
    Ok((output, engine))
}

pub fn seconds(t: f64) -> usize {
    (t * SR as f64).round() as usize
}
