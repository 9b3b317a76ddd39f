//! Subnormal flushing for recursive state and output buffers.

/// Magnitudes below this are treated as zero.
pub const DENORMAL_THRESHOLD: f32 = 1e-38;

#[inline]
pub fn flush(x: f32) -> f32 {
    if x.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        x
    }
}

#[inline]
pub fn flush_f64(x: f64) -> f64 {
    if x.abs() < DENORMAL_THRESHOLD as f64 {
        0.0
    } else {
        x
    }
}

/// Flushes every sample of `buf` in place.
#[inline]
pub fn flush_slice(buf: &mut [f32]) {
    for s in buf.iter_mut() {
        *s = flush(*s);
    }
}
