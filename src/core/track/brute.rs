// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Exhaustive-search point tracker.
//!
//! Quantizes the source window and the whole destination image to bytes,
//! then scores the sum of absolute differences at every valid integer
//! position and keeps the minimum. No local minima, no iteration budget,
//! integer-precision output; meant as a robust initializer for the
//! sub-pixel trackers.
//!
//! The scalar SAD loop is the correctness baseline. The `simd` cargo
//! feature swaps in a 16-wide SSE2 inner loop (`_mm_sad_epu8`) with a
//! scalar tail; rankings are identical, only the speed changes.

use log::debug;

use crate::core::correlation::pearson_correlation;
use crate::core::image::sample_bilinear;
use crate::core::track::{window_in_bounds, RegionTracker};
use crate::misc::type_aliases::{Float, MatX};

pub struct BruteTracker {
    pub half_window_size: usize,
    /// Minimum Pearson correlation between the source window and the best
    /// match for the result to be accepted; 0 disables the check.
    pub minimum_correlation: Float,
}

impl Default for BruteTracker {
    fn default() -> Self {
        Self {
            half_window_size: 4,
            minimum_correlation: 0.78,
        }
    }
}

fn quantize(value: Float) -> u8 {
    value.round().max(0.0).min(255.0) as u8
}

/// Row-major byte copy of a whole image plane.
fn image_to_bytes(image: &MatX) -> Vec<u8> {
    let (nrows, ncols) = image.shape();
    let mut bytes = Vec::with_capacity(nrows * ncols);
    for r in 0..nrows {
        for c in 0..ncols {
            bytes.push(quantize(image[(r, c)]));
        }
    }
    bytes
}

#[cfg(not(all(feature = "simd", target_arch = "x86_64")))]
fn sad_row(a: &[u8], b: &[u8]) -> u64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (i32::from(x) - i32::from(y)).abs() as u64)
        .sum()
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
fn sad_row(a: &[u8], b: &[u8]) -> u64 {
    #[allow(unsafe_code)]
    unsafe {
        use std::arch::x86_64::*;
        let mut acc = _mm_setzero_si128();
        let chunks = a.len() / 16;
        for i in 0..chunks {
            let va = _mm_loadu_si128(a.as_ptr().add(16 * i) as *const __m128i);
            let vb = _mm_loadu_si128(b.as_ptr().add(16 * i) as *const __m128i);
            acc = _mm_add_epi64(acc, _mm_sad_epu8(va, vb));
        }
        let high = _mm_unpackhi_epi64(acc, acc);
        let mut total = (_mm_cvtsi128_si64(acc) as u64)
            .wrapping_add(_mm_cvtsi128_si64(high) as u64);
        // Scalar tail for non-multiple-of-16 widths.
        for i in 16 * chunks..a.len() {
            total += (i32::from(a[i]) - i32::from(b[i])).abs() as u64;
        }
        total
    }
}

impl RegionTracker for BruteTracker {
    fn track(
        &self,
        image1: &MatX,
        image2: &MatX,
        x1: Float,
        y1: Float,
        x2: &mut Float,
        y2: &mut Float,
    ) -> bool {
        let hw = self.half_window_size;
        if !window_in_bounds(image1, x1, y1, hw) {
            debug!("brute: source window out of bounds at ({}, {})", x1, y1);
            return false;
        }

        // Source window, both as floats (for the correlation gate)
        // and quantized to bytes (for the SAD scan).
        let width = 2 * hw + 1;
        let mut pattern_f = Vec::with_capacity(width * width);
        for r in 0..width {
            for c in 0..width {
                let yy = y1 + r as Float - hw as Float;
                let xx = x1 + c as Float - hw as Float;
                pattern_f.push(sample_bilinear(image1, yy, xx));
            }
        }
        let pattern: Vec<u8> = pattern_f.iter().map(|&v| quantize(v)).collect();

        let (nrows, ncols) = image2.shape();
        if nrows < width || ncols < width {
            return false;
        }
        let bytes2 = image_to_bytes(image2);

        let mut best_sad = u64::MAX;
        let mut best = (0usize, 0usize);
        for r in 0..=(nrows - width) {
            for c in 0..=(ncols - width) {
                let mut sad = 0;
                for pr in 0..width {
                    let row_start = (r + pr) * ncols + c;
                    sad += sad_row(
                        &pattern[pr * width..(pr + 1) * width],
                        &bytes2[row_start..row_start + width],
                    );
                }
                if sad < best_sad {
                    best_sad = sad;
                    best = (r, c);
                }
            }
        }
        if best_sad == u64::MAX {
            return false;
        }

        *x2 = (best.1 + hw) as Float;
        *y2 = (best.0 + hw) as Float;

        if self.minimum_correlation > 0.0 {
            let samples = (0..width * width).map(|i| {
                let (pr, pc) = (i / width, i % width);
                (
                    pattern_f[i],
                    image2[(best.0 + pr, best.1 + pc)],
                    1.0,
                )
            });
            match pearson_correlation(samples) {
                Some(correlation) if correlation >= self.minimum_correlation => true,
                Some(correlation) => {
                    debug!(
                        "brute: best match correlation {} below threshold {}",
                        correlation, self.minimum_correlation
                    );
                    false
                }
                None => {
                    debug!("brute: degenerate correlation at best match");
                    false
                }
            }
        } else {
            true
        }
    }
}
