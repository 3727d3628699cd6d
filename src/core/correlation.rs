// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pearson product-moment correlation between two sampled windows.
//!
//! Shared confidence metric of the brute-force tracker and the warp
//! tracker: +1 means the destination window is an affine intensity copy of
//! the source, values near 0 mean the tracker probably locked onto noise.

use crate::misc::type_aliases::Float;

/// Single-pass weighted Pearson correlation over `(source, destination,
/// weight)` samples. Weights in [0, 1] count fractional mask values as
/// fractional samples.
///
/// Returns `None` when either variance vanishes (flat window) or the
/// accumulation is not finite. Degenerate windows are a hard failure for
/// the callers, never a clamped score.
pub fn pearson_correlation<I>(samples: I) -> Option<Float>
where
    I: IntoIterator<Item = (Float, Float, Float)>,
{
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (x, y, w) in samples {
        sw += w;
        sx += w * x;
        sy += w * y;
        sxx += w * x * x;
        syy += w * y * y;
        sxy += w * x * y;
    }
    if sw <= 0.0 {
        return None;
    }
    let mean_x = sx / sw;
    let mean_y = sy / sw;
    let var_x = sxx / sw - mean_x * mean_x;
    let var_y = syy / sw - mean_y * mean_y;
    let covariance = sxy / sw - mean_x * mean_y;
    let denominator = (var_x * var_y).sqrt();
    let correlation = covariance / denominator;
    if denominator > 0.0 && correlation.is_finite() {
        Some(correlation)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn window() -> Vec<Float> {
        (0..49).map(|i| ((i * 31 + 7) % 97) as Float).collect()
    }

    #[test]
    fn self_correlation_is_one() {
        let w = window();
        let corr = pearson_correlation(w.iter().map(|&v| (v, v, 1.0))).unwrap();
        assert_relative_eq!(corr, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn negated_correlation_is_minus_one() {
        let w = window();
        let corr = pearson_correlation(w.iter().map(|&v| (v, 255.0 - v, 1.0))).unwrap();
        assert_relative_eq!(corr, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn flat_window_is_degenerate() {
        let flat = (0..49).map(|_| (5.0, 5.0, 1.0));
        assert!(pearson_correlation(flat).is_none());
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        let w = window();
        // Garbage destination values under zero weight must not matter.
        let samples = w
            .iter()
            .map(|&v| (v, v, 1.0))
            .chain((0..10).map(|i| (i as Float, -1000.0, 0.0)));
        let corr = pearson_correlation(samples).unwrap();
        assert_relative_eq!(corr, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn intensity_scale_invariance() {
        let w = window();
        let corr = pearson_correlation(w.iter().map(|&v| (v, 3.0 * v + 11.0, 1.0))).unwrap();
        assert_relative_eq!(corr, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn random_windows_stay_in_range() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let samples: Vec<(Float, Float, Float)> = (0..100)
                .map(|_| {
                    (
                        rng.gen_range(0.0..255.0),
                        rng.gen_range(0.0..255.0),
                        rng.gen_range(0.1..1.0),
                    )
                })
                .collect();
            let corr = pearson_correlation(samples).unwrap();
            assert!((-1.0..=1.0).contains(&corr), "correlation {}", corr);
        }
    }
}
