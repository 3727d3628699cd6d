// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Newton-style point tracker.
//!
//! Classic Lucas-Kanade: at each iteration, accumulate the 2x2 gradient
//! matrix and error vector of the window, solve for the displacement and
//! move the estimate. Cheap and accurate for small displacements; wrap it
//! in a pyramid tracker for anything larger than the window.

use log::debug;

use crate::core::blur::blurred_image_and_derivatives;
use crate::core::track::{window_in_bounds, RegionTracker};
use crate::math::linear::solve_2x2;
use crate::misc::type_aliases::{Float, Mat2, MatX, Vec2};

pub struct NewtonTracker {
    /// Patch radius: the window is `(2 * half_window_size + 1)^2` samples.
    pub half_window_size: usize,
    pub max_iterations: usize,
    /// Below this determinant the window is considered textureless
    /// and tracking fails rather than inventing a displacement.
    pub min_determinant: Float,
    /// Squared step length under which the iteration has converged.
    pub min_update_squared_distance: Float,
    /// Blur applied to both images before sampling.
    pub sigma: Float,
}

impl Default for NewtonTracker {
    fn default() -> Self {
        Self {
            half_window_size: 4,
            max_iterations: 100,
            min_determinant: 1e-6,
            min_update_squared_distance: 1e-6,
            sigma: 0.9,
        }
    }
}

impl RegionTracker for NewtonTracker {
    fn track(
        &self,
        image1: &MatX,
        image2: &MatX,
        x1: Float,
        y1: Float,
        x2: &mut Float,
        y2: &mut Float,
    ) -> bool {
        if !window_in_bounds(image1, x1, y1, self.half_window_size) {
            debug!("newton: source window out of bounds at ({}, {})", x1, y1);
            return false;
        }
        let img1 = blurred_image_and_derivatives(image1, self.sigma);
        let img2 = blurred_image_and_derivatives(image2, self.sigma);

        let half = self.half_window_size as isize;
        for iteration in 0..self.max_iterations {
            if !window_in_bounds(image2, *x2, *y2, self.half_window_size) {
                debug!(
                    "newton: fell out of bounds at ({}, {}) on iteration {}",
                    x2, y2, iteration
                );
                return false;
            }

            let mut gxx = 0.0;
            let mut gxy = 0.0;
            let mut gyy = 0.0;
            let mut ex = 0.0;
            let mut ey = 0.0;
            for r in -half..=half {
                for c in -half..=half {
                    let (rf, cf) = (r as Float, c as Float);
                    let i = img1.sample_bilinear(y1 + rf, x1 + cf, 0);
                    let j = img2.sample_bilinear(*y2 + rf, *x2 + cf, 0);
                    let gx = img2.sample_bilinear(*y2 + rf, *x2 + cf, 1);
                    let gy = img2.sample_bilinear(*y2 + rf, *x2 + cf, 2);
                    gxx += gx * gx;
                    gxy += gx * gy;
                    gyy += gy * gy;
                    ex += (i - j) * gx;
                    ey += (i - j) * gy;
                }
            }

            let system = Mat2::new(gxx, gxy, gxy, gyy);
            let step = match solve_2x2(&system, &Vec2::new(ex, ey), self.min_determinant) {
                Some(step) => step,
                None => {
                    debug!("newton: degenerate gradient matrix, patch too flat");
                    return false;
                }
            };
            *x2 += step.x;
            *y2 += step.y;
            if step.norm_squared() < self.min_update_squared_distance {
                return true;
            }
        }
        debug!("newton: no convergence after {} iterations", self.max_iterations);
        false
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn single_bright_pixel(size: usize, r: usize, c: usize) -> MatX {
        let mut mat = MatX::zeros(size, size);
        mat[(r, c)] = 255.0;
        mat
    }

    #[test]
    fn tracks_shifted_bright_pixel_to_subpixel_accuracy() {
        let _ = env_logger::builder().is_test(true).try_init();
        // Pixel moves by (dx, dy) = (2, 1) between frames.
        let image1 = single_bright_pixel(51, 25, 25);
        let image2 = single_bright_pixel(51, 26, 27);
        let tracker = NewtonTracker {
            half_window_size: 6,
            min_update_squared_distance: 1e-8,
            ..Default::default()
        };
        let mut x2 = 25.0;
        let mut y2 = 25.0;
        assert!(tracker.track(&image1, &image2, 25.0, 25.0, &mut x2, &mut y2));
        assert_relative_eq!(x2, 27.0, epsilon = 1e-3);
        assert_relative_eq!(y2, 26.0, epsilon = 1e-3);
    }

    #[test]
    fn flat_patch_fails_instead_of_fake_success() {
        let image1 = MatX::from_element(51, 51, 42.0);
        let image2 = MatX::from_element(51, 51, 42.0);
        let tracker = NewtonTracker::default();
        let mut x2 = 25.0;
        let mut y2 = 25.0;
        assert!(!tracker.track(&image1, &image2, 25.0, 25.0, &mut x2, &mut y2));
    }

    #[test]
    fn source_window_out_of_bounds_fails() {
        let image = single_bright_pixel(51, 25, 25);
        let tracker = NewtonTracker::default();
        let mut x2 = 2.0;
        let mut y2 = 2.0;
        assert!(!tracker.track(&image, &image, 2.0, 2.0, &mut x2, &mut y2));
    }

    #[test]
    fn large_displacement_fails_with_small_window() {
        // 6 px shift with a half window of 3: the destination window sees
        // nothing but flat background, so the gradient matrix degenerates.
        let image1 = single_bright_pixel(64, 30, 30);
        let image2 = single_bright_pixel(64, 30, 36);
        let tracker = NewtonTracker {
            half_window_size: 3,
            sigma: 0.5,
            ..Default::default()
        };
        let mut x2 = 30.0;
        let mut y2 = 30.0;
        assert!(!tracker.track(&image1, &image2, 30.0, 30.0, &mut x2, &mut y2));
    }
}
