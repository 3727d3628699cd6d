// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Time-reversible point tracker.
//!
//! Symmetrizes the photometric cost between the source and destination
//! windows: the displacement solving the composed system is the same when
//! the two frames are swapped, which removes the forward-tracking drift of
//! the plain Newton tracker. Convergence is slower, hence the higher
//! default iteration budget.

use log::debug;

use crate::core::blur::blurred_image_and_derivatives;
use crate::core::image::Image;
use crate::core::track::{window_in_bounds, RegionTracker};
use crate::math::linear::solve_2x2;
use crate::misc::type_aliases::{Float, Mat2, MatX, Vec2};

pub struct ReversibleTracker {
    pub half_window_size: usize,
    pub max_iterations: usize,
    /// Regularization weight of the composed system.
    pub lambda: Float,
    pub min_determinant: Float,
    pub min_update_squared_distance: Float,
    pub sigma: Float,
}

impl Default for ReversibleTracker {
    fn default() -> Self {
        Self {
            half_window_size: 4,
            max_iterations: 200,
            lambda: 0.05,
            min_determinant: 1e-6,
            min_update_squared_distance: 1e-6,
            sigma: 0.9,
        }
    }
}

/// The four window accumulators and their intensity-weighted vectors.
struct Accumulators {
    a: Mat2,
    b: Mat2,
    c: Mat2,
    r: Vec2,
    s: Vec2,
    v: Vec2,
    w: Vec2,
}

fn accumulate_window(
    img1: &Image,
    img2: &Image,
    x1: Float,
    y1: Float,
    x2: Float,
    y2: Float,
    half: isize,
) -> Accumulators {
    let mut acc = Accumulators {
        a: Mat2::zeros(),
        b: Mat2::zeros(),
        c: Mat2::zeros(),
        r: Vec2::zeros(),
        s: Vec2::zeros(),
        v: Vec2::zeros(),
        w: Vec2::zeros(),
    };
    for r in -half..=half {
        for c in -half..=half {
            let (rf, cf) = (r as Float, c as Float);
            let i = img1.sample_bilinear(y1 + rf, x1 + cf, 0);
            let j = img2.sample_bilinear(y2 + rf, x2 + cf, 0);
            let gi = Vec2::new(
                img1.sample_bilinear(y1 + rf, x1 + cf, 1),
                img1.sample_bilinear(y1 + rf, x1 + cf, 2),
            );
            let gj = Vec2::new(
                img2.sample_bilinear(y2 + rf, x2 + cf, 1),
                img2.sample_bilinear(y2 + rf, x2 + cf, 2),
            );
            acc.a += gi * gi.transpose();
            acc.b += gi * gj.transpose();
            acc.c += gj * gj.transpose();
            acc.r += i * gi;
            acc.s += j * gi;
            acc.v += i * gj;
            acc.w += j * gj;
        }
    }
    acc
}

impl RegionTracker for ReversibleTracker {
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
            debug!("reversible: source window out of bounds at ({}, {})", x1, y1);
            return false;
        }
        let img1 = blurred_image_and_derivatives(image1, self.sigma);
        let img2 = blurred_image_and_derivatives(image2, self.sigma);

        let half = self.half_window_size as isize;
        for iteration in 0..self.max_iterations {
            if !window_in_bounds(image2, *x2, *y2, self.half_window_size) {
                debug!(
                    "reversible: fell out of bounds at ({}, {}) on iteration {}",
                    x2, y2, iteration
                );
                return false;
            }

            let acc = accumulate_window(&img1, &img2, x1, y1, *x2, *y2, half);

            // The cross matrix couples the two windows; when it degenerates
            // neither window carries enough texture to symmetrize anything.
            let d = acc.b.transpose();
            let d_det = d.determinant();
            if !d_det.is_finite() || d_det.abs() < self.min_determinant {
                debug!("reversible: degenerate cross-gradient matrix");
                return false;
            }
            let d_inv = match d.try_inverse() {
                Some(inv) => inv,
                None => return false,
            };

            // Composed system U * step = e, symmetric in the two frames.
            let u = acc.a * d_inv * acc.c + self.lambda * Mat2::identity();
            let e = acc.a * d_inv * (acc.v - acc.w) + self.lambda * (acc.r - acc.s);

            let step = match solve_2x2(&u, &e, self.min_determinant) {
                Some(step) => step,
                None => {
                    debug!("reversible: composed system is singular");
                    return false;
                }
            };
            *x2 += step.x;
            *y2 += step.y;
            if step.norm_squared() < self.min_update_squared_distance {
                return true;
            }
        }
        debug!(
            "reversible: no convergence after {} iterations",
            self.max_iterations
        );
        false
    }
}
