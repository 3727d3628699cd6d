// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt inverse-compositional point tracker.
//!
//! The template window and its Gauss-Newton Hessian are sampled once from
//! image1; iterations only re-sample the destination window, form a damped
//! 2x2 system and accept or reject the step with the standard trust-region
//! ratio. Per-iteration cost is therefore much lower than the Newton
//! tracker's, at the price of linearizing around the template gradients.

use log::debug;

use crate::core::blur::blurred_image_and_derivatives;
use crate::core::image::Image;
use crate::core::track::{window_in_bounds, RegionTracker};
use crate::math::linear::solve_2x2;
use crate::misc::type_aliases::{Float, Mat2, MatX, Vec2};

pub struct InverseCompositionalTracker {
    pub half_window_size: usize,
    pub max_iterations: usize,
    pub min_determinant: Float,
    /// Base squared step length under which the iteration has converged;
    /// widened by the template autocorrelation at high residual levels.
    pub min_update_squared_distance: Float,
    pub sigma: Float,
}

impl Default for InverseCompositionalTracker {
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

/// Template window sampled once from image1: intensities and gradients.
struct Template {
    intensities: Vec<Float>,
    gradients: Vec<Vec2>,
    hessian: Mat2,
}

fn sample_template(img1: &Image, x1: Float, y1: Float, half: isize) -> Template {
    let nb = ((2 * half + 1) * (2 * half + 1)) as usize;
    let mut intensities = Vec::with_capacity(nb);
    let mut gradients = Vec::with_capacity(nb);
    let mut hessian = Mat2::zeros();
    for r in -half..=half {
        for c in -half..=half {
            let (rf, cf) = (r as Float, c as Float);
            let g = Vec2::new(
                img1.sample_bilinear(y1 + rf, x1 + cf, 1),
                img1.sample_bilinear(y1 + rf, x1 + cf, 2),
            );
            intensities.push(img1.sample_bilinear(y1 + rf, x1 + cf, 0));
            hessian += g * g.transpose();
            gradients.push(g);
        }
    }
    Template {
        intensities,
        gradients,
        hessian,
    }
}

/// Photometric energy and right-hand side `z = sum g_i * (T_i - J_i)`
/// of the destination window at `(x2, y2)`.
fn eval_destination(
    template: &Template,
    img2: &Image,
    x2: Float,
    y2: Float,
    half: isize,
) -> (Float, Vec2) {
    let mut energy = 0.0;
    let mut z = Vec2::zeros();
    let mut idx = 0;
    for r in -half..=half {
        for c in -half..=half {
            let (rf, cf) = (r as Float, c as Float);
            let j = img2.sample_bilinear(y2 + rf, x2 + cf, 0);
            let residual = j - template.intensities[idx];
            energy += residual * residual;
            z -= residual * template.gradients[idx];
            idx += 1;
        }
    }
    (energy, z)
}

impl RegionTracker for InverseCompositionalTracker {
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
            debug!("lm: source window out of bounds at ({}, {})", x1, y1);
            return false;
        }
        let img1 = blurred_image_and_derivatives(image1, self.sigma);
        let img2 = blurred_image_and_derivatives(image2, self.sigma);

        let half = self.half_window_size as isize;
        let template = sample_template(&img1, x1, y1, half);
        let h = template.hessian;
        if h.determinant().abs() < self.min_determinant {
            debug!("lm: template autocorrelation is degenerate, patch too flat");
            return false;
        }

        if !window_in_bounds(image2, *x2, *y2, self.half_window_size) {
            debug!("lm: initial guess out of bounds at ({}, {})", x2, y2);
            return false;
        }
        let (mut energy, mut z) = eval_destination(&template, &img2, *x2, *y2, half);

        // Smallest eigenvalue of the 2x2 autocorrelation, closed form.
        let half_trace = 0.5 * h.trace();
        let eig_min = half_trace - (half_trace * half_trace - h.determinant()).max(0.0).sqrt();

        let mut mu = 1e-4 * h.diagonal().max();
        let mut nu = 2.0;
        for iteration in 0..self.max_iterations {
            if !window_in_bounds(image2, *x2, *y2, self.half_window_size) {
                debug!(
                    "lm: fell out of bounds at ({}, {}) on iteration {}",
                    x2, y2, iteration
                );
                return false;
            }

            let damped = Mat2::new(
                h.m11 + mu * h.m11,
                h.m12,
                h.m21,
                h.m22 + mu * h.m22,
            );
            let step = match solve_2x2(&damped, &z, self.min_determinant) {
                Some(step) => step,
                None => {
                    debug!("lm: damped system is singular");
                    return false;
                }
            };

            // A step smaller than the base tolerance, widened by the
            // localization radius the template autocorrelation allows at
            // the current residual level, means convergence. The widening
            // keeps micro-steps on noisy patches from being chased forever.
            let localization = if eig_min > 0.0 {
                energy / eig_min
            } else {
                Float::INFINITY
            };
            let tolerance = self.min_update_squared_distance.max(1e-3 * localization);
            if step.norm_squared() < tolerance {
                *x2 += step.x;
                *y2 += step.y;
                return true;
            }

            let tentative = (*x2 + step.x, *y2 + step.y);
            if !window_in_bounds(image2, tentative.0, tentative.1, self.half_window_size) {
                // Treat a step leaving the image like a failed step.
                mu *= nu;
                nu *= 2.0;
                continue;
            }
            let (new_energy, new_z) = eval_destination(&template, &img2, tentative.0, tentative.1, half);

            // Trust-region ratio: actual versus predicted error reduction.
            let predicted = step.dot(&(mu * Vec2::new(h.m11 * step.x, h.m22 * step.y) + z));
            let rho = (energy - new_energy) / predicted;
            if predicted > 0.0 && rho > 0.0 {
                *x2 = tentative.0;
                *y2 = tentative.1;
                energy = new_energy;
                z = new_z;
                mu *= Float::max(1.0 / 3.0, 1.0 - (2.0 * rho - 1.0).powi(3));
                nu = 2.0;
            } else {
                mu *= nu;
                nu *= 2.0;
            }
        }
        debug!("lm: no convergence after {} iterations", self.max_iterations);
        false
    }
}
