// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gaussian blur and analytic image derivatives.
//!
//! The trackers never look at raw pixels: they all consume a 3-plane image
//! holding the blurred intensity and its x/y derivatives, produced here by
//! separable convolution with a Gaussian kernel and its derivative kernel.

use crate::core::image::Image;
use crate::misc::type_aliases::{Float, MatX};

/// Truncated Gaussian mass tolerated outside the kernel support.
const KERNEL_TRUNCATION: Float = 1e-2;

/// Half width of the kernel support for a given sigma, always >= 1.
/// Grows linearly with sigma so the truncated tails stay below
/// `KERNEL_TRUNCATION` of the total mass.
fn kernel_half_width(sigma: Float) -> usize {
    let half = sigma * (2.0 * (1.0 / KERNEL_TRUNCATION).ln()).sqrt();
    (half.ceil() as usize).max(1)
}

/// Odd-length 1D Gaussian kernel, L1-normalized.
pub fn gaussian_kernel(sigma: Float) -> Vec<Float> {
    let half = kernel_half_width(sigma) as isize;
    let mut kernel: Vec<Float> = (-half..=half)
        .map(|i| (-((i * i) as Float) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: Float = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Odd-length 1D Gaussian derivative kernel.
///
/// Normalized so that `sum(i * kernel[i]) == -1` over the offsets `i`,
/// the convention of a discrete first-derivative operator: convolving a
/// unit-slope ramp yields exactly 1.
pub fn gaussian_derivative_kernel(sigma: Float) -> Vec<Float> {
    let half = kernel_half_width(sigma) as isize;
    let raw: Vec<Float> = (-half..=half)
        .map(|i| -(i as Float) * (-((i * i) as Float) / (2.0 * sigma * sigma)).exp())
        .collect();
    let weighted_sum: Float = raw
        .iter()
        .enumerate()
        .map(|(idx, &v)| (idx as isize - half) as Float * v)
        .sum();
    // weighted_sum is -sum(i^2 * exp(...)), strictly negative.
    raw.iter().map(|&v| -v / weighted_sum).collect()
}

/// Horizontal (along columns) convolution, clamping at the borders.
fn convolve_horizontal(mat: &MatX, kernel: &[Float]) -> MatX {
    let half = (kernel.len() / 2) as isize;
    let (nrows, ncols) = mat.shape();
    MatX::from_fn(nrows, ncols, |r, c| {
        let mut acc = 0.0;
        for (idx, &k) in kernel.iter().enumerate() {
            let offset = idx as isize - half;
            let source = (c as isize - offset).max(0).min(ncols as isize - 1);
            acc += k * mat[(r, source as usize)];
        }
        acc
    })
}

/// Vertical (along rows) convolution, clamping at the borders.
fn convolve_vertical(mat: &MatX, kernel: &[Float]) -> MatX {
    let half = (kernel.len() / 2) as isize;
    let (nrows, ncols) = mat.shape();
    MatX::from_fn(nrows, ncols, |r, c| {
        let mut acc = 0.0;
        for (idx, &k) in kernel.iter().enumerate() {
            let offset = idx as isize - half;
            let source = (r as isize - offset).max(0).min(nrows as isize - 1);
            acc += k * mat[(source as usize, c)];
        }
        acc
    })
}

/// Gaussian-blurred intensity plus its analytic x/y derivatives.
///
/// Plane 0 is the blurred image, planes 1 and 2 the x and y derivatives,
/// each obtained by swapping the derivative kernel into one axis of the
/// separable convolution.
pub fn blurred_image_and_derivatives(plane: &MatX, sigma: Float) -> Image {
    let gaussian = gaussian_kernel(sigma);
    let derivative = gaussian_derivative_kernel(sigma);
    let blurred_x = convolve_horizontal(plane, &gaussian);
    let blurred = convolve_vertical(&blurred_x, &gaussian);
    let gx = convolve_vertical(&convolve_horizontal(plane, &derivative), &gaussian);
    let gy = convolve_vertical(&blurred_x, &derivative);
    Image::new(vec![blurred, gx, gy]).expect("planes share the input dimensions")
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kernels_are_odd_and_grow_with_sigma() {
        let small = gaussian_kernel(0.9);
        let large = gaussian_kernel(3.0);
        assert_eq!(small.len() % 2, 1);
        assert_eq!(large.len() % 2, 1);
        assert!(large.len() > small.len());
        assert_eq!(small.len(), gaussian_derivative_kernel(0.9).len());
    }

    #[test]
    fn gaussian_kernel_is_l1_normalized() {
        for &sigma in &[0.5, 0.9, 2.0] {
            let sum: Float = gaussian_kernel(sigma).iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn derivative_kernel_weighted_sum_is_minus_one() {
        for &sigma in &[0.5, 0.9, 2.0] {
            let kernel = gaussian_derivative_kernel(sigma);
            let half = (kernel.len() / 2) as isize;
            let weighted: Float = kernel
                .iter()
                .enumerate()
                .map(|(idx, &v)| (idx as isize - half) as Float * v)
                .sum();
            assert_relative_eq!(weighted, -1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn blur_of_constant_image_is_constant() {
        let plane = MatX::from_element(12, 12, 3.5);
        let img = blurred_image_and_derivatives(&plane, 0.9);
        assert_eq!(img.nb_planes(), 3);
        for r in 0..12 {
            for c in 0..12 {
                assert_relative_eq!(img.plane(0)[(r, c)], 3.5, epsilon = 1e-9);
                assert_relative_eq!(img.plane(1)[(r, c)], 0.0, epsilon = 1e-9);
                assert_relative_eq!(img.plane(2)[(r, c)], 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn derivatives_of_ramps_are_unit_slopes() {
        let ramp_x = MatX::from_fn(20, 20, |_, c| c as Float);
        let ramp_y = MatX::from_fn(20, 20, |r, _| r as Float);
        let gx = blurred_image_and_derivatives(&ramp_x, 0.9);
        let gy = blurred_image_and_derivatives(&ramp_y, 0.9);
        // Away from the clamped borders the slope is recovered exactly.
        for r in 5..15 {
            for c in 5..15 {
                assert_relative_eq!(gx.plane(1)[(r, c)], 1.0, epsilon = 1e-9);
                assert_relative_eq!(gx.plane(2)[(r, c)], 0.0, epsilon = 1e-9);
                assert_relative_eq!(gy.plane(2)[(r, c)], 1.0, epsilon = 1e-9);
                assert_relative_eq!(gy.plane(1)[(r, c)], 0.0, epsilon = 1e-9);
            }
        }
    }
}
