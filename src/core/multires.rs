// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-resolution pyramids of float images.

use crate::misc::type_aliases::MatX;

/// Type alias to easily spot vectors that are indexed over multi-resolution levels.
pub type Levels<T> = Vec<T>;

/// Pyramid of images where each level halves the resolution of the
/// previous one, each 2x2 block replaced by its mean.
/// Level 0 is the original image. Stops early if a level gets too small,
/// so the result may hold fewer than `max_levels` levels.
pub fn mean_pyramid(max_levels: usize, mat: MatX) -> Levels<MatX> {
    let mut pyramid = Vec::with_capacity(max_levels.max(1));
    pyramid.push(mat);
    while pyramid.len() < max_levels {
        match halve(pyramid.last().expect("pyramid is never empty")) {
            Some(next) => pyramid.push(next),
            None => break,
        }
    }
    pyramid
}

/// Halve the resolution of a matrix, each output pixel the mean of its 2x2
/// source block. Odd trailing rows/columns are dropped.
/// Returns `None` if either dimension is < 2.
pub fn halve(mat: &MatX) -> Option<MatX> {
    let (nrows, ncols) = mat.shape();
    let half_r = nrows / 2;
    let half_c = ncols / 2;
    if half_r == 0 || half_c == 0 {
        return None;
    }
    Some(MatX::from_fn(half_r, half_c, |r, c| {
        let a = mat[(2 * r, 2 * c)];
        let b = mat[(2 * r + 1, 2 * c)];
        let d = mat[(2 * r, 2 * c + 1)];
        let e = mat[(2 * r + 1, 2 * c + 1)];
        // Scale before summing so values near Float::MAX cannot overflow.
        (0.25 * a + 0.25 * b) + (0.25 * d + 0.25 * e)
    }))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::Float;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn halve_block_means() {
        #[rustfmt::skip]
        let mat = MatX::from_row_slice(2, 4, &[
            1.0, 2.0, 3.0, 5.0,
            3.0, 6.0, 7.0, 9.0,
        ]);
        let half = halve(&mat).unwrap();
        assert_eq!(half.shape(), (1, 2));
        assert_relative_eq!(half[(0, 0)], 3.0);
        assert_relative_eq!(half[(0, 1)], 6.0);
    }

    #[test]
    fn halve_too_small_is_none() {
        assert!(halve(&MatX::zeros(1, 10)).is_none());
        assert!(halve(&MatX::zeros(10, 1)).is_none());
    }

    #[test]
    fn halve_at_extreme_magnitudes() {
        let huge = halve(&MatX::from_element(4, 4, Float::MAX)).unwrap();
        assert!(huge.iter().all(|&v| v == Float::MAX));
        let negative = halve(&MatX::from_element(2, 2, -Float::MAX)).unwrap();
        assert_eq!(negative[(0, 0)], -Float::MAX);
    }

    #[test]
    fn pyramid_level_count() {
        let mat = MatX::zeros(64, 64);
        let pyramid = mean_pyramid(4, mat);
        assert_eq!(pyramid.len(), 4);
        assert_eq!(pyramid[0].shape(), (64, 64));
        assert_eq!(pyramid[3].shape(), (8, 8));
    }

    #[test]
    fn pyramid_stops_on_small_images() {
        let pyramid = mean_pyramid(10, MatX::zeros(8, 8));
        assert_eq!(pyramid.len(), 4); // 8, 4, 2, 1
    }

    #[quickcheck]
    fn pyramid_of_constant_image_stays_constant(value: Float) -> bool {
        if !value.is_finite() {
            return true;
        }
        let pyramid = mean_pyramid(3, MatX::from_element(16, 16, value));
        pyramid
            .iter()
            .all(|level| level.iter().all(|&v| (v - value).abs() < 1e-9))
    }
}
