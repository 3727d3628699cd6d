// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Float image planes and bilinear sampling.
//!
//! An [`Image`] is 1 to 3 planes of the same dimensions. The trackers work
//! on 3-plane images where plane 0 is the blurred intensity and planes 1/2
//! are the x/y derivatives (see [`crate::core::blur`]).

use crate::misc::type_aliases::{Float, MatX};

/// A stack of 1 to 3 same-sized float planes, dimensions fixed at creation.
///
/// Indexing is `(row, col)` like the underlying nalgebra matrices, so `y`
/// comes first everywhere, matching the sampling functions.
pub struct Image {
    planes: Vec<MatX>,
}

impl Image {
    /// Build an image from its planes.
    ///
    /// Returns `None` when given no plane, more than 3 planes,
    /// or planes of mismatched dimensions.
    pub fn new(planes: Vec<MatX>) -> Option<Self> {
        let first = planes.first()?;
        let shape = first.shape();
        if planes.len() > 3 || planes.iter().any(|p| p.shape() != shape) {
            return None;
        }
        Some(Self { planes })
    }

    /// Single-plane image, consuming the matrix.
    pub fn from_plane(plane: MatX) -> Self {
        Self {
            planes: vec![plane],
        }
    }

    pub fn height(&self) -> usize {
        self.planes[0].nrows()
    }

    pub fn width(&self) -> usize {
        self.planes[0].ncols()
    }

    pub fn nb_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, p: usize) -> &MatX {
        &self.planes[p]
    }

    /// Bilinearly interpolated value of plane `p` at the sub-pixel
    /// position `(y, x)`.
    ///
    /// Bounds are the caller's responsibility: the trackers verify their
    /// whole window beforehand (cf `track::window_in_bounds`) so that this
    /// hot path does not pay for per-sample checks.
    pub fn sample_bilinear(&self, y: Float, x: Float, p: usize) -> Float {
        sample_bilinear(&self.planes[p], y, x)
    }
}

/// Bilinear interpolation on a bare matrix at sub-pixel `(y, x)`.
///
/// `floor(x)`, `floor(y)` and their +1 neighbors must be valid indices.
pub fn sample_bilinear(plane: &MatX, y: Float, x: Float) -> Float {
    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;
    let c0 = x0 as usize;
    let r0 = y0 as usize;
    let v00 = plane[(r0, c0)];
    let v01 = plane[(r0, c0 + 1)];
    let v10 = plane[(r0 + 1, c0)];
    let v11 = plane[(r0 + 1, c0 + 1)];
    (1.0 - dy) * ((1.0 - dx) * v00 + dx * v01) + dy * ((1.0 - dx) * v10 + dx * v11)
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sample_at_integer_positions_is_exact() {
        let plane = MatX::from_fn(4, 5, |r, c| (10 * r + c) as Float);
        for r in 0..3 {
            for c in 0..4 {
                assert_relative_eq!(
                    sample_bilinear(&plane, r as Float, c as Float),
                    plane[(r, c)]
                );
            }
        }
    }

    #[test]
    fn sample_interpolates_linearly() {
        #[rustfmt::skip]
        let plane = MatX::from_row_slice(2, 2, &[
            0.0, 2.0,
            4.0, 6.0,
        ]);
        assert_relative_eq!(sample_bilinear(&plane, 0.0, 0.5), 1.0);
        assert_relative_eq!(sample_bilinear(&plane, 0.5, 0.0), 2.0);
        assert_relative_eq!(sample_bilinear(&plane, 0.5, 0.5), 3.0);
        assert_relative_eq!(sample_bilinear(&plane, 0.25, 0.75), 2.5);
    }

    #[test]
    fn image_rejects_mismatched_planes() {
        let a = MatX::zeros(3, 3);
        let b = MatX::zeros(3, 4);
        assert!(Image::new(vec![a, b]).is_none());
        assert!(Image::new(vec![]).is_none());
    }

    #[test]
    fn image_sampling_matches_plane_sampling() {
        let plane = MatX::from_fn(6, 6, |r, c| ((r * 31 + c * 17) % 7) as Float);
        let img = Image::from_plane(plane.clone());
        assert_eq!(img.nb_planes(), 1);
        assert_relative_eq!(
            img.sample_bilinear(2.3, 3.7, 0),
            sample_bilinear(&plane, 2.3, 3.7)
        );
    }
}
