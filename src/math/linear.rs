// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small dense linear solves shared by the trackers and the warp fits.

use crate::misc::type_aliases::{Float, Mat2, Mat3, Point2, VecX, Vec2};
use nalgebra::DMatrix;

/// Solve the 2x2 system `m * x = b` by the closed-form inverse.
///
/// Returns `None` when the determinant magnitude is below `min_determinant`
/// or not finite, which the point trackers treat as a degenerate
/// (textureless) window rather than a numeric accident to clamp.
pub fn solve_2x2(m: &Mat2, b: &Vec2, min_determinant: Float) -> Option<Vec2> {
    let det = m.m11 * m.m22 - m.m12 * m.m21;
    if !det.is_finite() || det.abs() < min_determinant {
        return None;
    }
    Some(Vec2::new(
        (m.m22 * b.x - m.m12 * b.y) / det,
        (m.m11 * b.y - m.m21 * b.x) / det,
    ))
}

/// Closest rotation to a 2x2 correlation matrix, in the orthogonal
/// Procrustes sense: `R = U * V^T` from the SVD of `m`, with the sign of
/// the last column of `U` flipped if needed to stay a proper rotation.
pub fn procrustes_rotation_2x2(m: &Mat2) -> Option<Mat2> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        let last = u.column(1).clone_owned();
        u_flipped.set_column(1, &(-last));
        r = u_flipped * v_t;
    }
    if r.iter().all(|x| x.is_finite()) {
        Some(r)
    } else {
        None
    }
}

/// Homography mapping each `from` point onto the matching `to` point,
/// normalized so that `h[(2,2)] == 1`.
///
/// With exactly 4 correspondences the 8x8 system is square; the least
/// squares fit degenerates to an exact solve. Returns `None` for
/// degenerate configurations (three collinear corners, repeated points).
pub fn homography_from_4_points(from: &[Point2; 4], to: &[Point2; 4]) -> Option<Mat3> {
    let mut a = DMatrix::<Float>::zeros(8, 8);
    let mut b = VecX::zeros(8);
    for i in 0..4 {
        let (x, y) = (from[i].x, from[i].y);
        let (xp, yp) = (to[i].x, to[i].y);
        a[(2 * i, 0)] = x;
        a[(2 * i, 1)] = y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -xp * x;
        a[(2 * i, 7)] = -xp * y;
        b[2 * i] = xp;
        a[(2 * i + 1, 3)] = x;
        a[(2 * i + 1, 4)] = y;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -yp * x;
        a[(2 * i + 1, 7)] = -yp * y;
        b[2 * i + 1] = yp;
    }
    let h = a.lu().solve(&b)?;
    if !h.iter().all(|x| x.is_finite()) {
        return None;
    }
    #[rustfmt::skip]
    let m = Mat3::new(
        h[0], h[1], h[2],
        h[3], h[4], h[5],
        h[6], h[7], 1.0,
    );
    Some(m)
}

/// Apply a homography to a point (perspective division included).
pub fn apply_homography(h: &Mat3, x: Float, y: Float) -> (Float, Float) {
    let w = h.m31 * x + h.m32 * y + h.m33;
    (
        (h.m11 * x + h.m12 * y + h.m13) / w,
        (h.m21 * x + h.m22 * y + h.m23) / w,
    )
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_2x2_exact() {
        let m = Mat2::new(2.0, 1.0, 1.0, 3.0);
        let b = Vec2::new(5.0, 10.0);
        let x = solve_2x2(&m, &b, 1e-12).unwrap();
        assert_relative_eq!(m * x, b, epsilon = 1e-12);
    }

    #[test]
    fn solve_2x2_degenerate_is_none() {
        let m = Mat2::new(1.0, 2.0, 2.0, 4.0);
        assert!(solve_2x2(&m, &Vec2::new(1.0, 1.0), 1e-6).is_none());
    }

    #[test]
    fn procrustes_recovers_rotation() {
        let theta: Float = 0.7;
        let r = Mat2::new(theta.cos(), -theta.sin(), theta.sin(), theta.cos());
        // Correlation matrix of rotated point pairs is proportional to R.
        let m = r * 3.7;
        let r_fit = procrustes_rotation_2x2(&m).unwrap();
        assert_relative_eq!(r_fit, r, epsilon = 1e-9);
        assert_relative_eq!(r_fit.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn homography_maps_corners() {
        let from = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        let to = [
            Point2::new(1.0, 2.0),
            Point2::new(12.0, 1.5),
            Point2::new(11.0, 12.0),
            Point2::new(0.5, 11.0),
        ];
        let h = homography_from_4_points(&from, &to).unwrap();
        for i in 0..4 {
            let (x, y) = apply_homography(&h, from[i].x, from[i].y);
            assert_relative_eq!(x, to[i].x, epsilon = 1e-9);
            assert_relative_eq!(y, to[i].y, epsilon = 1e-9);
        }
    }

    #[test]
    fn homography_degenerate_corners_is_none() {
        // Three collinear source corners.
        let from = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        let to = from;
        assert!(homography_from_4_points(&from, &to).is_none());
    }
}
