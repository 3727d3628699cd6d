// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parametric warps between two image coordinate frames.
//!
//! Each warp family owns its parameter vector and exposes the same three
//! capabilities: a closed-form fit from a pair of quads, a pure `forward`
//! evaluation, and the analytic Jacobian of `forward` with respect to the
//! parameters. The warp tracker is generic over these capabilities, so
//! adding a family does not touch the optimizer.

use crate::core::quad::Quad;
use crate::math::linear;
use crate::misc::type_aliases::{Float, Mat2, Mat3, MatX, Point2, Vec2, Vec3, Vec4, Vec6, Vec8, VecX};

/// The six warp families, by increasing degrees of freedom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarpMode {
    /// Translation only: 2 parameters.
    Translation,
    /// Translation and uniform scale: 3 parameters.
    TranslationScale,
    /// Translation and rotation: 3 parameters.
    TranslationRotation,
    /// Translation, rotation and uniform scale: 4 parameters.
    TranslationRotationScale,
    /// Full affine: 6 parameters.
    Affine,
    /// Planar homography: 8 parameters.
    Homography,
}

impl WarpMode {
    pub fn nb_params(self) -> usize {
        match self {
            WarpMode::Translation => 2,
            WarpMode::TranslationScale | WarpMode::TranslationRotation => 3,
            WarpMode::TranslationRotationScale => 4,
            WarpMode::Affine => 6,
            WarpMode::Homography => 8,
        }
    }
}

/// A parametric mapping from the reference quad's frame to the target
/// quad's frame. Constructed from a pair of quads; only the optimizer
/// updates the parameters afterwards, through [`Warp::with_params`].
///
/// The similarity/affine families warp positions relative to the reference
/// centroid, which keeps their parameters well-scaled for the optimizer.
#[derive(Clone, Debug)]
pub enum Warp {
    /// `x2 = x + t`.
    Translation { t: Vec2 },
    /// `x2 = (1 + s) * (x - c) + c + t` with `params = (tx, ty, s)`.
    TranslationScale { center: Point2, params: Vec3 },
    /// `x2 = R(theta) * (x - c) + c + t` with `params = (tx, ty, theta)`.
    TranslationRotation { center: Point2, params: Vec3 },
    /// `x2 = (1 + s) * R(theta) * (x - c) + c + t`
    /// with `params = (tx, ty, theta, s)`.
    TranslationRotationScale { center: Point2, params: Vec4 },
    /// `x2 = A * (x - c) + c + t`
    /// with `params = (tx, ty, a11, a12, a21, a22)`.
    Affine { center: Point2, params: Vec6 },
    /// Projective map with `h33` fixed to 1, parameters row-major.
    Homography { params: Vec8 },
}

impl Warp {
    /// Closed-form fit of a warp of the given family mapping `q1` onto `q2`.
    ///
    /// Translation uses the corner-0 difference; the similarity families
    /// use centroid/scale differences and a 2x2 orthogonal Procrustes fit
    /// for the rotation; affine is a centered least-squares fit; homography
    /// is the exact 4-point estimate. Returns `None` for degenerate quads
    /// (collapsed corners, collinear homography corners).
    pub fn from_quads(mode: WarpMode, q1: &Quad, q2: &Quad) -> Option<Warp> {
        match mode {
            WarpMode::Translation => {
                Some(Warp::Translation {
                    t: q2.corners[0] - q1.corners[0],
                })
            }
            WarpMode::TranslationScale => {
                let center = q1.centroid();
                let t = q2.centroid() - center;
                let scale1 = q1.scale();
                if scale1 <= 0.0 {
                    return None;
                }
                let s = q2.scale() / scale1 - 1.0;
                Some(Warp::TranslationScale {
                    center,
                    params: Vec3::new(t.x, t.y, s),
                })
            }
            WarpMode::TranslationRotation => {
                let center = q1.centroid();
                let t = q2.centroid() - center;
                let theta = rotation_between(q1, q2)?;
                Some(Warp::TranslationRotation {
                    center,
                    params: Vec3::new(t.x, t.y, theta),
                })
            }
            WarpMode::TranslationRotationScale => {
                let center = q1.centroid();
                let t = q2.centroid() - center;
                let scale1 = q1.scale();
                if scale1 <= 0.0 {
                    return None;
                }
                let s = q2.scale() / scale1 - 1.0;
                let theta = rotation_between(q1, q2)?;
                Some(Warp::TranslationRotationScale {
                    center,
                    params: Vec4::new(t.x, t.y, theta, s),
                })
            }
            WarpMode::Affine => {
                let center = q1.centroid();
                let t = q2.centroid() - center;
                let a = affine_between(q1, q2)?;
                Some(Warp::Affine {
                    center,
                    params: Vec6::new(t.x, t.y, a.m11, a.m12, a.m21, a.m22),
                })
            }
            WarpMode::Homography => {
                let h = linear::homography_from_4_points(&q1.corners, &q2.corners)?;
                Some(Warp::Homography {
                    params: homography_params(&h),
                })
            }
        }
    }

    pub fn mode(&self) -> WarpMode {
        match self {
            Warp::Translation { .. } => WarpMode::Translation,
            Warp::TranslationScale { .. } => WarpMode::TranslationScale,
            Warp::TranslationRotation { .. } => WarpMode::TranslationRotation,
            Warp::TranslationRotationScale { .. } => WarpMode::TranslationRotationScale,
            Warp::Affine { .. } => WarpMode::Affine,
            Warp::Homography { .. } => WarpMode::Homography,
        }
    }

    pub fn nb_params(&self) -> usize {
        self.mode().nb_params()
    }

    /// Current parameter vector, in the layout documented on each variant.
    pub fn params(&self) -> VecX {
        match self {
            Warp::Translation { t } => VecX::from_column_slice(t.as_slice()),
            Warp::TranslationScale { params, .. } => VecX::from_column_slice(params.as_slice()),
            Warp::TranslationRotation { params, .. } => VecX::from_column_slice(params.as_slice()),
            Warp::TranslationRotationScale { params, .. } => {
                VecX::from_column_slice(params.as_slice())
            }
            Warp::Affine { params, .. } => VecX::from_column_slice(params.as_slice()),
            Warp::Homography { params } => VecX::from_column_slice(params.as_slice()),
        }
    }

    /// Same warp family and center, new parameters.
    /// `params` must have `nb_params` entries.
    pub fn with_params(&self, params: &VecX) -> Warp {
        match self {
            Warp::Translation { .. } => Warp::Translation {
                t: Vec2::new(params[0], params[1]),
            },
            Warp::TranslationScale { center, .. } => Warp::TranslationScale {
                center: *center,
                params: Vec3::new(params[0], params[1], params[2]),
            },
            Warp::TranslationRotation { center, .. } => Warp::TranslationRotation {
                center: *center,
                params: Vec3::new(params[0], params[1], params[2]),
            },
            Warp::TranslationRotationScale { center, .. } => Warp::TranslationRotationScale {
                center: *center,
                params: Vec4::new(params[0], params[1], params[2], params[3]),
            },
            Warp::Affine { center, .. } => Warp::Affine {
                center: *center,
                params: Vec6::new(
                    params[0], params[1], params[2], params[3], params[4], params[5],
                ),
            },
            Warp::Homography { .. } => {
                let mut p = Vec8::zeros();
                for i in 0..8 {
                    p[i] = params[i];
                }
                Warp::Homography { params: p }
            }
        }
    }

    /// Pure forward evaluation: map `(x, y)` from the reference frame to
    /// the target frame.
    pub fn forward(&self, x: Float, y: Float) -> (Float, Float) {
        match self {
            Warp::Translation { t } => (x + t.x, y + t.y),
            Warp::TranslationScale { center, params } => {
                let scale = 1.0 + params[2];
                (
                    scale * (x - center.x) + center.x + params[0],
                    scale * (y - center.y) + center.y + params[1],
                )
            }
            Warp::TranslationRotation { center, params } => {
                let (sin, cos) = params[2].sin_cos();
                let dx = x - center.x;
                let dy = y - center.y;
                (
                    cos * dx - sin * dy + center.x + params[0],
                    sin * dx + cos * dy + center.y + params[1],
                )
            }
            Warp::TranslationRotationScale { center, params } => {
                let (sin, cos) = params[2].sin_cos();
                let scale = 1.0 + params[3];
                let dx = x - center.x;
                let dy = y - center.y;
                (
                    scale * (cos * dx - sin * dy) + center.x + params[0],
                    scale * (sin * dx + cos * dy) + center.y + params[1],
                )
            }
            Warp::Affine { center, params } => {
                let dx = x - center.x;
                let dy = y - center.y;
                (
                    params[2] * dx + params[3] * dy + center.x + params[0],
                    params[4] * dx + params[5] * dy + center.y + params[1],
                )
            }
            Warp::Homography { params } => {
                let w = params[6] * x + params[7] * y + 1.0;
                (
                    (params[0] * x + params[1] * y + params[2]) / w,
                    (params[3] * x + params[4] * y + params[5]) / w,
                )
            }
        }
    }

    /// Analytic Jacobian of `forward` with respect to the parameters,
    /// as a 2 x nb_params matrix (row 0: d x2 / d p, row 1: d y2 / d p).
    ///
    /// The optimizer chains these with the sampled image gradients, which
    /// is the whole differentiation story of the photometric cost.
    pub fn param_jacobian(&self, x: Float, y: Float) -> MatX {
        match self {
            Warp::Translation { .. } => {
                MatX::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0])
            }
            Warp::TranslationScale { center, .. } => {
                let dx = x - center.x;
                let dy = y - center.y;
                #[rustfmt::skip]
                let jac = MatX::from_row_slice(2, 3, &[
                    1.0, 0.0, dx,
                    0.0, 1.0, dy,
                ]);
                jac
            }
            Warp::TranslationRotation { center, params } => {
                let (sin, cos) = params[2].sin_cos();
                let dx = x - center.x;
                let dy = y - center.y;
                #[rustfmt::skip]
                let jac = MatX::from_row_slice(2, 3, &[
                    1.0, 0.0, -sin * dx - cos * dy,
                    0.0, 1.0,  cos * dx - sin * dy,
                ]);
                jac
            }
            Warp::TranslationRotationScale { center, params } => {
                let (sin, cos) = params[2].sin_cos();
                let scale = 1.0 + params[3];
                let dx = x - center.x;
                let dy = y - center.y;
                #[rustfmt::skip]
                let jac = MatX::from_row_slice(2, 4, &[
                    1.0, 0.0, scale * (-sin * dx - cos * dy), cos * dx - sin * dy,
                    0.0, 1.0, scale * ( cos * dx - sin * dy), sin * dx + cos * dy,
                ]);
                jac
            }
            Warp::Affine { center, .. } => {
                let dx = x - center.x;
                let dy = y - center.y;
                #[rustfmt::skip]
                let jac = MatX::from_row_slice(2, 6, &[
                    1.0, 0.0, dx, dy, 0.0, 0.0,
                    0.0, 1.0, 0.0, 0.0, dx, dy,
                ]);
                jac
            }
            Warp::Homography { params } => {
                let w = params[6] * x + params[7] * y + 1.0;
                let (x2, y2) = self.forward(x, y);
                #[rustfmt::skip]
                let jac = MatX::from_row_slice(2, 8, &[
                    x / w, y / w, 1.0 / w, 0.0, 0.0, 0.0, -x2 * x / w, -x2 * y / w,
                    0.0, 0.0, 0.0, x / w, y / w, 1.0 / w, -y2 * x / w, -y2 * y / w,
                ]);
                jac
            }
        }
    }
}

/// Rotation angle of the orthogonal Procrustes fit
/// between the centered corners of two quads.
fn rotation_between(q1: &Quad, q2: &Quad) -> Option<Float> {
    let c1 = q1.centroid();
    let c2 = q2.centroid();
    let mut correlation = Mat2::zeros();
    for i in 0..4 {
        let p = q1.corners[i] - c1;
        let q = q2.corners[i] - c2;
        correlation += q * p.transpose();
    }
    let rotation = linear::procrustes_rotation_2x2(&correlation)?;
    Some(rotation.m21.atan2(rotation.m11))
}

/// Least-squares 2x2 linear map between the centered corners of two quads:
/// `A = (sum q_i p_i^T) (sum p_i p_i^T)^-1`.
fn affine_between(q1: &Quad, q2: &Quad) -> Option<Mat2> {
    let c1 = q1.centroid();
    let c2 = q2.centroid();
    let mut cross = Mat2::zeros();
    let mut auto = Mat2::zeros();
    for i in 0..4 {
        let p = q1.corners[i] - c1;
        let q = q2.corners[i] - c2;
        cross += q * p.transpose();
        auto += p * p.transpose();
    }
    let auto_inv = auto.try_inverse()?;
    let a = cross * auto_inv;
    if a.iter().all(|x| x.is_finite()) {
        Some(a)
    } else {
        None
    }
}

/// Flatten a `h33 == 1` homography matrix into the 8-parameter layout.
fn homography_params(h: &Mat3) -> Vec8 {
    let mut p = Vec8::zeros();
    p[0] = h.m11;
    p[1] = h.m12;
    p[2] = h.m13;
    p[3] = h.m21;
    p[4] = h.m22;
    p[5] = h.m23;
    p[6] = h.m31;
    p[7] = h.m32;
    p
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn reference_quad() -> Quad {
        Quad::from_arrays(&[10.0, 20.0, 21.0, 9.0], &[10.0, 11.0, 20.0, 19.0])
    }

    fn transformed(q: &Quad, f: impl Fn(Point2) -> Point2) -> Quad {
        let mut corners = q.corners;
        for c in corners.iter_mut() {
            *c = f(*c);
        }
        Quad { corners }
    }

    fn assert_corners_map(warp: &Warp, q1: &Quad, q2: &Quad, epsilon: Float) {
        for i in 0..4 {
            let (x, y) = warp.forward(q1.corners[i].x, q1.corners[i].y);
            assert_relative_eq!(x, q2.corners[i].x, epsilon = epsilon);
            assert_relative_eq!(y, q2.corners[i].y, epsilon = epsilon);
        }
    }

    #[test]
    fn translation_fit_maps_corners() {
        let q1 = reference_quad();
        let q2 = transformed(&q1, |p| Point2::new(p.x + 3.5, p.y - 1.5));
        let warp = Warp::from_quads(WarpMode::Translation, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-9);
    }

    #[test]
    fn translation_scale_fit_maps_corners() {
        let q1 = reference_quad();
        let c = q1.centroid();
        let q2 = transformed(&q1, |p| {
            Point2::new(1.3 * (p.x - c.x) + c.x + 2.0, 1.3 * (p.y - c.y) + c.y - 1.0)
        });
        let warp = Warp::from_quads(WarpMode::TranslationScale, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-9);
    }

    #[test]
    fn translation_rotation_fit_maps_corners() {
        let q1 = reference_quad();
        let c = q1.centroid();
        let theta: Float = 0.4;
        let (sin, cos) = theta.sin_cos();
        let q2 = transformed(&q1, |p| {
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            Point2::new(
                cos * dx - sin * dy + c.x + 4.0,
                sin * dx + cos * dy + c.y + 2.0,
            )
        });
        let warp = Warp::from_quads(WarpMode::TranslationRotation, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-9);
    }

    #[test]
    fn translation_rotation_scale_fit_maps_corners() {
        let q1 = reference_quad();
        let c = q1.centroid();
        let theta: Float = -0.25;
        let (sin, cos) = theta.sin_cos();
        let scale = 0.8;
        let q2 = transformed(&q1, |p| {
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            Point2::new(
                scale * (cos * dx - sin * dy) + c.x - 3.0,
                scale * (sin * dx + cos * dy) + c.y + 1.0,
            )
        });
        let warp = Warp::from_quads(WarpMode::TranslationRotationScale, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-9);
    }

    #[test]
    fn affine_fit_maps_corners() {
        let q1 = reference_quad();
        let c = q1.centroid();
        let q2 = transformed(&q1, |p| {
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            Point2::new(
                1.1 * dx + 0.2 * dy + c.x + 1.0,
                -0.1 * dx + 0.9 * dy + c.y - 2.0,
            )
        });
        let warp = Warp::from_quads(WarpMode::Affine, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-9);
    }

    #[test]
    fn homography_fit_maps_corners() {
        let q1 = reference_quad();
        let q2 = Quad::from_arrays(&[12.0, 23.5, 22.0, 8.5], &[9.0, 10.5, 22.0, 20.0]);
        let warp = Warp::from_quads(WarpMode::Homography, &q1, &q2).unwrap();
        assert_corners_map(&warp, &q1, &q2, 1e-7);
    }

    #[test]
    fn params_with_params_roundtrip() {
        let q1 = reference_quad();
        let q2 = Quad::from_arrays(&[12.0, 23.5, 22.0, 8.5], &[9.0, 10.5, 22.0, 20.0]);
        for &mode in &[
            WarpMode::Translation,
            WarpMode::TranslationScale,
            WarpMode::TranslationRotation,
            WarpMode::TranslationRotationScale,
            WarpMode::Affine,
            WarpMode::Homography,
        ] {
            let warp = Warp::from_quads(mode, &q1, &q2).unwrap();
            let params = warp.params();
            assert_eq!(params.len(), mode.nb_params());
            let rebuilt = warp.with_params(&params);
            let (x, y) = warp.forward(15.0, 14.0);
            let (xr, yr) = rebuilt.forward(15.0, 14.0);
            assert_relative_eq!(x, xr);
            assert_relative_eq!(y, yr);
        }
    }

    #[test]
    fn param_jacobians_match_finite_differences() {
        let q1 = reference_quad();
        let q2 = Quad::from_arrays(&[12.0, 23.5, 22.0, 8.5], &[9.0, 10.5, 22.0, 20.0]);
        let step = 1e-6;
        for &mode in &[
            WarpMode::Translation,
            WarpMode::TranslationScale,
            WarpMode::TranslationRotation,
            WarpMode::TranslationRotationScale,
            WarpMode::Affine,
            WarpMode::Homography,
        ] {
            let warp = Warp::from_quads(mode, &q1, &q2).unwrap();
            let (x, y) = (16.0, 13.0);
            let jac = warp.param_jacobian(x, y);
            let params = warp.params();
            for p in 0..mode.nb_params() {
                let mut plus = params.clone();
                let mut minus = params.clone();
                plus[p] += step;
                minus[p] -= step;
                let (xp, yp) = warp.with_params(&plus).forward(x, y);
                let (xm, ym) = warp.with_params(&minus).forward(x, y);
                assert_relative_eq!(jac[(0, p)], (xp - xm) / (2.0 * step), epsilon = 1e-4);
                assert_relative_eq!(jac[(1, p)], (yp - ym) / (2.0 * step), epsilon = 1e-4);
            }
        }
    }
}
