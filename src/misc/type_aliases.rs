// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Type aliases for common types used all over the code base.

use nalgebra as na;

/// Tracked positions are sub-pixel, so the whole library computes in f64.
pub type Float = f64;

/// A point with two Float coordinates.
pub type Point2 = na::Point2<Float>;

/// A vector with two Float coordinates.
pub type Vec2 = na::Vector2<Float>;
/// A vector with three Float coordinates.
pub type Vec3 = na::Vector3<Float>;
/// A vector with four Float coordinates.
pub type Vec4 = na::Vector4<Float>;
/// A vector with six Float coordinates.
pub type Vec6 = na::Vector6<Float>;
/// A vector with eight Float coordinates (homography parameters).
pub type Vec8 = na::SVector<Float, 8>;
/// A vector with a dynamic number of Float coordinates.
pub type VecX = na::DVector<Float>;

/// A 2x2 matrix of Floats.
pub type Mat2 = na::Matrix2<Float>;
/// A 3x3 matrix of Floats.
pub type Mat3 = na::Matrix3<Float>;
/// A matrix of dynamic dimensions.
pub type MatX = na::DMatrix<Float>;
