// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Quadrilateral patch footprints.

use crate::misc::type_aliases::{Float, Point2, Vec2};

/// Four ordered corners, conventionally clockwise from top-left.
/// Only consumed by the trackers, never mutated in place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point2; 4],
}

impl Quad {
    /// Build a quad from the first 4 entries of coordinate arrays,
    /// the layout used by the warp tracker call contract.
    pub fn from_arrays(x: &[Float], y: &[Float]) -> Self {
        let corner = |i: usize| Point2::new(x[i], y[i]);
        Self {
            corners: [corner(0), corner(1), corner(2), corner(3)],
        }
    }

    /// Mean of the 4 corners.
    pub fn centroid(&self) -> Point2 {
        let sum = self
            .corners
            .iter()
            .fold(Vec2::zeros(), |acc, p| acc + p.coords);
        Point2::from(0.25 * sum)
    }

    /// Mean distance of the corners from the centroid.
    /// This is the natural scale of the patch, used by the similarity
    /// warp fits.
    pub fn scale(&self) -> Float {
        let centroid = self.centroid();
        let sum: Float = self
            .corners
            .iter()
            .map(|p| (p - centroid).norm())
            .sum();
        0.25 * sum
    }

    /// Is `(x, y)` inside the quad?
    ///
    /// Same-side test: the cross products of each edge with the vector to
    /// the point must all share a sign, so both windings are accepted.
    /// Used to mask the brute-force initialization pattern to the actual
    /// patch footprint.
    pub fn contains(&self, x: Float, y: Float) -> bool {
        let p = Point2::new(x, y);
        let mut sign = 0.0;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let edge = b - a;
            let to_point = p - a;
            let cross = edge.x * to_point.y - edge.y * to_point.x;
            if cross != 0.0 {
                if sign != 0.0 && cross.signum() != sign {
                    return false;
                }
                sign = cross.signum();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Quad {
        Quad::from_arrays(&[0.0, 2.0, 2.0, 0.0], &[0.0, 0.0, 2.0, 2.0])
    }

    #[test]
    fn centroid_of_square() {
        let centroid = unit_square().centroid();
        assert_relative_eq!(centroid.x, 1.0);
        assert_relative_eq!(centroid.y, 1.0);
    }

    #[test]
    fn scale_of_square() {
        // Corners are all at distance sqrt(2) from the centroid.
        assert_relative_eq!(unit_square().scale(), (2.0 as Float).sqrt());
    }

    #[test]
    fn contains_interior_and_rejects_exterior() {
        let quad = unit_square();
        assert!(quad.contains(1.0, 1.0));
        assert!(quad.contains(0.1, 1.9));
        assert!(!quad.contains(-0.1, 1.0));
        assert!(!quad.contains(1.0, 2.1));
        assert!(!quad.contains(3.0, 3.0));
    }

    #[test]
    fn contains_works_for_both_windings() {
        let clockwise = unit_square();
        let counter = Quad::from_arrays(&[0.0, 0.0, 2.0, 2.0], &[0.0, 2.0, 2.0, 0.0]);
        assert!(clockwise.contains(0.5, 0.5));
        assert!(counter.contains(0.5, 0.5));
        assert!(!counter.contains(2.5, 0.5));
    }

    #[test]
    fn contains_skewed_quad() {
        let quad = Quad::from_arrays(&[1.0, 5.0, 6.0, 2.0], &[1.0, 2.0, 6.0, 5.0]);
        assert!(quad.contains(3.5, 3.5));
        assert!(!quad.contains(1.0, 5.5));
    }
}
