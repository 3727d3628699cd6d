// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The trackers: follow a point or a warped patch between two frames.
//!
//! All point trackers implement [`RegionTracker`] so that the composite
//! trackers (pyramid, hybrid) can wrap any of them.

pub mod brute;
pub mod hybrid;
pub mod inverse_compositional;
pub mod newton;
pub mod pyramid;
pub mod region;
pub mod reversible;

use crate::misc::type_aliases::{Float, MatX};

/// Contract shared by every point tracker.
///
/// `(x2, y2)` is both the initial guess and the output: on success it holds
/// the tracked position in `image2`, on failure it is left at whatever the
/// tracker last considered (callers must not trust it then).
pub trait RegionTracker {
    fn track(
        &self,
        image1: &MatX,
        image2: &MatX,
        x1: Float,
        y1: Float,
        x2: &mut Float,
        y2: &mut Float,
    ) -> bool;
}

/// Is the whole sampling window around `(x, y)` inside the image?
///
/// The window is `[floor(coord) - half_window - 1, ceil(coord) + half_window + 1]`
/// on each axis: one pixel of margin for bilinear sampling on both sides.
/// Trackers check this against image1 before starting and against image2
/// before every iteration, so walking outside the destination image fails
/// immediately instead of extrapolating.
pub fn window_in_bounds(image: &MatX, x: Float, y: Float, half_window: usize) -> bool {
    let margin = (half_window + 1) as Float;
    let (nrows, ncols) = image.shape();
    x.floor() - margin >= 0.0
        && y.floor() - margin >= 0.0
        && x.ceil() + margin <= (ncols - 1) as Float
        && y.ceil() + margin <= (nrows - 1) as Float
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn window_bounds_margins() {
        let image = MatX::zeros(20, 30);
        assert!(window_in_bounds(&image, 15.0, 10.0, 4));
        // One pixel of bilinear margin is required on each side.
        assert!(window_in_bounds(&image, 5.0, 5.0, 4));
        assert!(!window_in_bounds(&image, 4.9, 5.0, 4));
        assert!(!window_in_bounds(&image, 5.0, 4.9, 4));
        assert!(!window_in_bounds(&image, 24.1, 10.0, 4));
        assert!(!window_in_bounds(&image, 15.0, 14.1, 4));
    }

    #[test]
    fn window_bounds_fractional_coordinates() {
        let image = MatX::zeros(20, 20);
        // floor/ceil widen the window for fractional positions.
        assert!(window_in_bounds(&image, 5.5, 5.0, 4));
        assert!(!window_in_bounds(&image, 4.5, 5.0, 4));
        assert!(window_in_bounds(&image, 13.5, 13.0, 4));
        assert!(!window_in_bounds(&image, 14.5, 13.0, 4));
    }
}
