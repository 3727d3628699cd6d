// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coarse-to-fine wrapper around any point tracker.
//!
//! A displacement too large for the wrapped tracker's window at full
//! resolution shrinks by 2 at every pyramid level, so the coarsest level
//! catches it and each finer level only refines. An intermediate level is
//! allowed to fail (its estimate is simply kept); only a failure at full
//! resolution fails the whole track.

use log::debug;

use crate::core::multires::mean_pyramid;
use crate::core::track::RegionTracker;
use crate::misc::type_aliases::{Float, MatX};

pub struct PyramidTracker {
    tracker: Box<dyn RegionTracker>,
    num_levels: usize,
}

impl PyramidTracker {
    pub fn new(tracker: Box<dyn RegionTracker>, num_levels: usize) -> Self {
        Self {
            tracker,
            num_levels,
        }
    }
}

impl RegionTracker for PyramidTracker {
    fn track(
        &self,
        image1: &MatX,
        image2: &MatX,
        x1: Float,
        y1: Float,
        x2: &mut Float,
        y2: &mut Float,
    ) -> bool {
        let pyramid1 = mean_pyramid(self.num_levels, image1.clone());
        let pyramid2 = mean_pyramid(self.num_levels, image2.clone());
        let levels = pyramid1.len().min(pyramid2.len());

        // Shrink the guess to one level beyond the coarsest; the loop's
        // doubling brings it back to each level's resolution in turn.
        let scale = (1 << levels) as Float;
        let mut gx = *x2 / scale;
        let mut gy = *y2 / scale;
        for level in (0..levels).rev() {
            gx *= 2.0;
            gy *= 2.0;
            let level_scale = (1 << level) as Float;
            let mut tx = gx;
            let mut ty = gy;
            let succeeded = self.tracker.track(
                &pyramid1[level],
                &pyramid2[level],
                x1 / level_scale,
                y1 / level_scale,
                &mut tx,
                &mut ty,
            );
            if succeeded {
                gx = tx;
                gy = ty;
            } else if level == 0 {
                debug!("pyramid: tracking failed at full resolution");
                return false;
            } else {
                // Keep the previous estimate: a coarse-level hiccup
                // (e.g. a window clipped by the border) must not abort
                // the whole search.
                debug!("pyramid: keeping previous estimate at level {}", level);
            }
        }
        *x2 = gx;
        *y2 = gy;
        true
    }
}
