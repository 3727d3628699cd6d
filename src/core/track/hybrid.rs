// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Chain a robust coarse tracker with a precise fine tracker.
//!
//! Typical pairing: brute-force search for the rough integer position,
//! then a Newton or LM tracker for the sub-pixel refinement. The fine
//! stage is only trusted while it stays close to the coarse result; a
//! large refinement shift means it diverged rather than refined.

use log::debug;

use crate::core::track::RegionTracker;
use crate::misc::type_aliases::{Float, MatX};

/// Maximum distance the fine stage may move away from the coarse result.
const MAX_REFINEMENT_SHIFT: Float = 2.0;

pub struct HybridTracker {
    coarse: Box<dyn RegionTracker>,
    fine: Box<dyn RegionTracker>,
}

impl HybridTracker {
    pub fn new(coarse: Box<dyn RegionTracker>, fine: Box<dyn RegionTracker>) -> Self {
        Self { coarse, fine }
    }
}

impl RegionTracker for HybridTracker {
    fn track(
        &self,
        image1: &MatX,
        image2: &MatX,
        x1: Float,
        y1: Float,
        x2: &mut Float,
        y2: &mut Float,
    ) -> bool {
        let mut coarse_x = *x2;
        let mut coarse_y = *y2;
        if !self
            .coarse
            .track(image1, image2, x1, y1, &mut coarse_x, &mut coarse_y)
        {
            debug!("hybrid: coarse stage failed");
            return false;
        }

        let mut fine_x = coarse_x;
        let mut fine_y = coarse_y;
        if !self
            .fine
            .track(image1, image2, x1, y1, &mut fine_x, &mut fine_y)
        {
            debug!("hybrid: fine stage failed");
            return false;
        }

        let shift = ((fine_x - coarse_x).powi(2) + (fine_y - coarse_y).powi(2)).sqrt();
        if shift >= MAX_REFINEMENT_SHIFT {
            debug!(
                "hybrid: fine stage drifted {} px from the coarse result",
                shift
            );
            return false;
        }
        *x2 = fine_x;
        *y2 = fine_y;
        true
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    /// Test double reporting a fixed displacement from the guess.
    struct FixedOffset {
        dx: Float,
        dy: Float,
        succeed: bool,
    }

    impl RegionTracker for FixedOffset {
        fn track(
            &self,
            _image1: &MatX,
            _image2: &MatX,
            _x1: Float,
            _y1: Float,
            x2: &mut Float,
            y2: &mut Float,
        ) -> bool {
            *x2 += self.dx;
            *y2 += self.dy;
            self.succeed
        }
    }

    fn stub(dx: Float, dy: Float, succeed: bool) -> Box<dyn RegionTracker> {
        Box::new(FixedOffset { dx, dy, succeed })
    }

    #[test]
    fn close_refinement_is_accepted() {
        let image = MatX::zeros(16, 16);
        let tracker = HybridTracker::new(stub(5.0, 0.0, true), stub(0.5, 0.25, true));
        let mut x2 = 4.0;
        let mut y2 = 4.0;
        assert!(tracker.track(&image, &image, 4.0, 4.0, &mut x2, &mut y2));
        assert_relative_eq!(x2, 9.5);
        assert_relative_eq!(y2, 4.25);
    }

    #[test]
    fn divergent_refinement_fails_even_when_both_stages_succeed() {
        let image = MatX::zeros(16, 16);
        // Fine stage moves exactly 2 px away: at the threshold, rejected.
        let tracker = HybridTracker::new(stub(5.0, 0.0, true), stub(2.0, 0.0, true));
        let mut x2 = 4.0;
        let mut y2 = 4.0;
        assert!(!tracker.track(&image, &image, 4.0, 4.0, &mut x2, &mut y2));
    }

    #[test]
    fn coarse_failure_fails() {
        let image = MatX::zeros(16, 16);
        let tracker = HybridTracker::new(stub(0.0, 0.0, false), stub(0.0, 0.0, true));
        let mut x2 = 4.0;
        let mut y2 = 4.0;
        assert!(!tracker.track(&image, &image, 4.0, 4.0, &mut x2, &mut y2));
    }

    #[test]
    fn fine_failure_fails() {
        let image = MatX::zeros(16, 16);
        let tracker = HybridTracker::new(stub(0.0, 0.0, true), stub(0.1, 0.0, false));
        let mut x2 = 4.0;
        let mut y2 = 4.0;
        assert!(!tracker.track(&image, &image, 4.0, 4.0, &mut x2, &mut y2));
    }
}
