// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Region tracking in Rust (rtrs)
//!
//! Follow a pixel neighborhood, either a single point with a square window
//! or a quadrilateral patch under a parametric warp, from one video frame
//! to the next. This is the 2D half of a match-moving pipeline: the caller
//! asks "this point/patch was here in image A and roughly there in image B,
//! where is it exactly, and how confident are we?".
//!
//! The `core::track` module holds the trackers; everything else is the
//! numeric plumbing they share (sampling, blurring, pyramids, warps).

pub mod core;
pub mod math;
pub mod misc;
