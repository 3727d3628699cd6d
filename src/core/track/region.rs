// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generalized quad tracker: follow a quadrilateral patch under a
//! parametric warp.
//!
//! The patch is resampled on a rectangular canonical grid mapped onto the
//! reference quad, so the sampling resolution is decoupled from the quad's
//! shape. A Levenberg-Marquardt solve over the warp parameters minimizes
//! the photometric difference between that precomputed source patch and
//! the destination image, optionally preceded by a brute-force translation
//! search and followed by a correlation gate.

use itertools::izip;
use log::debug;

use crate::core::blur::blurred_image_and_derivatives;
use crate::core::correlation::pearson_correlation;
use crate::core::image::{sample_bilinear, Image};
use crate::core::quad::Quad;
use crate::core::warp::{Warp, WarpMode};
use crate::math::linear::{apply_homography, homography_from_4_points};
use crate::math::optimizer::{Continue, OptimizerState};
use crate::misc::type_aliases::{Float, MatX, Point2, VecX};

/// Configuration of the quad tracker.
pub struct TrackRegionOptions {
    /// Warp family to optimize over.
    pub mode: WarpMode,
    /// Minimum Pearson correlation between the warped source patch and the
    /// destination for the result to count; 0 disables the check.
    pub minimum_correlation: Float,
    /// Iteration budget of the nonlinear solve.
    pub max_iterations: usize,
    /// Split the image gradient 50/50 between source and destination
    /// samples (efficient second-order minimization). Usually worth it:
    /// the convergence basin grows noticeably.
    pub use_esm: bool,
    /// Exhaustive translation search before the nonlinear solve, anchoring
    /// it near the global optimum.
    pub use_brute_initialization: bool,
    /// Divide samples by their patch mean, buying some lighting
    /// invariance.
    pub use_normalized_intensities: bool,
    /// Blur applied to both images before sampling.
    pub sigma: Float,
    /// Number of extra points after the 4 corners in the coordinate
    /// arrays, warped passively along with the quad.
    pub num_extra_points: usize,
    /// Weight of the residual block penalizing corner deviation from the
    /// initial guess (after centroid drift removal); 0 disables it.
    pub regularization_coefficient: Float,
}

impl Default for TrackRegionOptions {
    fn default() -> Self {
        Self {
            mode: WarpMode::Translation,
            minimum_correlation: 0.0,
            max_iterations: 50,
            use_esm: true,
            use_brute_initialization: true,
            use_normalized_intensities: false,
            sigma: 0.9,
            num_extra_points: 0,
            regularization_coefficient: 0.0,
        }
    }
}

/// Why the quad tracker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Tolerance reached; the result is trustworthy.
    Convergence,
    /// Iteration budget exhausted without violation; still usable.
    NoConvergence,
    /// The solve never ran (degenerate quad or warp fit).
    DidNotRun,
    /// Singular or non-finite linear algebra during the solve.
    NumericalFailure,
    /// The reference quad is not inside image1.
    SourceOutOfBounds,
    /// The guess quad is not inside image2.
    DestinationOutOfBounds,
    /// A corner warped outside image2 during the solve.
    FellOutOfBounds,
    /// The solve finished but the match does not correlate enough.
    InsufficientCorrelation,
}

impl Termination {
    /// Usable results are worth keeping; everything else should be
    /// retried or dropped by the caller.
    pub fn is_usable(self) -> bool {
        matches!(self, Termination::Convergence | Termination::NoConvergence)
    }
}

/// Outcome of a quad track. The correlation is only meaningful when a
/// minimum correlation was requested.
#[derive(Clone, Copy, Debug)]
pub struct TrackRegionResult {
    pub termination: Termination,
    pub correlation: Float,
}

impl TrackRegionResult {
    fn failed(termination: Termination) -> Self {
        Self {
            termination,
            correlation: 0.0,
        }
    }
}

/// Track the quad `(x1, y1)` from image1 to image2, refining the guess
/// `(x2, y2)` in place. The coordinate slices hold the 4 corners followed
/// by `num_extra_points` passively-warped extra points.
///
/// `image1_mask`, when provided, weights source pixels in [0, 1] and must
/// have image1's dimensions; zero-weight pixels are ignored everywhere
/// (brute search, solve and correlation alike).
#[allow(clippy::too_many_arguments)]
pub fn track_region(
    image1: &MatX,
    image2: &MatX,
    x1: &[Float],
    y1: &[Float],
    options: &TrackRegionOptions,
    image1_mask: Option<&MatX>,
    x2: &mut [Float],
    y2: &mut [Float],
) -> TrackRegionResult {
    let nb_points = 4 + options.num_extra_points;
    assert_eq!(x1.len(), nb_points);
    assert_eq!(y1.len(), nb_points);
    assert_eq!(x2.len(), nb_points);
    assert_eq!(y2.len(), nb_points);

    // 1. Both quads (and extra points) must be sampleable where they are.
    if !all_in_bounds(image1, x1, y1) {
        debug!("track_region: reference points outside image1");
        return TrackRegionResult::failed(Termination::SourceOutOfBounds);
    }
    if !all_in_bounds(image2, x2, y2) {
        debug!("track_region: guess points outside image2");
        return TrackRegionResult::failed(Termination::DestinationOutOfBounds);
    }

    // 2. Blurred intensities and gradients for both frames.
    let img1 = blurred_image_and_derivatives(image1, options.sigma);
    let img2 = blurred_image_and_derivatives(image2, options.sigma);

    // 3. Optional exhaustive translation search to anchor the solve.
    if options.use_brute_initialization {
        if let Some((shift_x, shift_y)) =
            brute_translation_only(image1, image1_mask, image2, options, x1, y1, x2, y2)
        {
            for (x, y) in x2.iter_mut().zip(y2.iter_mut()) {
                *x += shift_x;
                *y += shift_y;
            }
            debug!(
                "track_region: brute initialization shifted guess by ({}, {})",
                shift_x, shift_y
            );
        }
    }

    // 4. Initial warp parameters from the (possibly shifted) quad pair.
    let q1 = Quad::from_arrays(x1, y1);
    let q2 = Quad::from_arrays(x2, y2);
    let warp = match Warp::from_quads(options.mode, &q1, &q2) {
        Some(warp) => warp,
        None => {
            debug!("track_region: degenerate quads, cannot fit a warp");
            return TrackRegionResult::failed(Termination::DidNotRun);
        }
    };

    // 5.-6. Canonical resampling of the source patch, reused unchanged
    // across all solver iterations.
    let patch = match Patch::from_reference(&img1, image1_mask, &q1) {
        Some(patch) => patch,
        None => {
            debug!("track_region: could not resample the reference patch");
            return TrackRegionResult::failed(Termination::DidNotRun);
        }
    };

    // 7. Levenberg-Marquardt over the warp parameters.
    let obs = Obs {
        options,
        img2: &img2,
        warp: &warp,
        patch: &patch,
        corners1: q1.corners,
        init_corners2: q2.corners,
    };
    let termination = match WarpLmState::iterative_solve(&obs, warp.params()) {
        Ok((state, nb_iter)) => {
            debug!("track_region: solver stopped after {} iterations", nb_iter);
            let final_warp = warp.with_params(&state.eval_data.model);
            // 8. Re-warp every reference point through the final warp.
            for i in 0..nb_points {
                let (x, y) = final_warp.forward(x1[i], y1[i]);
                x2[i] = x;
                y2[i] = y;
            }
            match state.aborted {
                Some(termination) => termination,
                None if state.converged => Termination::Convergence,
                None => Termination::NoConvergence,
            }
        }
        Err(SolveError::OutOfBounds) => Termination::FellOutOfBounds,
        Err(SolveError::Numerical) => Termination::NumericalFailure,
    };

    // 9. Correlation gate, overriding an otherwise usable termination.
    if options.minimum_correlation > 0.0 && termination.is_usable() {
        let final_warp =
            Warp::from_quads(options.mode, &q1, &Quad::from_arrays(x2, y2));
        let correlation = final_warp
            .and_then(|w| patch_correlation(&patch, &img2, &w))
            .unwrap_or(0.0);
        if correlation < options.minimum_correlation {
            debug!(
                "track_region: correlation {} below threshold {}",
                correlation, options.minimum_correlation
            );
            return TrackRegionResult {
                termination: Termination::InsufficientCorrelation,
                correlation,
            };
        }
        return TrackRegionResult {
            termination,
            correlation,
        };
    }
    TrackRegionResult {
        termination,
        correlation: 0.0,
    }
}

// Bounds helpers ##############################################################

/// Can `(x, y)` be bilinearly sampled in this image?
fn point_in_image(image: &MatX, x: Float, y: Float) -> bool {
    let (nrows, ncols) = image.shape();
    x >= 0.0 && y >= 0.0 && x <= (ncols - 2) as Float && y <= (nrows - 2) as Float
}

fn all_in_bounds(image: &MatX, xs: &[Float], ys: &[Float]) -> bool {
    xs.iter()
        .zip(ys.iter())
        .all(|(&x, &y)| point_in_image(image, x, y))
}

fn clamp_for_sampling(image: &Image, x: Float, y: Float) -> (Float, Float) {
    let max_x = (image.width() - 2) as Float;
    let max_y = (image.height() - 2) as Float;
    (x.max(0.0).min(max_x), y.max(0.0).min(max_y))
}

// Brute-force initialization ##################################################

/// Exhaustive translation-only search: build the expected destination
/// appearance of the patch by warping image1 through the inverse of the
/// current estimate, then scan every integer position of image2 for the
/// minimum (mask-weighted) sum of absolute differences.
///
/// Returns the shift to apply to the whole guess quad, or `None` when no
/// pattern could be built.
#[allow(clippy::too_many_arguments)]
fn brute_translation_only(
    image1: &MatX,
    image1_mask: Option<&MatX>,
    image2: &MatX,
    options: &TrackRegionOptions,
    x1: &[Float],
    y1: &[Float],
    x2: &[Float],
    y2: &[Float],
) -> Option<(Float, Float)> {
    let q1 = Quad::from_arrays(x1, y1);
    let q2 = Quad::from_arrays(x2, y2);
    // Inverse of the estimated warp: same family, quads swapped.
    let inverse_warp = Warp::from_quads(options.mode, &q2, &q1)?;

    // Bounding box of the guess quad in image2 space.
    let min_x = q2.corners.iter().map(|p| p.x).fold(Float::INFINITY, Float::min);
    let min_y = q2.corners.iter().map(|p| p.y).fold(Float::INFINITY, Float::min);
    let max_x = q2.corners.iter().map(|p| p.x).fold(Float::NEG_INFINITY, Float::max);
    let max_y = q2.corners.iter().map(|p| p.y).fold(Float::NEG_INFINITY, Float::max);
    let origin_x = min_x.floor() as isize;
    let origin_y = min_y.floor() as isize;
    let width = (max_x.ceil() as isize - origin_x + 1) as usize;
    let height = (max_y.ceil() as isize - origin_y + 1) as usize;
    let (nrows2, ncols2) = image2.shape();
    if width == 0 || height == 0 || width > ncols2 || height > nrows2 {
        return None;
    }

    // The pattern lives in image2 space: what the patch should look like
    // there if the current warp estimate were right.
    let mut pattern = vec![0.0; width * height];
    let mut mask = vec![0.0; width * height];
    for r in 0..height {
        for c in 0..width {
            let px = (origin_x + c as isize) as Float;
            let py = (origin_y + r as isize) as Float;
            if !q2.contains(px, py) {
                continue;
            }
            let (sx, sy) = inverse_warp.forward(px, py);
            if !point_in_image(image1, sx, sy) {
                continue;
            }
            let mut weight = 1.0;
            if let Some(m) = image1_mask {
                weight = sample_bilinear(m, sy, sx);
            }
            pattern[r * width + c] = sample_bilinear(image1, sy, sx);
            mask[r * width + c] = weight;
        }
    }
    let mask_sum: Float = mask.iter().sum();
    if mask_sum <= 0.0 {
        return None;
    }

    // Preserved behavior: normalization uses the pattern built from the
    // original reference patch, not the previous frame.
    if options.use_normalized_intensities {
        let weighted: Float = pattern.iter().zip(mask.iter()).map(|(&p, &m)| p * m).sum();
        if weighted.abs() <= Float::EPSILON {
            return None;
        }
        let inverse_mean = mask_sum / weighted;
        for p in pattern.iter_mut() {
            *p *= inverse_mean;
        }
    }

    // Try all possible positions inside image2. Yes, everywhere.
    let mut best_sad = Float::INFINITY;
    let mut best = (0isize, 0isize);
    for r0 in 0..=(nrows2 - height) {
        for c0 in 0..=(ncols2 - width) {
            let mut window_scale = 1.0;
            if options.use_normalized_intensities {
                let mut weighted = 0.0;
                for r in 0..height {
                    for c in 0..width {
                        weighted += mask[r * width + c] * image2[(r0 + r, c0 + c)];
                    }
                }
                if weighted.abs() <= Float::EPSILON {
                    continue;
                }
                window_scale = mask_sum / weighted;
            }
            let mut sad = 0.0;
            for r in 0..height {
                for c in 0..width {
                    let m = mask[r * width + c];
                    if m > 0.0 {
                        let diff =
                            pattern[r * width + c] - window_scale * image2[(r0 + r, c0 + c)];
                        sad += m * diff.abs();
                    }
                }
            }
            if sad < best_sad {
                best_sad = sad;
                best = (r0 as isize, c0 as isize);
            }
        }
    }
    if !best_sad.is_finite() {
        return None;
    }
    Some((
        (best.1 - origin_x) as Float,
        (best.0 - origin_y) as Float,
    ))
}

// Canonical patch #############################################################

/// The source patch resampled on a rectangular canonical grid, plus the
/// image1 position and mask weight of every grid cell. Computed once and
/// reused unchanged across all optimizer iterations.
struct Patch {
    intensity: Vec<Float>,
    gradient_x: Vec<Float>,
    gradient_y: Vec<Float>,
    source_x: Vec<Float>,
    source_y: Vec<Float>,
    mask: Vec<Float>,
    /// Mask-weighted mean intensity, for normalized mode.
    mean: Float,
}

/// Sampling resolution along one quad axis: two samples per pixel of the
/// longer of the two opposing edges. The bilinear interpolation error is
/// periodic with a one pixel period, so half-pixel spacing puts
/// neighboring samples in opposite phases of that error and it cancels
/// from the normal equations instead of biasing the optimum.
fn axis_samples(a: Float, b: Float) -> usize {
    ((2.0 * a.max(b)).ceil() as usize + 1).max(4)
}

impl Patch {
    fn from_reference(img1: &Image, image1_mask: Option<&MatX>, q1: &Quad) -> Option<Patch> {
        let edge = |i: usize, j: usize| (q1.corners[j] - q1.corners[i]).norm();
        let nb_x = axis_samples(edge(0, 1), edge(3, 2));
        let nb_y = axis_samples(edge(0, 3), edge(1, 2));

        // Homography from the canonical rectangle onto the reference quad.
        let rectangle = [
            Point2::new(0.0, 0.0),
            Point2::new((nb_x - 1) as Float, 0.0),
            Point2::new((nb_x - 1) as Float, (nb_y - 1) as Float),
            Point2::new(0.0, (nb_y - 1) as Float),
        ];
        let canonical = homography_from_4_points(&rectangle, &q1.corners)?;

        let nb = nb_x * nb_y;
        let mut patch = Patch {
            intensity: Vec::with_capacity(nb),
            gradient_x: Vec::with_capacity(nb),
            gradient_y: Vec::with_capacity(nb),
            source_x: Vec::with_capacity(nb),
            source_y: Vec::with_capacity(nb),
            mask: Vec::with_capacity(nb),
            mean: 0.0,
        };
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for r in 0..nb_y {
            for c in 0..nb_x {
                let (sx, sy) = apply_homography(&canonical, c as Float, r as Float);
                let inside = sx >= 0.0
                    && sy >= 0.0
                    && sx <= (img1.width() - 2) as Float
                    && sy <= (img1.height() - 2) as Float;
                let mut weight = 0.0;
                let mut intensity = 0.0;
                let mut gx = 0.0;
                let mut gy = 0.0;
                if inside {
                    weight = match image1_mask {
                        Some(m) => sample_bilinear(m, sy, sx),
                        None => 1.0,
                    };
                    intensity = img1.sample_bilinear(sy, sx, 0);
                    gx = img1.sample_bilinear(sy, sx, 1);
                    gy = img1.sample_bilinear(sy, sx, 2);
                }
                patch.intensity.push(intensity);
                patch.gradient_x.push(gx);
                patch.gradient_y.push(gy);
                patch.source_x.push(sx);
                patch.source_y.push(sy);
                patch.mask.push(weight);
                weighted_sum += weight * intensity;
                weight_sum += weight;
            }
        }
        if weight_sum <= 0.0 {
            return None;
        }
        patch.mean = weighted_sum / weight_sum;
        Some(patch)
    }

    fn len(&self) -> usize {
        self.intensity.len()
    }
}

/// Correlation between the source patch and the destination samples under
/// the final warp, fractional mask weights included.
fn patch_correlation(patch: &Patch, img2: &Image, warp: &Warp) -> Option<Float> {
    let samples = izip!(&patch.intensity, &patch.source_x, &patch.source_y, &patch.mask)
        .filter(|(_, _, _, &weight)| weight > 0.0)
        .map(|(&src, &sx, &sy, &weight)| {
            let (x, y) = warp.forward(sx, sy);
            let (x, y) = clamp_for_sampling(img2, x, y);
            (src, img2.sample_bilinear(y, x, 0), weight)
        });
    pearson_correlation(samples)
}

// Levenberg-Marquardt solve ###################################################

/// Reasons the solve cannot proceed at all.
enum SolveError {
    OutOfBounds,
    Numerical,
}

/// Precomputed data available for the optimizer iterations.
struct Obs<'a> {
    options: &'a TrackRegionOptions,
    img2: &'a Image,
    warp: &'a Warp,
    patch: &'a Patch,
    corners1: [Point2; 4],
    init_corners2: [Point2; 4],
}

/// Data resulting of a successful model evaluation.
struct EvalData {
    hessian: MatX,
    gradient: VecX,
    energy: Float,
    model: VecX,
}

/// Either a successfully constructed `EvalData`, a model whose energy got
/// worse, or a model warping a corner out of image2.
enum EvalState {
    Better(EvalData),
    Worse,
    OutOfBounds,
}

/// State of the Levenberg-Marquardt optimizer for the warp parameters.
struct WarpLmState {
    /// Levenberg-Marquardt hessian diagonal coefficient.
    lm_coef: Float,
    eval_data: EvalData,
    max_iterations: usize,
    converged: bool,
    aborted: Option<Termination>,
}

impl WarpLmState {
    /// Energy, gradient and Gauss-Newton hessian of a model.
    /// Fails when a corner of the tracked quad leaves image2 (the caller
    /// must abort, not extrapolate) or when the numbers stop being finite.
    fn eval_model(obs: &Obs, model: &VecX) -> Result<EvalData, SolveError> {
        let warp = obs.warp.with_params(model);
        // Boundary callback of the solve: all 4 corners must stay
        // sampleable in image2.
        for corner in obs.corners1.iter() {
            let (x, y) = warp.forward(corner.x, corner.y);
            let max_x = (obs.img2.width() - 2) as Float;
            let max_y = (obs.img2.height() - 2) as Float;
            if !(x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y) {
                return Err(SolveError::OutOfBounds);
            }
        }

        let patch = obs.patch;
        let nb_params = obs.warp.nb_params();
        let use_esm = obs.options.use_esm;
        let normalized = obs.options.use_normalized_intensities;

        // First pass: sample the destination at every warped grid cell.
        let nb = patch.len();
        let mut dst = vec![0.0; nb];
        let mut dst_gx = vec![0.0; nb];
        let mut dst_gy = vec![0.0; nb];
        let mut dst_weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for i in 0..nb {
            if patch.mask[i] <= 0.0 {
                continue;
            }
            let (x, y) = warp.forward(patch.source_x[i], patch.source_y[i]);
            let (x, y) = clamp_for_sampling(obs.img2, x, y);
            dst[i] = obs.img2.sample_bilinear(y, x, 0);
            dst_gx[i] = obs.img2.sample_bilinear(y, x, 1);
            dst_gy[i] = obs.img2.sample_bilinear(y, x, 2);
            dst_weighted_sum += patch.mask[i] * dst[i];
            weight_sum += patch.mask[i];
        }
        // Means are treated as constants inside one linearization.
        let (src_scale, dst_scale) = if normalized {
            if patch.mean.abs() <= Float::EPSILON || weight_sum <= 0.0 {
                return Err(SolveError::Numerical);
            }
            let dst_mean = dst_weighted_sum / weight_sum;
            if dst_mean.abs() <= Float::EPSILON {
                return Err(SolveError::Numerical);
            }
            (1.0 / patch.mean, 1.0 / dst_mean)
        } else {
            (1.0, 1.0)
        };

        // Second pass: residuals and their parameter Jacobians.
        let mut hessian = MatX::zeros(nb_params, nb_params);
        let mut gradient = VecX::zeros(nb_params);
        let mut energy = 0.0;
        let mut jrow = VecX::zeros(nb_params);
        for i in 0..nb {
            let weight = patch.mask[i];
            if weight <= 0.0 {
                continue;
            }
            let residual = weight * (src_scale * patch.intensity[i] - dst_scale * dst[i]);
            // ESM averages the source and destination gradients instead of
            // attributing the whole image gradient to the destination.
            let (gx, gy) = if use_esm {
                (
                    0.5 * (src_scale * patch.gradient_x[i] + dst_scale * dst_gx[i]),
                    0.5 * (src_scale * patch.gradient_y[i] + dst_scale * dst_gy[i]),
                )
            } else {
                (dst_scale * dst_gx[i], dst_scale * dst_gy[i])
            };
            let jw = warp.param_jacobian(patch.source_x[i], patch.source_y[i]);
            for k in 0..nb_params {
                jrow[k] = -weight * (gx * jw[(0, k)] + gy * jw[(1, k)]);
            }
            energy += residual * residual;
            gradient += &jrow * residual;
            hessian += &jrow * jrow.transpose();
        }

        // Regularization block: 8 residuals pulling the warped corners
        // (minus centroid drift) back towards the initial guess.
        let coefficient = obs.options.regularization_coefficient;
        if coefficient > 0.0 {
            let mut warped = [Point2::new(0.0, 0.0); 4];
            let mut jacobians = Vec::with_capacity(4);
            let mut warped_centroid = Point2::new(0.0, 0.0);
            for (j, corner) in obs.corners1.iter().enumerate() {
                let (x, y) = warp.forward(corner.x, corner.y);
                warped[j] = Point2::new(x, y);
                warped_centroid.x += 0.25 * x;
                warped_centroid.y += 0.25 * y;
                jacobians.push(warp.param_jacobian(corner.x, corner.y));
            }
            let mut mean_jacobian = MatX::zeros(2, nb_params);
            for jac in jacobians.iter() {
                mean_jacobian += jac.scale(0.25);
            }
            let init_centroid = Quad {
                corners: obs.init_corners2,
            }
            .centroid();
            for j in 0..4 {
                for axis in 0..2 {
                    let warped_rel = [warped[j].x - warped_centroid.x, warped[j].y - warped_centroid.y];
                    let init_rel = [
                        obs.init_corners2[j].x - init_centroid.x,
                        obs.init_corners2[j].y - init_centroid.y,
                    ];
                    let residual = coefficient * (warped_rel[axis] - init_rel[axis]);
                    for k in 0..nb_params {
                        jrow[k] = coefficient * (jacobians[j][(axis, k)] - mean_jacobian[(axis, k)]);
                    }
                    energy += residual * residual;
                    gradient += &jrow * residual;
                    hessian += &jrow * jrow.transpose();
                }
            }
        }

        if !energy.is_finite() {
            return Err(SolveError::Numerical);
        }
        Ok(EvalData {
            hessian,
            gradient,
            energy,
            model: model.clone(),
        })
    }
}

impl<'a> OptimizerState<Obs<'a>, EvalState, VecX, SolveError> for WarpLmState {
    fn init(obs: &Obs<'a>, model: VecX) -> Result<Self, SolveError> {
        Ok(Self {
            lm_coef: 0.1,
            eval_data: Self::eval_model(obs, &model)?,
            max_iterations: obs.options.max_iterations,
            converged: false,
            aborted: None,
        })
    }

    /// Compute the Levenberg-Marquardt step from the current state.
    fn step(&self) -> Result<VecX, SolveError> {
        let mut hessian = self.eval_data.hessian.clone();
        for i in 0..hessian.nrows() {
            hessian[(i, i)] *= 1.0 + self.lm_coef;
        }
        let cholesky = hessian.cholesky().ok_or(SolveError::Numerical)?;
        let step = cholesky.solve(&(-&self.eval_data.gradient));
        if !step.iter().all(|x| x.is_finite()) {
            return Err(SolveError::Numerical);
        }
        Ok(&self.eval_data.model + step)
    }

    /// Evaluate the new model, short-circuiting when the energy got worse.
    fn eval(&self, obs: &Obs<'a>, new_model: VecX) -> EvalState {
        match Self::eval_model(obs, &new_model) {
            Err(SolveError::OutOfBounds) => EvalState::OutOfBounds,
            Err(SolveError::Numerical) => EvalState::Worse,
            Ok(eval_data) => {
                if eval_data.energy > self.eval_data.energy {
                    EvalState::Worse
                } else {
                    EvalState::Better(eval_data)
                }
            }
        }
    }

    /// Stop on convergence, abort, or an exhausted iteration budget; adapt
    /// the damping coefficient on the way.
    fn stop_criterion(mut self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue) {
        let too_many_iterations = nb_iter >= self.max_iterations;
        match eval_state {
            EvalState::OutOfBounds => {
                self.aborted = Some(Termination::FellOutOfBounds);
                (self, Continue::Stop)
            }
            EvalState::Worse => {
                if too_many_iterations {
                    (self, Continue::Stop)
                } else {
                    self.lm_coef *= 10.0;
                    (self, Continue::Forward)
                }
            }
            EvalState::Better(eval_data) => {
                let d_energy = self.eval_data.energy - eval_data.energy;
                let step_norm = (&eval_data.model - &self.eval_data.model).norm();
                self.lm_coef *= 0.1;
                self.eval_data = eval_data;
                // Relative function tolerance and parameter tolerance.
                let energy_done = d_energy <= 1e-10 * self.eval_data.energy.max(1e-20);
                let step_done = step_norm <= 1e-10;
                if energy_done || step_done {
                    self.converged = true;
                    (self, Continue::Stop)
                } else if too_many_iterations {
                    (self, Continue::Stop)
                } else {
                    (self, Continue::Forward)
                }
            }
        }
    }
}

// Tests #######################################################################
