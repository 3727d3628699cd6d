// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Guiding trait to implement iterative optimization algorithms.
//!
//! The warp tracker minimizes a photometric cost with Levenberg-Marquardt
//! built on this skeleton. The trait does not know anything about images:
//! it only orchestrates the step / evaluate / decide loop, so the same
//! skeleton fits any small nonlinear least-squares problem.

/// Enum used to indicate if iterations should continue or stop.
/// Must be returned by the stop_criterion function.
pub enum Continue {
    /// Stop iterations.
    Stop,
    /// Continue iterations.
    Forward,
}

/// An `OptimizerState<Observations, EvalState, Model, Error>` is capable of
/// iteratively minimizing an energy function, if provided few functions
/// that are evaluated during iterations.
///
/// Simple description of the generic types:
///
/// * `Observations`: the data used as reference during energy evaluations.
///   For image alignment this is the precomputed source patch and the
///   destination image.
/// * `EvalState`: evaluation of a new model, possibly partial.
///   Being able to represent a partial evaluation is useful to short-circuit
///   expensive computations when we already know we are going to backtrack
///   (typically when the new energy is higher than the previous one).
/// * `Model`: the model of what you are trying to optimize,
///   e.g. the parameter vector of a warp.
/// * `Error`: reason why a step could not be computed,
///   e.g. a singular linear system or an out-of-bounds warp.
pub trait OptimizerState<Observations, EvalState, Model, Error>
where
    Self: std::marker::Sized,
{
    /// Initialize the optimizer state.
    fn init(obs: &Observations, model: Model) -> Result<Self, Error>;

    /// Compute the iteration step from the current optimizer state.
    /// In case of error, iterations are stopped
    /// and `iterative_solve` also returns the error.
    fn step(&self) -> Result<Model, Error>;

    /// Evaluate the model. Returns an `EvalState` and not a full `Self`
    /// so that implementations may short-circuit the evaluation.
    fn eval(&self, obs: &Observations, new_model: Model) -> EvalState;

    /// Function deciding if iterations should continue.
    /// Also returns the state used for the next iteration, or returned if we stop.
    fn stop_criterion(self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue);

    /// Iteratively solve the optimization problem,
    /// with the functions provided by the trait implementation.
    /// Returns the final state and the number of iterations.
    fn iterative_solve(obs: &Observations, initial_model: Model) -> Result<(Self, usize), Error> {
        let mut state = Self::init(obs, initial_model)?;
        let mut nb_iter = 0;
        loop {
            nb_iter += 1;
            let new_model = state.step()?;
            let eval_state = state.eval(obs, new_model);
            let (kept_state, continuation) = state.stop_criterion(nb_iter, eval_state);
            state = kept_state;
            if let Continue::Stop = continuation {
                return Ok((state, nb_iter));
            }
        }
    }
}
