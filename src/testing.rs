//! Reference models and utilities useful for benchmarking, debugging and
//! smoke testing.
//!
//! The dynamic models have known solutions, either in closed form or by
//! construction. [`Ar1`] is recommended for first tests. Others can be used
//! for specific conditions (e.g., slow convergence of the window, numerical
//! blow-up or jointly calibrated parameters).

#![allow(unused)]

use std::error::Error as StdError;

use nalgebra::{dmatrix, DVector};
use thiserror::Error;

use crate::{
    core::{Domain, Problem, ProblemError, ResidualSystem, Slices, Solver, System},
    linear::LinearOperator,
    model::{Model, ModelError},
};

/// First-order autoregression towards the steady state,
///
/// ```text
/// x[t] = x̄ + ρ (x[t-1] - x̄).
/// ```
///
/// The path from `x0` is `x̄ + ρ^t (x0 - x̄)`.
#[derive(Debug, Clone, Copy)]
pub struct Ar1 {
    rho: f64,
}

impl Ar1 {
    /// Initializes the model with given persistence.
    pub fn new(rho: f64) -> Self {
        Self { rho }
    }

    /// Builds the model with single variable `x` at given steady state.
    pub fn model(self, steady_state: f64) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["x"])
            .steady_state("x", steady_state)
            .build()
    }

    /// The exact path.
    pub fn path(&self, x0: f64, steady_state: f64, periods: usize) -> Vec<f64> {
        (0..=periods)
            .map(|t| steady_state + self.rho.powi(t as i32) * (x0 - steady_state))
            .collect()
    }
}

impl ResidualSystem for Ar1 {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        let ss = s.steady_state[0];
        out[0] = s.current[0] - ss - self.rho * (s.lagged[0] - ss);
        Ok(())
    }
}

/// Linear model with both backward and forward dependence,
///
/// ```text
/// x[t] = a x[t-1] + b x[t+1] + (1 - a - b) x̄.
/// ```
///
/// For `a + b < 1` and `4ab < 1`, the bounded path from `x0` is
/// `x̄ + μ^t (x0 - x̄)` where `μ` is the stable root of `b μ² - μ + a = 0`
/// (see [`TwoSided::stable_root`]). The information about the terminal
/// condition has to travel backwards through the whole window, which makes
/// the window converge slowly for `a + b` close to one.
#[derive(Debug, Clone, Copy)]
pub struct TwoSided {
    backward: f64,
    forward: f64,
}

impl TwoSided {
    /// Initializes the model with given weights of the neighbors.
    pub fn new(backward: f64, forward: f64) -> Self {
        Self { backward, forward }
    }

    /// Each period is the average of its neighbors. Any linear path is a
    /// solution, so the path is determined by the terminal condition only.
    pub fn interpolation() -> Self {
        Self::new(0.5, 0.5)
    }

    /// Builds the model with single variable `x` at given steady state.
    pub fn model(self, steady_state: f64) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["x"])
            .steady_state("x", steady_state)
            .build()
    }

    /// The linear operator, which is exact for this model, together with the
    /// transition of the bounded solution.
    pub fn linear_operator(&self) -> Result<LinearOperator, ModelError> {
        LinearOperator::new(dmatrix![self.backward], dmatrix![self.forward])?
            .with_transition(dmatrix![self.stable_root()])
    }

    /// The stable root of the characteristic polynomial.
    pub fn stable_root(&self) -> f64 {
        let (a, b) = (self.backward, self.forward);
        if b == 0.0 {
            a
        } else {
            (1.0 - (1.0 - 4.0 * a * b).sqrt()) / (2.0 * b)
        }
    }
}

impl ResidualSystem for TwoSided {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        let (a, b) = (self.backward, self.forward);
        out[0] = s.current[0]
            - a * s.lagged[0]
            - b * s.future[0]
            - (1.0 - a - b) * s.steady_state[0];
        Ok(())
    }
}

/// Autoregression in logarithms,
///
/// ```text
/// ln x[t] = ρ ln x[t-1] + (1 - ρ) ln x̄.
/// ```
///
/// The residual is not finite for non-positive states.
#[derive(Debug, Clone, Copy)]
pub struct LogAr {
    rho: f64,
}

impl LogAr {
    /// Initializes the model with given persistence.
    pub fn new(rho: f64) -> Self {
        Self { rho }
    }

    /// Builds the model with single variable `x` at given steady state.
    pub fn model(self, steady_state: f64) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["x"])
            .steady_state("x", steady_state)
            .build()
    }

    /// The exact path.
    pub fn path(&self, x0: f64, steady_state: f64, periods: usize) -> Vec<f64> {
        (0..=periods)
            .map(|t| steady_state * (x0 / steady_state).powf(self.rho.powi(t as i32)))
            .collect()
    }
}

impl ResidualSystem for LogAr {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        out[0] = s.current[0].ln()
            - self.rho * s.lagged[0].ln()
            - (1.0 - self.rho) * s.steady_state[0].ln();
        Ok(())
    }
}

/// Unstable model `x[t] = 2 x[t-1]` with steady state at zero.
///
/// The residual is NaN whenever the lagged state exceeds [`Exploding::LIMIT`]
/// in absolute value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exploding;

impl Exploding {
    /// Largest absolute value of the lagged state for which the residual is
    /// defined.
    pub const LIMIT: f64 = 1e6;

    /// Builds the model with single variable `x`.
    pub fn model(self) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["x"])
            .steady_state("x", 0.0)
            .build()
    }
}

impl ResidualSystem for Exploding {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        out[0] = if s.lagged[0].abs() > Self::LIMIT {
            f64::NAN
        } else {
            s.current[0] - 2.0 * s.lagged[0]
        };
        Ok(())
    }
}

/// Steady state `x² - 4 = 0` with two roots, `-2` and `2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quadratic;

impl Quadratic {
    /// Builds the model with single variable `x` and given initial guess of
    /// the steady state.
    pub fn model(self, guess: f64) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["x"])
            .initial_guess("x", guess)
            .build()
    }
}

impl ResidualSystem for Quadratic {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        out[0] = s.current[0] * s.current[0] - 4.0;
        Ok(())
    }
}

/// Real business cycle model with log utility. Variables are consumption `c`
/// and capital `k`, parameters are `alpha`, `beta` and `delta`:
///
/// ```text
/// c[t] + k[t] = k[t-1]^α + (1 - δ) k[t-1]
/// 1 / c[t] = β / c[t+1] (α k[t]^(α-1) + 1 - δ)
/// ```
///
/// With full depreciation (`δ = 1`, the default), the policy is known in
/// closed form: `k[t] = αβ k[t-1]^α` (see [`Rbc::policy`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct Rbc;

impl Rbc {
    /// Default capital share.
    pub const ALPHA: f64 = 0.33;
    /// Default discount factor.
    pub const BETA: f64 = 0.95;
    /// Default depreciation.
    pub const DELTA: f64 = 1.0;

    /// Builds the model with default parameters and an initial guess close
    /// to the steady state.
    pub fn model(self) -> Result<Model<Self>, ModelError> {
        Model::builder(self)
            .variables(["c", "k"])
            .parameter("alpha", Self::ALPHA)
            .parameter("beta", Self::BETA)
            .parameter("delta", Self::DELTA)
            .initial_guess("c", 0.4)
            .initial_guess("k", 0.2)
            .build()
    }

    /// Analytic steady state `(c, k)` for given parameters.
    pub fn steady_state(alpha: f64, beta: f64, delta: f64) -> (f64, f64) {
        let k = ((1.0 / beta - 1.0 + delta) / alpha).powf(1.0 / (alpha - 1.0));
        let c = k.powf(alpha) - delta * k;
        (c, k)
    }

    /// Closed-form policy `(c[t], k[t])` given `k[t-1]`, valid for full
    /// depreciation.
    pub fn policy(alpha: f64, beta: f64, k_lag: f64) -> (f64, f64) {
        let y = k_lag.powf(alpha);
        (y * (1.0 - alpha * beta), y * alpha * beta)
    }
}

impl ResidualSystem for Rbc {
    fn dim(&self) -> usize {
        2
    }

    fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        let (alpha, beta, delta) = (s.parameters[0], s.parameters[1], s.parameters[2]);
        let (c, k) = (s.current[0], s.current[1]);
        let k_lag = s.lagged[1];
        let c_next = s.future[0];

        out[0] = c + k - k_lag.powf(alpha) - (1.0 - delta) * k_lag;
        out[1] = 1.0 / c - beta / c_next * (alpha * k.powf(alpha - 1.0) + 1.0 - delta);
        Ok(())
    }
}

/// Two identical equations `x + y - 1 = 0`. The Jacobian matrix is singular
/// everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redundant;

impl Problem for Redundant {
    fn domain(&self) -> Domain {
        Domain::unconstrained(2)
    }
}

impl System for Redundant {
    fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError> {
        rx[0] = x[0] + x[1] - 1.0;
        rx[1] = x[0] + x[1] - 1.0;
        Ok(())
    }
}

/// Test if given point is a root of the system, given the tolerance `eps` on
/// the maximum absolute residual.
pub fn is_root<R: System>(r: &R, x: &DVector<f64>, eps: f64) -> bool {
    r.max_abs(x).map(|error| error <= eps).unwrap_or(false)
}

/// Error for the [`solve`] utility.
#[derive(Debug, Error)]
pub enum TestingError<E: StdError + 'static> {
    /// Error of the algorithm used.
    #[error("{0}")]
    Inner(#[from] E),
    /// Algorithm did not terminate.
    #[error("algorithm did not terminate")]
    Termination,
}

/// A simple solver driver that can be used in tests.
pub fn solve<R: System, S: Solver<R>>(
    r: &R,
    dom: &Domain,
    mut solver: S,
    mut x: DVector<f64>,
    max_iters: usize,
    tolerance: f64,
) -> Result<DVector<f64>, TestingError<S::Error>>
where
    S::Error: StdError,
{
    let mut rx = DVector::zeros(r.residuals());
    let mut iter = 0;

    loop {
        solver.solve_next(r, dom, &mut x, &mut rx)?;

        if rx.norm() <= tolerance {
            return Ok(x);
        }

        if iter == max_iters {
            return Err(TestingError::Termination);
        } else {
            iter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    fn residual<R: ResidualSystem>(
        r: &R,
        lag: &DVector<f64>,
        cur: &DVector<f64>,
        fut: &DVector<f64>,
        ss: &DVector<f64>,
        par: &DVector<f64>,
    ) -> DVector<f64> {
        let shocks = DVector::zeros(0);
        let mut out = DVector::zeros(r.dim());
        r.eval(
            &Slices {
                lagged: lag,
                current: cur,
                future: fut,
                steady_state: ss,
                shocks: &shocks,
                parameters: par,
            },
            &mut out,
        )
        .unwrap();
        out
    }

    #[test]
    fn ar1_path_solves_residual() {
        let ar = Ar1::new(0.5);
        let path = ar.path(0.0, 10.0, 3);
        assert_eq!(path, vec![0.0, 5.0, 7.5, 8.75]);

        let ss = dvector![10.0];
        let none = DVector::zeros(0);
        for t in 1..path.len() {
            let r = residual(&ar, &dvector![path[t - 1]], &dvector![path[t]], &ss, &ss, &none);
            assert_abs_diff_eq!(r[0], 0.0);
        }
    }

    #[test]
    fn two_sided_stable_root_solves_residual() {
        let model = TwoSided::new(0.4, 0.3);
        let mu = model.stable_root();
        assert!(mu.abs() < 1.0);

        let ss = dvector![1.0];
        let none = DVector::zeros(0);
        let x = |t: i32| dvector![1.0 - mu.powi(t)];
        let r = residual(&model, &x(2), &x(3), &x(4), &ss, &none);
        assert_abs_diff_eq!(r[0], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn log_ar_path_solves_residual() {
        let model = LogAr::new(0.8);
        let path = model.path(2.0, 1.0, 2);

        let ss = dvector![1.0];
        let none = DVector::zeros(0);
        let r = residual(&model, &dvector![path[1]], &dvector![path[2]], &ss, &ss, &none);
        assert_abs_diff_eq!(r[0], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn exploding_guard() {
        let none = DVector::zeros(0);
        let ss = dvector![0.0];
        let r = residual(&Exploding, &dvector![2e6], &dvector![4e6], &ss, &ss, &none);
        assert!(r[0].is_nan());
    }

    #[test]
    fn rbc_steady_state_and_policy() {
        let (alpha, beta, delta) = (Rbc::ALPHA, Rbc::BETA, Rbc::DELTA);
        let (c, k) = Rbc::steady_state(alpha, beta, delta);
        let par = dvector![alpha, beta, delta];
        let ss = dvector![c, k];

        let r = residual(&Rbc, &ss, &ss, &ss, &ss, &par);
        assert_abs_diff_eq!(r, dvector![0.0, 0.0], epsilon = 1e-12);

        // The policy is consistent with the steady state and the residuals.
        let (c_pol, k_pol) = Rbc::policy(alpha, beta, k);
        assert_abs_diff_eq!(c_pol, c, epsilon = 1e-12);
        assert_abs_diff_eq!(k_pol, k, epsilon = 1e-12);

        let k0 = 0.5 * k;
        let (c1, k1) = Rbc::policy(alpha, beta, k0);
        let (c2, k2) = Rbc::policy(alpha, beta, k1);
        let r = residual(
            &Rbc,
            &dvector![0.0, k0],
            &dvector![c1, k1],
            &dvector![c2, k2],
            &ss,
            &par,
        );
        assert_abs_diff_eq!(r, dvector![0.0, 0.0], epsilon = 1e-12);
    }
}
