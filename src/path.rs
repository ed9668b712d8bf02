//! Transition path from an initial state back to the steady state.
//!
//! The path is found by shooting. The solver keeps a buffer of
//! `horizon + lookahead + 1` states, where the states beyond the horizon start
//! at the steady state and serve as the terminal condition. For each period,
//! the first unknown slot of the buffer is refined by sweeping over a window
//! of the first `cnt` slots, each slot computed from its two neighbors. After
//! every pass, the window grows by one until the change of the first slot
//! falls below the tolerance. The first slot is then committed and the buffer
//! shifted by one period.
//!
//! A slot is computed either by rootfinding on the residual function with
//! both neighbors held fixed, or by the [linear operator](crate::linear) when
//! [`PathOptions::linear`] is set.
//!
//! Numerical problems never stop the solver. They are recorded in
//! [`ConvergenceFlags`] and the best available path is returned. Only an error
//! in evaluating the residual function is returned as `Err`, annotated with
//! where it happened.
//!
//! ```rust
//! use equilibria::nalgebra::{dvector, DVector};
//! use equilibria::{FnResidual, Model, PathOptions, Slices};
//!
//! let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
//!     let ss = s.steady_state[0];
//!     out[0] = s.current[0] - ss - 0.5 * (s.lagged[0] - ss);
//!     Ok(())
//! });
//!
//! let model = Model::builder(residual)
//!     .variables(["x"])
//!     .steady_state("x", 10.0)
//!     .build()
//!     .unwrap();
//!
//! let mut options = PathOptions::default();
//! options.set_horizon(3).set_verbose(false);
//!
//! let solution = model.find_path(&dvector![0.0], &options).unwrap();
//! assert!(solution.flags.is_empty());
//! assert!((solution.trajectory[2][0] - 7.5).abs() < 1e-6);
//! ```

use std::time::{Duration, Instant};

use getset::{CopyGetters, Setters};
use log::{info, warn};
use nalgebra::DVector;
use thiserror::Error;

use crate::{
    core::{eval_checked, max_abs, Domain, Problem, ProblemError, ResidualSystem, Slices, System},
    flags::{ConvergenceFlags, Flag},
    linear::LinearOperator,
    model::{Model, ModelError},
    root::{RootOptions, Rootfinder, TrustRegionRootfinder},
};

/// Options for [`find_path`].
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct PathOptions {
    /// Number of periods to compute. Default: `30`.
    horizon: usize,
    /// Number of periods after which the model is assumed to be back in the
    /// steady state. Must be at least `3`. Default: `200`.
    lookahead: usize,
    /// Number of times the window growth may restart before giving up.
    /// Default: `100`.
    max_loops: usize,
    /// Window size at which the growth restarts. Must not be lower than
    /// `lookahead`. Default: `lookahead`.
    max_iter: Option<usize>,
    /// Tolerance on the change of the first slot between passes, and on the
    /// residual of each per-period solve. Default: `1e-5`.
    tol: f64,
    /// Start each pass with the slots farthest in the future. Default:
    /// `false`.
    reverse: bool,
    /// Follow each sweep by a sweep in the opposite direction. Default:
    /// `true`.
    two_pass: bool,
    /// Use the linear operator instead of rootfinding. Default: `false`.
    linear: bool,
    /// Log progress and the summary on the info level. Default: `true`.
    verbose: bool,
    /// Minimal interval between two progress lines. Default: 500 ms.
    progress_interval: Duration,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            horizon: 30,
            lookahead: 200,
            max_loops: 100,
            max_iter: None,
            tol: 1e-5,
            reverse: false,
            two_pass: true,
            linear: false,
            verbose: true,
            progress_interval: Duration::from_millis(500),
        }
    }
}

/// Error returned from [`find_path`].
#[derive(Debug, Error)]
pub enum PathError {
    /// The model is not consistent with the request.
    #[error("{0}")]
    Model(#[from] ModelError),
    /// The options are not valid.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// The linear fast path was requested for a model without linear
    /// operator.
    #[error("linear operator is required but the model has none")]
    MissingLinearOperator,
    /// The residual function could not be evaluated.
    #[error(
        "residual evaluation failed in period {period} (loop {loops}, window size {window}, {offset} steps ahead): {source}"
    )]
    Evaluation {
        /// The period being solved.
        period: usize,
        /// The outer loop counter.
        loops: usize,
        /// The window size.
        window: usize,
        /// The slot in the window.
        offset: usize,
        /// The underlying error.
        source: ProblemError,
    },
}

/// Record of solving a single period.
#[derive(Debug, Clone)]
pub struct PeriodTrace {
    /// The period.
    pub period: usize,
    /// Number of outer loops used.
    pub loops: usize,
    /// Final window size.
    pub window: usize,
    /// Conditions encountered in this period.
    pub flags: ConvergenceFlags,
    /// Final change of the first slot.
    pub error: f64,
    /// Change of the first slot after each pass.
    pub errors: Vec<f64>,
}

/// Outcome of [`find_path`].
#[derive(Debug, Clone)]
pub struct PathSolution {
    /// States for periods `0..=horizon`, the first being the initial state.
    pub trajectory: Vec<DVector<f64>>,
    /// Conditions encountered during the whole run.
    pub flags: ConvergenceFlags,
    /// Per-period records.
    pub periods: Vec<PeriodTrace>,
    /// Path of the linear solution from the same initial state, if the
    /// linear operator carries the transition matrix.
    pub reference: Option<Vec<DVector<f64>>>,
    /// Duration of the computation.
    pub elapsed: Duration,
}

impl PathSolution {
    /// Returns `true` if no condition was recorded.
    pub fn is_converged(&self) -> bool {
        self.flags.is_empty()
    }
}

impl<R: ResidualSystem> Model<R> {
    /// Finds the path from `x0`. See [`find_path`].
    pub fn find_path(
        &self,
        x0: &DVector<f64>,
        options: &PathOptions,
    ) -> Result<PathSolution, PathError> {
        find_path(self, x0, options)
    }
}

/// The residual function as a system in the current period, with the
/// neighbors held fixed.
pub(crate) struct CurrentPeriod<'a, R: ?Sized> {
    pub(crate) residual: &'a R,
    pub(crate) lagged: &'a DVector<f64>,
    pub(crate) future: &'a DVector<f64>,
    pub(crate) steady_state: &'a DVector<f64>,
    pub(crate) shocks: &'a DVector<f64>,
    pub(crate) parameters: &'a DVector<f64>,
}

impl<'a, R: ResidualSystem + ?Sized> Problem for CurrentPeriod<'a, R> {
    fn domain(&self) -> Domain {
        self.steady_state.iter().copied().collect()
    }
}

impl<'a, R: ResidualSystem + ?Sized> System for CurrentPeriod<'a, R> {
    fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError> {
        let slices = Slices {
            lagged: self.lagged,
            current: x,
            future: self.future,
            steady_state: self.steady_state,
            shocks: self.shocks,
            parameters: self.parameters,
        };
        eval_checked(self.residual, &slices, rx)
    }
}

/// How a slot is computed from its neighbors. Resolved once per call.
enum Update<'a, F> {
    Nonlinear {
        rootfinder: &'a F,
        options: RootOptions,
    },
    Linear(&'a LinearOperator),
}

struct Shooting<'a, R, F> {
    residual: &'a R,
    steady_state: DVector<f64>,
    parameters: &'a DVector<f64>,
    shocks: DVector<f64>,
    update: Update<'a, F>,
    tol: f64,
}

impl<'a, R: ResidualSystem, F: Rootfinder> Shooting<'a, R, F> {
    /// Computes `window[t + 1]` from `window[t]` and `window[t + 2]`.
    fn update(
        &self,
        window: &mut [DVector<f64>],
        t: usize,
    ) -> Result<ConvergenceFlags, ProblemError> {
        let mut flags = ConvergenceFlags::empty();

        match &self.update {
            Update::Linear(linear) => {
                window[t + 1] = linear.step(&window[t], &window[t + 2], &self.steady_state);
            }
            Update::Nonlinear {
                rootfinder,
                options,
            } => {
                let period = CurrentPeriod {
                    residual: self.residual,
                    lagged: &window[t],
                    future: &window[t + 2],
                    steady_state: &self.steady_state,
                    shocks: &self.shocks,
                    parameters: self.parameters,
                };

                let report = rootfinder.solve(&period, window[t + 2].clone(), options)?;
                let error = report.max_error();

                flags.set_if(Flag::NonConvergence, !report.success);
                flags.set_if(Flag::ToleranceNotMet, report.success && error > self.tol);

                let mut x = report.x;
                if report.fx.iter().any(|fi| fi.is_nan()) {
                    x.fill(f64::NAN);
                } else if report.fx.iter().any(|fi| fi.is_infinite()) {
                    x.fill(f64::INFINITY);
                }

                window[t + 1] = x;
            }
        }

        Ok(flags)
    }
}

/// Finds the path from `x0` using the trust-region rootfinder.
///
/// Periods beyond the horizon start at the steady state.
pub fn find_path<R: ResidualSystem>(
    model: &Model<R>,
    x0: &DVector<f64>,
    options: &PathOptions,
) -> Result<PathSolution, PathError> {
    find_path_using(model, x0, None, options, &TrustRegionRootfinder::new())
}

/// Finds the path from `x0`, seeding the buffer with a provisional
/// trajectory.
///
/// `guess[t]` is used as the initial value of period `t` for `t >= 1`
/// (`guess[0]` is ignored). Periods not covered by the guess start at the
/// steady state.
pub fn find_path_with_guess<R: ResidualSystem>(
    model: &Model<R>,
    x0: &DVector<f64>,
    guess: &[DVector<f64>],
    options: &PathOptions,
) -> Result<PathSolution, PathError> {
    find_path_using(model, x0, Some(guess), options, &TrustRegionRootfinder::new())
}

/// Finds the path from `x0` with given rootfinder for the per-period solves.
pub fn find_path_using<R: ResidualSystem, F: Rootfinder>(
    model: &Model<R>,
    x0: &DVector<f64>,
    guess: Option<&[DVector<f64>]>,
    options: &PathOptions,
    rootfinder: &F,
) -> Result<PathSolution, PathError> {
    let start = Instant::now();

    let horizon = options.horizon;
    let lookahead = options.lookahead;
    let tol = options.tol;

    // The window must be able to grow past its minimal size of two.
    if lookahead < 3 {
        return Err(PathError::InvalidOptions(format!(
            "lookahead must be at least 3, but is {}",
            lookahead
        )));
    }

    let max_iter = options.max_iter.unwrap_or(lookahead);
    if max_iter < lookahead {
        return Err(PathError::InvalidOptions(format!(
            "max_iter should be higher or equal lookahead, but is {} and {}",
            max_iter, lookahead
        )));
    }

    model.check_state(x0)?;
    let steady_state = model.steady_state_vector()?;

    let update = if options.linear {
        Update::Linear(
            model
                .linear_operator()
                .ok_or(PathError::MissingLinearOperator)?,
        )
    } else {
        // Rootfinding precision some magnitudes higher than the path
        // tolerance.
        let root_tol = (tol * 1e-3).max(1e-8);
        let mut defaults = RootOptions::default();
        defaults.set_xtol(Some(root_tol)).set_ftol(Some(root_tol));

        Update::Nonlinear {
            rootfinder,
            options: model.root_options().or(defaults),
        }
    };

    let reference = model
        .linear_operator()
        .and_then(|linear| linear.reference_path(x0, &steady_state, horizon));

    let mut x = vec![steady_state.clone(); horizon + lookahead + 1];
    x[0] = x0.clone();

    if let Some(guess) = guess {
        for (slot, value) in x.iter_mut().zip(guess.iter()).skip(1) {
            model.check_state(value)?;
            *slot = value.clone();
        }
    }

    let shooting = Shooting {
        residual: model.residual(),
        steady_state,
        parameters: model.parameter_values(),
        shocks: DVector::zeros(model.shocks().len()),
        update,
        tol,
    };

    let mut trajectory = Vec::with_capacity(horizon + 1);
    trajectory.push(x0.clone());

    let mut periods = Vec::with_capacity(horizon);
    let mut run_flags = ConvergenceFlags::empty();
    let mut last_progress = Instant::now();

    for i in 0..horizon {
        let window = &mut x[i..];

        let mut loops = 1;
        let mut cnt = if options.reverse { 1 } else { 2 };
        let mut flags = ConvergenceFlags::empty();
        let mut errors = Vec::new();

        let error = loop {
            let first = window[1].clone();
            let imax = cnt.min(lookahead);

            let context = |offset: usize| {
                move |source: ProblemError| PathError::Evaluation {
                    period: i,
                    loops,
                    window: cnt,
                    offset,
                    source,
                }
            };

            for k in 0..imax {
                let t = if options.reverse { imax - k - 1 } else { k };
                flags |= shooting.update(window, t).map_err(context(t))?;
            }

            if options.two_pass {
                for t in (0..imax).rev() {
                    flags |= shooting.update(window, t).map_err(context(t))?;
                }
            }

            flags.set_if(
                Flag::Nan,
                window.iter().any(|xt| xt.iter().any(|v| v.is_nan())),
            );
            flags.set_if(
                Flag::Inf,
                window.iter().any(|xt| xt.iter().any(|v| v.is_infinite())),
            );

            let error = max_abs(&(&first - &window[1]));
            errors.push(error);

            // A window converged at the cap is accepted as is.
            let converged = error < tol && cnt > 2;

            if !converged && cnt >= max_iter {
                if loops < options.max_loops {
                    loops += 1;
                    cnt = 2;
                } else {
                    flags.insert(Flag::BudgetExhausted);
                }
            }

            run_flags |= flags;

            if options.verbose && last_progress.elapsed() >= options.progress_interval {
                last_progress = Instant::now();
                info!(
                    "Period{:>4} | loop{:>5} | iter.{:>5} | flag{:>2} | error: {:>1.8e}",
                    i,
                    loops,
                    cnt,
                    run_flags.bits(),
                    error
                );
            }

            if converged || !flags.is_empty() {
                break error;
            }

            cnt += 1;
        };

        trajectory.push(window[1].clone());
        periods.push(PeriodTrace {
            period: i,
            loops,
            window: cnt,
            flags,
            error,
            errors,
        });
    }

    let elapsed = start.elapsed();

    if !run_flags.is_empty() {
        warn!(
            "path found after {:.3} seconds{}",
            elapsed.as_secs_f64(),
            run_flags
        );
    } else if options.verbose {
        info!("path found after {:.3} seconds", elapsed.as_secs_f64());
    }

    Ok(PathSolution {
        trajectory,
        flags: run_flags,
        periods,
        reference,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::FnResidual;
    use crate::root::RootReport;
    use crate::steady_state::SteadyStateOptions;
    use crate::testing::{Ar1, Exploding, Rbc, TwoSided};

    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn options(horizon: usize, lookahead: usize) -> PathOptions {
        let mut options = PathOptions::default();
        options
            .set_horizon(horizon)
            .set_lookahead(lookahead)
            .set_verbose(false);
        options
    }

    #[test]
    fn ar1_converges_monotonically() {
        let model = Ar1::new(0.5).model(10.0).unwrap();
        let solution = find_path(&model, &dvector![0.0], &options(20, 200)).unwrap();

        assert!(solution.is_converged(), "{}", solution.flags);
        assert_eq!(solution.trajectory.len(), 21);
        assert_eq!(solution.trajectory[0][0], 0.0);
        assert_abs_diff_eq!(solution.trajectory[1][0], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.trajectory[2][0], 7.5, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.trajectory[3][0], 8.75, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.trajectory[20][0], 10.0, epsilon = 1e-5);

        for t in 1..solution.trajectory.len() {
            assert!(solution.trajectory[t][0] > solution.trajectory[t - 1][0]);
        }

        // The window stops growing right after the first slot settles.
        assert!(solution.periods.iter().all(|p| p.window == 3 && p.loops == 1));
    }

    #[test]
    fn steady_state_is_a_fixed_point() {
        let mut model = Rbc.model().unwrap();
        let mut ss_options = SteadyStateOptions::default();
        ss_options.set_verbose(false);
        model.solve_steady_state(&ss_options).unwrap();

        let ss = model.steady_state_vector().unwrap();
        let solution = find_path(&model, &ss, &options(10, 30)).unwrap();

        assert!(solution.is_converged(), "{}", solution.flags);
        assert_eq!(solution.trajectory.len(), 11);
        for xt in solution.trajectory.iter() {
            assert_eq!(xt, &ss);
        }
    }

    #[test]
    fn zero_horizon() {
        let model = Ar1::new(0.5).model(10.0).unwrap();
        let solution = find_path(&model, &dvector![3.0], &options(0, 200)).unwrap();

        assert_eq!(solution.trajectory, vec![dvector![3.0]]);
        assert!(solution.flags.is_empty());
        assert!(solution.periods.is_empty());
    }

    #[test]
    fn rbc_matches_closed_form_policy() {
        let mut model = Rbc.model().unwrap();
        let mut ss_options = SteadyStateOptions::default();
        ss_options.set_verbose(false);
        model.solve_steady_state(&ss_options).unwrap();

        let (c_ss, k_ss) = Rbc::steady_state(Rbc::ALPHA, Rbc::BETA, Rbc::DELTA);
        let x0 = dvector![c_ss, 0.5 * k_ss];

        let solution = find_path(&model, &x0, &options(10, 60)).unwrap();
        assert!(solution.is_converged(), "{}", solution.flags);

        let mut k = x0[1];
        for xt in solution.trajectory.iter().skip(1) {
            let (c_next, k_next) = Rbc::policy(Rbc::ALPHA, Rbc::BETA, k);
            assert_abs_diff_eq!(xt[0], c_next, epsilon = 1e-4);
            assert_abs_diff_eq!(xt[1], k_next, epsilon = 1e-4);
            k = k_next;
        }
    }

    #[test]
    fn blow_up_is_flagged() {
        let model = Exploding.model().unwrap();
        let solution = find_path(&model, &dvector![1e5], &options(8, 10)).unwrap();

        assert!(solution.flags.contains(Flag::Nan));
        assert!(!solution.is_converged());

        assert_abs_diff_eq!(solution.trajectory[1][0], 2e5, epsilon = 1e-2);
        assert_abs_diff_eq!(solution.trajectory[2][0], 4e5, epsilon = 1e-2);
        assert!(solution
            .trajectory
            .iter()
            .skip(4)
            .all(|xt| !xt[0].is_finite()));
    }

    #[test]
    fn short_lookahead_exhausts_budget() {
        let mut model = TwoSided::interpolation().model(1.0).unwrap();
        model
            .set_linear_operator(TwoSided::interpolation().linear_operator().unwrap())
            .unwrap();

        let mut options = options(3, 5);
        options.set_max_loops(1).set_tol(1e-12).set_linear(true);

        let solution = find_path(&model, &dvector![0.0], &options).unwrap();

        assert_eq!(solution.flags, ConvergenceFlags::from(Flag::BudgetExhausted));
        assert_eq!(solution.periods[0].window, 5);
        assert_eq!(solution.periods[0].errors.len(), 4);

        // The same with rootfinding.
        options.set_linear(false);
        let solution = find_path(&model, &dvector![0.0], &options).unwrap();

        assert!(
            solution.flags.contains(Flag::BudgetExhausted)
                || solution.flags.contains(Flag::ToleranceNotMet)
        );
    }

    #[test]
    fn restarts_window_growth() {
        let mut model = TwoSided::interpolation().model(1.0).unwrap();
        model
            .set_linear_operator(TwoSided::interpolation().linear_operator().unwrap())
            .unwrap();

        let mut options = options(3, 5);
        options.set_max_loops(3).set_tol(1e-12).set_linear(true);

        let solution = find_path(&model, &dvector![0.0], &options).unwrap();

        assert!(solution.flags.contains(Flag::BudgetExhausted));
        assert!(solution.periods.iter().all(|p| p.loops == 3));
    }

    #[test]
    fn sweep_variants_agree() {
        let model = TwoSided::new(0.4, 0.3).model(1.0).unwrap();
        let mu = TwoSided::new(0.4, 0.3).stable_root();
        let x0 = dvector![0.0];

        let two_pass = find_path(&model, &x0, &options(10, 60)).unwrap();

        let mut single = options(10, 60);
        single.set_two_pass(false);
        let single_pass = find_path(&model, &x0, &single).unwrap();

        let mut reverse = options(10, 60);
        reverse.set_reverse(true);
        let reverse = find_path(&model, &x0, &reverse).unwrap();

        for solution in [&two_pass, &single_pass, &reverse] {
            assert!(solution.is_converged(), "{}", solution.flags);

            for (t, xt) in solution.trajectory.iter().enumerate() {
                assert_abs_diff_eq!(xt[0], 1.0 - mu.powi(t as i32), epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn linear_fast_path() {
        let model = TwoSided::new(0.4, 0.3);
        let mu = model.stable_root();

        let mut model = model.model(1.0).unwrap();
        model
            .set_linear_operator(TwoSided::new(0.4, 0.3).linear_operator().unwrap())
            .unwrap();

        let x0 = dvector![0.0];
        let nonlinear = find_path(&model, &x0, &options(10, 60)).unwrap();

        let mut linear = options(10, 60);
        linear.set_linear(true);
        let linear = find_path(&model, &x0, &linear).unwrap();

        assert!(linear.is_converged());
        for (xl, xn) in linear.trajectory.iter().zip(nonlinear.trajectory.iter()) {
            assert_abs_diff_eq!(xl[0], xn[0], epsilon = 1e-4);
        }

        let reference = linear.reference.unwrap();
        assert_eq!(reference.len(), 11);
        for (t, xt) in reference.iter().enumerate() {
            assert_abs_diff_eq!(xt[0], 1.0 - mu.powi(t as i32), epsilon = 1e-12);
        }
    }

    #[test]
    fn missing_linear_operator() {
        let model = Ar1::new(0.5).model(10.0).unwrap();
        let mut options = options(5, 10);
        options.set_linear(true);

        assert!(matches!(
            find_path(&model, &dvector![0.0], &options),
            Err(PathError::MissingLinearOperator)
        ));
    }

    #[test]
    fn invalid_requests() {
        let model = Ar1::new(0.5).model(10.0).unwrap();

        let mut short = options(5, 10);
        short.set_max_iter(Some(9));
        assert!(matches!(
            find_path(&model, &dvector![0.0], &short),
            Err(PathError::InvalidOptions(_))
        ));

        for lookahead in 0..3 {
            assert!(matches!(
                find_path(&model, &dvector![0.0], &options(5, lookahead)),
                Err(PathError::InvalidOptions(_))
            ));
        }

        assert!(matches!(
            find_path(&model, &dvector![0.0, 1.0], &options(5, 10)),
            Err(PathError::Model(ModelError::InvalidLength {
                expected: 1,
                actual: 2
            }))
        ));

        let model = Ar1::new(0.5);
        let model = Model::builder(model).variables(["x"]).build().unwrap();
        assert!(matches!(
            find_path(&model, &dvector![0.0], &options(5, 10)),
            Err(PathError::Model(ModelError::MissingSteadyState(_)))
        ));
    }

    #[test]
    fn evaluation_error_has_context() {
        let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
            if s.lagged[0] > 6.0 {
                return Err(ProblemError::custom("lagged state out of range"));
            }
            out[0] = s.current[0] - 10.0 - 0.5 * (s.lagged[0] - 10.0);
            Ok(())
        });

        let model = Model::builder(residual)
            .variables(["x"])
            .steady_state("x", 10.0)
            .build()
            .unwrap();

        let result = find_path(&model, &dvector![0.0], &options(5, 10));

        match result {
            Err(error @ PathError::Evaluation { .. }) => {
                assert!(error.to_string().contains("period 0"));
                assert!(matches!(
                    error,
                    PathError::Evaluation {
                        period: 0,
                        loops: 1,
                        window: 3,
                        offset: 2,
                        source: ProblemError::Custom(_),
                    }
                ));
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.flags)),
        }
    }

    #[test]
    fn initial_guess_is_used() {
        let ar = Ar1::new(0.5);
        let model = ar.model(10.0).unwrap();
        let guess = ar
            .path(0.0, 10.0, 20)
            .into_iter()
            .map(|x| dvector![x])
            .collect::<Vec<_>>();

        let solution = find_path_with_guess(&model, &dvector![0.0], &guess, &options(5, 200)).unwrap();

        assert!(solution.is_converged());
        // The guess is already the solution, so the first pass changes
        // nothing.
        assert!(solution.periods[0].errors[0] < 1e-6);
        assert_abs_diff_eq!(solution.trajectory[3][0], 8.75, epsilon = 1e-6);

        let wrong = vec![dvector![0.0], dvector![1.0, 2.0]];
        assert!(matches!(
            find_path_with_guess(&model, &dvector![0.0], &wrong, &options(5, 200)),
            Err(PathError::Model(ModelError::InvalidLength { .. }))
        ));
    }

    #[test]
    fn window_error_decreases() {
        // Sampled over random stable two-sided models. Measured in the first
        // period, where the window starts from the steady state.
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..16 {
            let a = rng.gen_range(0.2..0.6);
            let b = rng.gen_range(0.0..(0.8 - a));
            let ss: f64 = rng.gen_range(-5.0..5.0);
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let x0 = ss + sign * rng.gen_range(1.0..3.0);

            let model = TwoSided::new(a, b).model(ss).unwrap();
            let solution = find_path(&model, &dvector![x0], &options(1, 60)).unwrap();

            assert!(solution.is_converged(), "{}", solution.flags);

            let errors = &solution.periods[0].errors;
            for pair in errors[1..].windows(2) {
                assert!(
                    pair[1] <= pair[0] + 1e-7,
                    "a = {}, b = {}, errors = {:?}",
                    a,
                    b,
                    errors
                );
            }
        }
    }

    #[test]
    fn shortest_lookahead() {
        let model = Ar1::new(0.5).model(10.0).unwrap();
        let mut options = options(3, 3);
        options.set_max_loops(5);

        // Converging right at the cap does not restart the window.
        let solution = find_path(&model, &dvector![10.0], &options).unwrap();

        assert!(solution.flags.is_empty(), "{}", solution.flags);
        assert_eq!(solution.trajectory, vec![dvector![10.0]; 4]);
        assert!(solution.periods.iter().all(|p| p.loops == 1 && p.window == 3));

        let solution = find_path(&model, &dvector![0.0], &options).unwrap();

        assert!(solution.flags.is_empty(), "{}", solution.flags);
        assert_abs_diff_eq!(solution.trajectory[1][0], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.trajectory[3][0], 8.75, epsilon = 1e-6);
        assert!(solution.periods.iter().all(|p| p.loops == 1));
    }

    #[test]
    fn infinity_is_flagged() {
        let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
            out[0] = if s.lagged[0].abs() > 1e6 {
                f64::INFINITY
            } else {
                s.current[0] - 2.0 * s.lagged[0]
            };
            Ok(())
        });

        let model = Model::builder(residual)
            .variables(["x"])
            .steady_state("x", 0.0)
            .build()
            .unwrap();

        let solution = find_path(&model, &dvector![1e5], &options(8, 10)).unwrap();

        assert_eq!(
            solution.flags,
            ConvergenceFlags::from(Flag::NonConvergence) | ConvergenceFlags::from(Flag::Inf)
        );
        assert_eq!(solution.flags.bits(), 0b1001);
        assert!(solution.trajectory.last().unwrap()[0].is_infinite());
        assert!(solution.trajectory.iter().all(|xt| !xt[0].is_nan()));
    }

    #[test]
    fn missing_root_is_flagged() {
        // x^2 + 1 has no real root.
        let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
            out[0] = s.current[0] * s.current[0] + 1.0;
            Ok(())
        });

        // Only the residual tolerance may declare success.
        let mut root_options = RootOptions::default();
        root_options.set_xtol(Some(0.0)).set_max_iter(Some(50));

        let model = Model::builder(residual)
            .variables(["x"])
            .steady_state("x", 1.0)
            .root_options(root_options)
            .build()
            .unwrap();

        let solution = find_path(&model, &dvector![1.0], &options(2, 3)).unwrap();

        assert_eq!(solution.flags, ConvergenceFlags::from(Flag::NonConvergence));
        assert_eq!(solution.flags.bits(), 0b0001);
        assert!(solution
            .periods
            .iter()
            .all(|p| p.flags == ConvergenceFlags::from(Flag::NonConvergence)));
        assert!(solution.trajectory.iter().all(|xt| xt[0].is_finite()));
    }

    /// Accepts the initial point without iterating.
    struct Lenient;

    impl Rootfinder for Lenient {
        fn solve<R: System>(
            &self,
            r: &R,
            x0: DVector<f64>,
            _options: &RootOptions,
        ) -> Result<RootReport, ProblemError> {
            let mut fx = DVector::zeros(r.residuals());
            r.eval(&x0, &mut fx)?;

            Ok(RootReport {
                x: x0,
                fx,
                success: true,
                message: "initial point accepted".to_string(),
                iterations: 0,
            })
        }
    }

    #[test]
    fn loose_root_is_flagged() {
        let model = Ar1::new(0.5).model(10.0).unwrap();
        let solution =
            find_path_using(&model, &dvector![0.0], None, &options(3, 10), &Lenient).unwrap();

        assert_eq!(solution.flags, ConvergenceFlags::from(Flag::ToleranceNotMet));
        assert_eq!(solution.flags.bits(), 0b0010);
        assert_eq!(solution.periods[0].errors.len(), 1);
    }
}
