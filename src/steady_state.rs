//! Steady state of the model.
//!
//! The steady state is a root of the residual function when the lagged,
//! current and future slices are all equal and the shocks are zero. The
//! unknown vector consists of all variables followed by all calibrated
//! parameters, except the variables that are [fixed](crate::ModelBuilder::fixed).
//!
//! The system is solved by Newton iteration where each step is computed with
//! the pseudo-inverse of the Jacobian matrix,
//!
//! ```text
//! z ← z - J⁺ f(z),
//! ```
//!
//! which tolerates singular and rectangular Jacobians (redundant equations,
//! normalization degrees of freedom). Failing to reach the tolerance is not an
//! error; it is reported in [`SteadyStateResult`] together with the numerical
//! rank of the Jacobian.
//!
//! Results are cached on the model. A subsequent call with the same fixed
//! values and the same options returns the cached result unless
//! [`SteadyStateOptions::force`] is set.

use std::time::{Duration, Instant};

use getset::{CopyGetters, Setters};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::{
    core::{eval_checked, max_abs, Domain, Problem, ProblemError, ResidualSystem, Slices, System},
    derivatives::{value_and_jacobian, JacobianError},
    model::{Model, ModelError},
};

/// Options for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct SteadyStateOptions {
    /// Tolerance on the maximum absolute residual. Default: `1e-8`.
    tol: f64,
    /// Maximum number of Newton steps. Default: `30`.
    max_iter: usize,
    /// Singular values smaller than `rcond` times the largest one are treated
    /// as zero in the pseudo-inverse and in the numerical rank. The Jacobian
    /// is approximated by finite differences, so the cutoff must stay well
    /// above their relative error. Default: `1e-6`.
    rcond: f64,
    /// Recompute even if a cached result is available. Default: `false`.
    force: bool,
    /// Log the outcome on the info level. Default: `true`.
    verbose: bool,
}

impl Default for SteadyStateOptions {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iter: 30,
            rcond: 1e-6,
            force: false,
            verbose: true,
        }
    }
}

impl SteadyStateOptions {
    fn same_configuration(&self, other: &Self) -> bool {
        self.tol == other.tol && self.max_iter == other.max_iter && self.rcond == other.rcond
    }
}

/// Error returned from [`solve`].
#[derive(Debug, Error)]
pub enum SteadyStateError {
    /// The model is not consistent.
    #[error("{0}")]
    Model(#[from] ModelError),
    /// The residual function could not be evaluated.
    #[error("{0}")]
    Evaluation(#[from] ProblemError),
}

impl From<JacobianError> for SteadyStateError {
    fn from(error: JacobianError) -> Self {
        match error {
            JacobianError::Problem(error) => Self::Evaluation(error),
        }
    }
}

/// Outcome of the steady-state search.
#[derive(Debug, Clone)]
pub struct SteadyStateResult {
    /// Names of the unknowns.
    pub unknowns: Vec<String>,
    /// Values of the unknowns in the last iterate.
    pub solution: DVector<f64>,
    /// Steady state of all variables.
    pub steady_state: DVector<f64>,
    /// All parameters including the calibrated ones.
    pub parameters: DVector<f64>,
    /// Residuals in the last iterate.
    pub residual: DVector<f64>,
    /// Maximum absolute residual.
    pub max_error: f64,
    /// Jacobian matrix in the last iterate, one column per unknown.
    pub jacobian: DMatrix<f64>,
    /// Numerical rank of the Jacobian, computed only on failure.
    pub rank: Option<usize>,
    /// Whether the residual is below the tolerance.
    pub success: bool,
    /// Description of the outcome.
    pub message: String,
    /// Number of Newton steps.
    pub iterations: usize,
    /// Duration of the computation.
    pub elapsed: Duration,
    /// When the result was computed. A cached result keeps its original
    /// timestamp.
    pub computed_at: Instant,
}

/// Cached result together with the inputs it was computed for.
#[derive(Debug, Clone)]
pub struct SteadyStateCache {
    fixed: Vec<(String, f64)>,
    options: SteadyStateOptions,
    result: SteadyStateResult,
}

impl SteadyStateCache {
    fn matches(&self, fixed: &[(&str, f64)], options: &SteadyStateOptions) -> bool {
        self.options.same_configuration(options)
            && self.fixed.len() == fixed.len()
            && self
                .fixed
                .iter()
                .zip(fixed.iter())
                .all(|((name1, value1), (name2, value2))| {
                    name1 == name2
                        && approx::relative_eq!(
                            *value1,
                            *value2,
                            epsilon = 1e-8,
                            max_relative = 1e-5
                        )
                })
    }

    /// The cached result.
    pub fn result(&self) -> &SteadyStateResult {
        &self.result
    }
}

impl<R: ResidualSystem> Model<R> {
    /// Solves for the steady state. See [`solve`].
    pub fn solve_steady_state(
        &mut self,
        options: &SteadyStateOptions,
    ) -> Result<SteadyStateResult, SteadyStateError> {
        solve(self, options)
    }

    /// The cached steady-state result, if any.
    pub fn steady_state_cache(&self) -> Option<&SteadyStateCache> {
        self.cache.as_ref()
    }
}

/// The steady-state system in the unknowns, with the fixed values filled in.
struct SteadyStateSystem<'a, R> {
    residual: &'a R,
    /// Index of each unknown in the stacked vector of variables and
    /// parameters.
    unknowns: Vec<usize>,
    /// Stacked vector of variables and parameters, holding the fixed values.
    base: DVector<f64>,
    n_vars: usize,
    shocks: DVector<f64>,
    scale: Domain,
}

impl<'a, R: ResidualSystem> SteadyStateSystem<'a, R> {
    fn expand(&self, z: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let mut full = self.base.clone();
        for (zi, &i) in z.iter().zip(self.unknowns.iter()) {
            full[i] = *zi;
        }

        let n_pars = full.len() - self.n_vars;
        let xs = full.rows(0, self.n_vars).into_owned();
        let pars = full.rows(self.n_vars, n_pars).into_owned();
        (xs, pars)
    }
}

impl<'a, R: ResidualSystem> Problem for SteadyStateSystem<'a, R> {
    fn domain(&self) -> Domain {
        self.scale.clone()
    }
}

impl<'a, R: ResidualSystem> System for SteadyStateSystem<'a, R> {
    fn residuals(&self) -> usize {
        self.n_vars
    }

    fn eval(&self, z: &DVector<f64>, rz: &mut DVector<f64>) -> Result<(), ProblemError> {
        let (xs, pars) = self.expand(z);
        let slices = Slices {
            lagged: &xs,
            current: &xs,
            future: &xs,
            steady_state: &xs,
            shocks: &self.shocks,
            parameters: &pars,
        };
        eval_checked(self.residual, &slices, rz)
    }
}

/// Solves for the steady state of the model and writes it back.
///
/// Returns the cached result if the fixed values and the options (except
/// `force` and `verbose`) did not change since the last call. Otherwise runs
/// the Newton iteration from [`Model::initial_guess`] values, writes the
/// resulting steady state and parameters onto the model and caches the result,
/// whether successful or not.
pub fn solve<R: ResidualSystem>(
    model: &mut Model<R>,
    options: &SteadyStateOptions,
) -> Result<SteadyStateResult, SteadyStateError> {
    let fixed_values = model.fixed_values();

    if !options.force {
        if let Some(cache) = &model.cache {
            if cache.matches(&fixed_values, options) {
                if options.verbose {
                    info!("steady state already known");
                }
                return Ok(cache.result.clone());
            }
        }
    }

    let start = Instant::now();

    let n_vars = model.dim();
    let names = model
        .variables()
        .iter()
        .chain(model.parameters().iter())
        .cloned()
        .collect::<Vec<_>>();

    let mut base = DVector::zeros(names.len());
    let mut unknowns = Vec::new();
    let mut unknown_names = Vec::new();

    for (i, name) in names.iter().enumerate() {
        match fixed_values.iter().find(|(fixed, _)| *fixed == name.as_str()) {
            Some((_, value)) => base[i] = *value,
            None => {
                unknowns.push(i);
                unknown_names.push(name.clone());
            }
        }
    }

    let n_fixed = fixed_values.len();
    let fixed = fixed_values
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect::<Vec<_>>();

    let z0 = DVector::from_iterator(
        unknowns.len(),
        unknown_names.iter().map(|name| model.initial_guess(name)),
    );

    let system = SteadyStateSystem {
        residual: model.residual(),
        unknowns,
        base,
        n_vars,
        shocks: DVector::zeros(model.shocks().len()),
        scale: z0.iter().copied().collect(),
    };

    let newton = newton(&system, z0, options)?;
    let (steady_state, parameters) = system.expand(&newton.z);

    let mut rank = None;
    let message = if newton.success {
        format!(
            "Steady state found in {:.5} seconds. {}",
            start.elapsed().as_secs_f64(),
            newton.message
        )
    } else {
        let mut diagnostic = String::new();
        if let Some(r) = numerical_rank(&newton.jac, options.rcond) {
            rank = Some(r);
            diagnostic = format!(
                "Jacobian has rank {} for {} degrees of freedom ({} variables/parameters, {} fixed). ",
                r,
                names.len() - n_fixed,
                names.len(),
                n_fixed
            );
        }

        if newton.error.is_finite() {
            format!(
                "Steady state not found (error is {:1.2e}). {} {}",
                newton.error, newton.message, diagnostic
            )
        } else {
            format!("Steady state not found. {} {}", newton.message, diagnostic)
        }
    };
    let message = message.trim_end().to_string();

    if newton.success {
        if options.verbose {
            info!("{}", message);
        }
    } else {
        warn!("{}", message);
    }

    let result = SteadyStateResult {
        unknowns: unknown_names,
        solution: newton.z,
        steady_state,
        parameters,
        residual: newton.fz,
        max_error: newton.error,
        jacobian: newton.jac,
        rank,
        success: newton.success,
        message,
        iterations: newton.iterations,
        elapsed: start.elapsed(),
        computed_at: Instant::now(),
    };

    model.write_steady_state(&result.steady_state, &result.parameters);
    model.cache = Some(SteadyStateCache {
        fixed,
        options: *options,
        result: result.clone(),
    });

    Ok(result)
}

struct Newton {
    z: DVector<f64>,
    fz: DVector<f64>,
    jac: DMatrix<f64>,
    error: f64,
    success: bool,
    message: String,
    iterations: usize,
}

fn newton<S: System>(
    system: &S,
    mut z: DVector<f64>,
    options: &SteadyStateOptions,
) -> Result<Newton, SteadyStateError> {
    let scale = system.domain().scale_or_unit();
    let mut iterations = 0;

    loop {
        // The residuals and the Jacobian must come from the same point.
        let (fz, jac) = value_and_jacobian(system, &mut z, &scale)?;
        let jac = jac.into_inner();
        let error = max_abs(&fz);

        debug!("Newton iteration {}: error = {:e}", iterations, error);

        let (success, message) = if !error.is_finite() || jac.iter().any(|j| !j.is_finite()) {
            (false, Some("Function returns non-finite values.".to_string()))
        } else if error < options.tol {
            (true, Some(format!("The solution converged after {} iterations.", iterations)))
        } else if iterations >= options.max_iter {
            (
                false,
                Some(format!("Maximum number of {} iterations reached.", options.max_iter)),
            )
        } else {
            (false, None)
        };

        if let Some(message) = message {
            return Ok(Newton {
                z,
                fz,
                jac,
                error,
                success,
                message,
                iterations,
            });
        }

        match pseudo_inverse(&jac, options.rcond) {
            Some(pinv) => z -= pinv * &fz,
            None => {
                return Ok(Newton {
                    z,
                    fz,
                    jac,
                    error,
                    success: false,
                    message: "Pseudo-inverse of the Jacobian could not be computed.".to_string(),
                    iterations,
                })
            }
        }

        iterations += 1;
    }
}

/// Pseudo-inverse with singular values below `rcond` times the largest one
/// cut off. The matrix must be finite.
fn pseudo_inverse(jac: &DMatrix<f64>, rcond: f64) -> Option<DMatrix<f64>> {
    if jac.is_empty() {
        return Some(DMatrix::zeros(jac.ncols(), jac.nrows()));
    }

    let svd = jac.clone().svd(true, true);
    let cutoff = rcond.max(0.0) * svd.singular_values.max();
    svd.pseudo_inverse(cutoff).ok()
}

/// Number of singular values above `rcond` times the largest one. Returns
/// `None` for non-finite matrices.
fn numerical_rank(jac: &DMatrix<f64>, rcond: f64) -> Option<usize> {
    if jac.iter().any(|j| !j.is_finite()) {
        return None;
    } else if jac.is_empty() {
        return Some(0);
    }

    let svd = jac.clone().svd(false, false);
    let max = svd.singular_values.max();
    if max == 0.0 {
        return Some(0);
    }

    Some(svd.rank(rcond.max(0.0) * max))
}
