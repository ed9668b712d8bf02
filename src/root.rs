//! Rootfinding with a report instead of an error.
//!
//! A [`Rootfinder`] runs an iterative solver to completion and summarizes the
//! outcome in a [`RootReport`]. Numerical failures (no progress, iteration
//! budget exhausted, non-finite residuals) are part of the report. Only an
//! error in evaluating the system itself is returned as `Err`.

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::DVector;

use crate::{
    algo::{
        trust_region::{TrustRegionError, TrustRegionOptions},
        TrustRegion,
    },
    core::{max_abs, ProblemError, System},
    driver::SolverDriver,
};

/// Default tolerance when none is given.
pub const DEFAULT_TOL: f64 = 1e-8;

/// Termination criteria of the rootfinding.
#[derive(Debug, Clone, Copy, PartialEq, Default, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct RootOptions {
    /// Relative tolerance on the step size. Default: [`DEFAULT_TOL`].
    xtol: Option<f64>,
    /// Tolerance on the maximum absolute residual. Default: [`DEFAULT_TOL`].
    ftol: Option<f64>,
    /// Maximum number of iterations. Default: `100 * (n + 1)`.
    max_iter: Option<usize>,
}

impl RootOptions {
    /// Fills the unset fields from `defaults`.
    pub fn or(self, defaults: RootOptions) -> Self {
        Self {
            xtol: self.xtol.or(defaults.xtol),
            ftol: self.ftol.or(defaults.ftol),
            max_iter: self.max_iter.or(defaults.max_iter),
        }
    }
}

/// Outcome of a rootfinding.
#[derive(Debug, Clone)]
pub struct RootReport {
    /// The last point.
    pub x: DVector<f64>,
    /// Residuals in the last point.
    pub fx: DVector<f64>,
    /// Whether a termination criterion for success was met.
    pub success: bool,
    /// Description of the termination.
    pub message: String,
    /// Number of performed iterations.
    pub iterations: usize,
}

impl RootReport {
    /// Maximum absolute residual in the last point.
    pub fn max_error(&self) -> f64 {
        max_abs(&self.fx)
    }
}

/// Interface of a black-box rootfinder.
pub trait Rootfinder {
    /// Finds a root of the system starting at `x0`.
    fn solve<R: System>(
        &self,
        r: &R,
        x0: DVector<f64>,
        options: &RootOptions,
    ) -> Result<RootReport, ProblemError>;
}

/// Rootfinder based on the [trust region](crate::algo::trust_region) method.
#[derive(Debug, Clone, Default)]
pub struct TrustRegionRootfinder {
    options: TrustRegionOptions,
}

impl TrustRegionRootfinder {
    /// Initializes the rootfinder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the rootfinder with given options of the trust region.
    pub fn with_options(options: TrustRegionOptions) -> Self {
        Self { options }
    }
}

impl Rootfinder for TrustRegionRootfinder {
    fn solve<R: System>(
        &self,
        r: &R,
        x0: DVector<f64>,
        options: &RootOptions,
    ) -> Result<RootReport, ProblemError> {
        let n = r.domain().dim();
        if x0.len() != n {
            return Err(ProblemError::InvalidDimensionality {
                expected: n,
                actual: x0.len(),
            });
        }

        let xtol = options.xtol.unwrap_or(DEFAULT_TOL);
        let ftol = options.ftol.unwrap_or(DEFAULT_TOL);
        let max_iter = options.max_iter.unwrap_or(100 * (n + 1));

        let mut fx0 = DVector::zeros(r.residuals());
        r.eval(&x0, &mut fx0)?;

        let error = max_abs(&fx0);
        if !error.is_finite() {
            return Ok(report(x0, fx0, false, "residuals are not finite in the initial point", 0));
        } else if error <= ftol {
            return Ok(report(x0, fx0, true, "initial point is a root", 0));
        }

        let algo_options = self.options;
        let mut driver = SolverDriver::builder(r)
            .with_initial(x0)
            .with_algo(|r, dom| TrustRegion::with_options(r, dom, algo_options))
            .build();

        let mut x_prev = driver.x().clone();
        let mut iterations = 0;

        let (success, message) = loop {
            match driver.next() {
                Ok(_) => {}
                Err(TrustRegionError::Problem(error)) => return Err(error),
                Err(error) => break (false, error.to_string()),
            }

            iterations += 1;

            let error = driver.max_abs();
            if error <= ftol {
                break (true, "residuals are below ftol".to_string());
            }

            let x = driver.x();
            let step = (x - &x_prev).norm();
            if step > 0.0 && step <= xtol * (x.norm() + xtol) {
                break (true, "relative step size is below xtol".to_string());
            }

            if iterations >= max_iter {
                break (false, "maximum number of iterations reached".to_string());
            }

            x_prev.copy_from(x);
        };

        debug!(
            "{} finished after {} iterations: {}",
            driver.name(),
            iterations,
            message
        );

        let (x, fx) = driver.into_parts();
        Ok(report(x, fx, success, message, iterations))
    }
}

fn report(
    x: DVector<f64>,
    fx: DVector<f64>,
    success: bool,
    message: impl Into<String>,
    iterations: usize,
) -> RootReport {
    RootReport {
        x,
        fx,
        success,
        message: message.into(),
        iterations,
    }
}
