//! The residual function of a dynamic model.
//!
//! # Defining a model
//!
//! A model is any type that implements [`ResidualSystem`]. It receives three
//! adjacent time slices of the state (past, present and future) together with
//! the steady state, shocks and parameters, and writes one residual per
//! equation. A zero residual means that the transition is consistent at that
//! period.
//!
//! ```rust
//! use equilibria::nalgebra::DVector;
//! use equilibria::{ProblemError, ResidualSystem, Slices};
//!
//! // x[t] = rho * x[t-1] + (1 - rho) * x_ss
//! struct Ar1 {
//!     rho: f64,
//! }
//!
//! impl ResidualSystem for Ar1 {
//!     fn dim(&self) -> usize {
//!         1
//!     }
//!
//!     fn eval(&self, s: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
//!         let ss = s.steady_state[0];
//!         out[0] = s.current[0] - ss - self.rho * (s.lagged[0] - ss);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! The function must be pure. It is allowed to return non-finite residuals
//! (the solvers detect those and record them), but it should return an error
//! only if it cannot be evaluated at all.

use nalgebra::DVector;

use super::base::ProblemError;

/// Arguments of a single residual evaluation.
///
/// All state vectors are ordered by the model's variable list, parameters by
/// its parameter list and shocks by its shock list.
#[derive(Debug, Clone, Copy)]
pub struct Slices<'a> {
    /// State in the previous period, `x[t-1]`.
    pub lagged: &'a DVector<f64>,
    /// State in the current period, `x[t]`.
    pub current: &'a DVector<f64>,
    /// State in the next period, `x[t+1]`.
    pub future: &'a DVector<f64>,
    /// Steady state of the model.
    pub steady_state: &'a DVector<f64>,
    /// Exogenous shocks (may be empty).
    pub shocks: &'a DVector<f64>,
    /// Parameter values.
    pub parameters: &'a DVector<f64>,
}

/// The residual function of a dynamic model.
pub trait ResidualSystem {
    /// Number of equations, which must equal the number of variables.
    fn dim(&self) -> usize;

    /// Writes the residuals of all equations into `out`, whose length is
    /// [`ResidualSystem::dim`].
    fn eval(&self, slices: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError>;
}

impl<R: ResidualSystem + ?Sized> ResidualSystem for &R {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn eval(&self, slices: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        (**self).eval(slices, out)
    }
}

impl<R: ResidualSystem + ?Sized> ResidualSystem for Box<R> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn eval(&self, slices: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        (**self).eval(slices, out)
    }
}

/// A residual system defined by a closure.
///
/// ```rust
/// use equilibria::nalgebra::DVector;
/// use equilibria::{FnResidual, Slices};
///
/// let model = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
///     out[0] = s.current[0] - 0.5 * s.lagged[0] - 0.5 * s.steady_state[0];
///     Ok(())
/// });
/// ```
pub struct FnResidual<F> {
    dim: usize,
    f: F,
}

impl<F> FnResidual<F>
where
    F: Fn(&Slices<'_>, &mut DVector<f64>) -> Result<(), ProblemError>,
{
    /// Wraps the closure as a residual system with `dim` equations.
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> ResidualSystem for FnResidual<F>
where
    F: Fn(&Slices<'_>, &mut DVector<f64>) -> Result<(), ProblemError>,
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn eval(&self, slices: &Slices<'_>, out: &mut DVector<f64>) -> Result<(), ProblemError> {
        (self.f)(slices, out)
    }
}

/// Evaluates the residuals after checking that all slices have the expected
/// length.
pub(crate) fn eval_checked<R: ResidualSystem + ?Sized>(
    r: &R,
    slices: &Slices<'_>,
    out: &mut DVector<f64>,
) -> Result<(), ProblemError> {
    let n = r.dim();

    for v in [
        slices.lagged,
        slices.current,
        slices.future,
        slices.steady_state,
    ] {
        if v.len() != n {
            return Err(ProblemError::InvalidDimensionality {
                expected: n,
                actual: v.len(),
            });
        }
    }

    if out.len() != n {
        return Err(ProblemError::InvalidDimensionality {
            expected: n,
            actual: out.len(),
        });
    }

    r.eval(slices, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_residual() {
        let r = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
            out[0] = s.current[0] - s.lagged[0] * s.parameters[0];
            Ok(())
        });

        let x = DVector::from_element(1, 2.0);
        let lag = DVector::from_element(1, 4.0);
        let none = DVector::zeros(0);
        let par = DVector::from_element(1, 0.25);
        let mut out = DVector::zeros(1);

        let slices = Slices {
            lagged: &lag,
            current: &x,
            future: &x,
            steady_state: &x,
            shocks: &none,
            parameters: &par,
        };

        eval_checked(&r, &slices, &mut out).unwrap();
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let r = FnResidual::new(2, |_: &Slices<'_>, _: &mut DVector<f64>| Ok(()));

        let x = DVector::zeros(1);
        let mut out = DVector::zeros(2);
        let slices = Slices {
            lagged: &x,
            current: &x,
            future: &x,
            steady_state: &x,
            shocks: &x,
            parameters: &x,
        };

        assert!(matches!(
            eval_checked(&r, &slices, &mut out),
            Err(ProblemError::InvalidDimensionality {
                expected: 2,
                actual: 1
            })
        ));
    }
}
