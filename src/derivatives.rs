//! Tools for derivative-based methods.

use std::ops::Deref;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::core::{ProblemError, System};

/// Square root of double precision machine epsilon. This value is a standard
/// constant for epsilons in approximating first-order derivate-based concepts.
pub const EPSILON_SQRT: f64 = 0.000000014901161193847656;

/// Error when computing the Jacobian matrix.
#[derive(Debug, Error)]
pub enum JacobianError {
    /// Error that occurred when evaluating the system.
    #[error("{0}")]
    Problem(#[from] ProblemError),
}

/// Jacobian matrix of a system.
///
/// The matrix has one row per equation and one column per unknown, so it is
/// rectangular for rectangular systems.
#[derive(Debug, Clone)]
pub struct Jacobian {
    jac: DMatrix<f64>,
    col: DVector<f64>,
}

impl Jacobian {
    /// Initializes the Jacobian matrix with zeros.
    pub fn zeros<R: System>(r: &R) -> Self {
        let m = r.residuals();
        let n = r.domain().dim();

        Self {
            jac: DMatrix::zeros(m, n),
            col: DVector::zeros(m),
        }
    }

    /// Compute the Jacobian matrix of the system in given point with given
    /// scale of variables. See [`compute`](Jacobian::compute) for more
    /// details.
    pub fn new<R: System>(
        r: &R,
        x: &mut DVector<f64>,
        scale: &DVector<f64>,
        rx: &DVector<f64>,
    ) -> Result<Self, JacobianError> {
        let mut jac = Self::zeros(r);
        jac.compute(r, x, scale, rx)?;
        Ok(jac)
    }

    /// Compute the Jacobian matrix of the system in given point with given
    /// scale of variables.
    ///
    /// `rx` must hold the residuals in `x`. The parameter `x` is mutable to
    /// allow temporary mutations avoiding unnecessary allocations, but after
    /// this method ends, the content of the vector is exactly the same as
    /// before.
    ///
    /// Information about variable scale is useful for problematic cases of
    /// finite differentiation (e.g., when the value is near zero).
    pub fn compute<R: System>(
        &mut self,
        r: &R,
        x: &mut DVector<f64>,
        scale: &DVector<f64>,
        rx: &DVector<f64>,
    ) -> Result<&mut Self, JacobianError> {
        let eps = EPSILON_SQRT;

        for j in 0..self.jac.ncols() {
            let xj = x[j];

            // Compute the step size. We would like to have the step as small as
            // possible (to be as close to the zero -- i.e., real derivative --
            // as possible). But at the same time, very small step could cause
            // F(x + e_j * step_j) ~= F(x) with very small number of good
            // digits.
            //
            // A reasonable way to balance these competing needs is to scale
            // each component by x_j itself. To avoid problems when x_j is close
            // to zero, it is modified to take the typical magnitude instead.
            let magnitude = 1.0 / scale[j];
            let step = eps * xj.abs().max(magnitude) * xj.signum();
            let step = if step == 0.0 || !step.is_finite() {
                eps
            } else {
                step
            };

            // Update the point.
            x[j] = xj + step;
            let result = r.eval(x, &mut self.col);

            // Restore the original value before propagating any error.
            x[j] = xj;
            result?;

            // Compute the derivative approximation: J[i, j] = (F(x + e_j * step_j) - F(x)) / step_j.
            self.col -= rx;
            self.col /= step;
            self.jac.set_column(j, &self.col);
        }

        Ok(self)
    }

    /// Unwraps the matrix.
    pub fn into_inner(self) -> DMatrix<f64> {
        self.jac
    }
}

impl Deref for Jacobian {
    type Target = DMatrix<f64>;

    fn deref(&self) -> &Self::Target {
        &self.jac
    }
}

/// Evaluates the residuals and the Jacobian matrix in the same point.
///
/// Newton-type iterations must linearize the system exactly where they
/// evaluate it, otherwise the step does not correspond to the residual it is
/// supposed to eliminate.
pub fn value_and_jacobian<R: System>(
    r: &R,
    x: &mut DVector<f64>,
    scale: &DVector<f64>,
) -> Result<(DVector<f64>, Jacobian), JacobianError> {
    let mut rx = DVector::zeros(r.residuals());
    r.eval(x, &mut rx)?;
    let jac = Jacobian::new(r, x, scale, &rx)?;
    Ok((rx, jac))
}
