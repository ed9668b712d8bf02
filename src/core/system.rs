use nalgebra::DVector;

use super::base::{Problem, ProblemError};

/// Definition of a system of equations.
///
/// The number of equations ([`System::residuals`]) equals the dimension of the
/// domain by default. Rectangular systems (more unknowns than equations, or
/// the other way around) override it; the steady state with jointly
/// calibrated parameters is one of them.
///
/// ## Defining a system
///
/// ```rust
/// use equilibria::nalgebra::DVector;
/// use equilibria::{Domain, Problem, ProblemError, System};
///
/// struct Circle {
///     radius: f64,
/// }
///
/// impl Problem for Circle {
///     fn domain(&self) -> Domain {
///         Domain::unconstrained(2)
///     }
/// }
///
/// impl System for Circle {
///     fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError> {
///         rx[0] = x[0] * x[0] + x[1] * x[1] - self.radius * self.radius;
///         rx[1] = x[0] - x[1];
///         Ok(())
///     }
/// }
/// ```
pub trait System: Problem {
    /// Number of equations of the system.
    fn residuals(&self) -> usize {
        self.domain().dim()
    }

    /// Calculates the system residuals in given point.
    fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError>;

    /// Calculates the maximum absolute value of the residuals.
    ///
    /// The default implementation allocates a temporary vector for the
    /// residuals on every call.
    fn max_abs(&self, x: &DVector<f64>) -> Result<f64, ProblemError> {
        let mut rx = DVector::zeros(self.residuals());
        self.eval(x, &mut rx)?;
        Ok(max_abs(&rx))
    }
}

/// Maximum absolute value of the entries, NaN if any entry is NaN.
pub fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, vi| {
        if vi.is_nan() || acc.is_nan() {
            f64::NAN
        } else {
            acc.max(vi.abs())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_abs_propagates_nan() {
        assert_eq!(max_abs(&DVector::from_vec(vec![1.0, -3.0, 2.0])), 3.0);
        assert!(max_abs(&DVector::from_vec(vec![1.0, f64::NAN, 2.0])).is_nan());
        assert_eq!(max_abs(&DVector::from_vec(vec![f64::NEG_INFINITY])), f64::INFINITY);
    }
}
