//! Linearized dynamics around the steady state.
//!
//! The operator approximates the per-period solve of the path solver by
//!
//! ```text
//! x[t+1] = x̄ + B (x[t] - x̄) + F (x[t+2] - x̄)
//! ```
//!
//! where `x̄` is the steady state, `B` the backward map and `F` the forward
//! map. Its construction from the model is an external concern; the operator is
//! supplied prebuilt, or assembled from the structural matrices of the
//! linearized system with [`LinearOperator::from_structural`].

use nalgebra::{DMatrix, DVector};

use crate::model::ModelError;

/// Backward and forward maps of the linearized model.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearOperator {
    backward: DMatrix<f64>,
    forward: DMatrix<f64>,
    transition: Option<DMatrix<f64>>,
}

impl LinearOperator {
    /// Creates the operator from the backward and forward maps.
    pub fn new(backward: DMatrix<f64>, forward: DMatrix<f64>) -> Result<Self, ModelError> {
        let n = backward.nrows();
        check_square(&backward, n)?;
        check_square(&forward, n)?;

        Ok(Self {
            backward,
            forward,
            transition: None,
        })
    }

    /// Builds the operator from the structural form of the linearized model
    ///
    /// ```text
    /// A x[t+1] + B x[t] + C x[t-1] = 0,
    /// ```
    ///
    /// solved for the current period: the backward map is `-B⁻¹ C` and the
    /// forward map is `-B⁻¹ A`.
    pub fn from_structural(
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        c: &DMatrix<f64>,
    ) -> Result<Self, ModelError> {
        let n = b.nrows();
        check_square(a, n)?;
        check_square(b, n)?;
        check_square(c, n)?;

        let b_inv = b
            .clone()
            .try_inverse()
            .ok_or(ModelError::SingularMatrix)?;

        Self::new(-&b_inv * c, -&b_inv * a)
    }

    /// Attaches the state transition matrix `Λ` of the linear solution, which
    /// is used to compute the linear reference trajectory.
    pub fn with_transition(mut self, transition: DMatrix<f64>) -> Result<Self, ModelError> {
        check_square(&transition, self.dim())?;
        self.transition = Some(transition);
        Ok(self)
    }

    /// Number of variables.
    pub fn dim(&self) -> usize {
        self.backward.nrows()
    }

    /// The backward map `B`.
    pub fn backward(&self) -> &DMatrix<f64> {
        &self.backward
    }

    /// The forward map `F`.
    pub fn forward(&self) -> &DMatrix<f64> {
        &self.forward
    }

    /// The transition matrix `Λ`, if known.
    pub fn transition(&self) -> Option<&DMatrix<f64>> {
        self.transition.as_ref()
    }

    /// Computes the current period from its neighbors.
    pub fn step(
        &self,
        lagged: &DVector<f64>,
        future: &DVector<f64>,
        steady_state: &DVector<f64>,
    ) -> DVector<f64> {
        let mut x = steady_state.clone();
        x.gemv(1.0, &self.backward, &(lagged - steady_state), 1.0);
        x.gemv(1.0, &self.forward, &(future - steady_state), 1.0);
        x
    }

    /// Iterates the transition matrix from `x0` for `periods` periods, giving
    /// `periods + 1` states including `x0`. Returns `None` if the transition
    /// matrix is unknown.
    pub fn reference_path(
        &self,
        x0: &DVector<f64>,
        steady_state: &DVector<f64>,
        periods: usize,
    ) -> Option<Vec<DVector<f64>>> {
        let transition = self.transition.as_ref()?;

        let mut path = Vec::with_capacity(periods + 1);
        let mut dev = x0 - steady_state;
        path.push(x0.clone());

        for _ in 0..periods {
            dev = transition * dev;
            path.push(steady_state + &dev);
        }

        Some(path)
    }
}

fn check_square(m: &DMatrix<f64>, n: usize) -> Result<(), ModelError> {
    if m.shape() != (n, n) {
        Err(ModelError::LinearOperatorShape {
            expected: n,
            actual: m.shape(),
        })
    } else {
        Ok(())
    }
}
