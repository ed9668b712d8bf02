//! The model: names, values and the residual function.
//!
//! A [`Model`] bundles everything both solvers need. Vectors passed to the
//! residual function are always ordered by the variable, parameter and shock
//! lists given at construction.
//!
//! ```rust
//! use equilibria::nalgebra::DVector;
//! use equilibria::{FnResidual, Model, Slices};
//!
//! let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
//!     let rho = s.parameters[0];
//!     out[0] = s.current[0] - s.steady_state[0] - rho * (s.lagged[0] - s.steady_state[0]);
//!     Ok(())
//! });
//!
//! let model = Model::builder(residual)
//!     .variables(["y"])
//!     .parameter("rho", 0.9)
//!     .steady_state("y", 1.0)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.parameter("rho"), Some(0.9));
//! ```
//!
//! Parameters hold their values during the steady-state search unless they are
//! marked as [calibrated](ModelBuilder::calibrated), in which case they are
//! solved jointly with the variables. Conversely, a variable can be
//! [fixed](ModelBuilder::fixed) to a literal steady-state value.

use std::collections::{BTreeMap, HashSet};

use nalgebra::DVector;
use thiserror::Error;

use crate::{core::ResidualSystem, linear::LinearOperator, root::RootOptions};

/// Error in the model definition.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The residual function and the variable list disagree.
    #[error("residual function has {residuals} equations for {variables} variables")]
    DimensionMismatch {
        /// Number of equations.
        residuals: usize,
        /// Number of variables.
        variables: usize,
    },
    /// The same name is used twice.
    #[error("duplicate name `{0}`")]
    DuplicateName(String),
    /// The name is not a variable nor a parameter of the model.
    #[error("unknown name `{0}`")]
    UnknownName(String),
    /// The steady-state value of a variable is not known.
    #[error("steady state of `{0}` is not known")]
    MissingSteadyState(String),
    /// A vector does not have one entry per variable.
    #[error("expected {expected} values, got {actual}")]
    InvalidLength {
        /// Number of variables.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// A matrix of the linear operator has a wrong shape.
    #[error("expected a {expected}x{expected} matrix, got {}x{}", actual.0, actual.1)]
    LinearOperatorShape {
        /// Number of variables.
        expected: usize,
        /// Actual shape.
        actual: (usize, usize),
    },
    /// A matrix that needs to be inverted is singular.
    #[error("matrix is singular")]
    SingularMatrix,
}

/// Bundle of a residual function and its named inputs.
///
/// Use [`Model::builder`] to construct it.
pub struct Model<R> {
    residual: R,
    variables: Vec<String>,
    parameters: Vec<String>,
    parameter_values: DVector<f64>,
    shocks: Vec<String>,
    steady_state: Vec<Option<f64>>,
    calibrated: HashSet<String>,
    fixed: BTreeMap<String, f64>,
    initial_guess: BTreeMap<String, f64>,
    linear: Option<LinearOperator>,
    root_options: RootOptions,
    pub(crate) cache: Option<crate::steady_state::SteadyStateCache>,
}

impl<R: ResidualSystem> Model<R> {
    /// Returns the builder for the model with given residual function.
    pub fn builder(residual: R) -> ModelBuilder<R> {
        ModelBuilder {
            residual,
            variables: Vec::new(),
            parameters: Vec::new(),
            shocks: Vec::new(),
            steady_state: Vec::new(),
            calibrated: Vec::new(),
            fixed: Vec::new(),
            initial_guess: Vec::new(),
            linear: None,
            root_options: RootOptions::default(),
        }
    }

    /// The residual function.
    pub fn residual(&self) -> &R {
        &self.residual
    }

    /// Number of variables.
    pub fn dim(&self) -> usize {
        self.variables.len()
    }

    /// Ordered variable names.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Ordered parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Ordered shock names.
    pub fn shocks(&self) -> &[String] {
        &self.shocks
    }

    /// Parameter values ordered by [`Model::parameters`].
    pub fn parameter_values(&self) -> &DVector<f64> {
        &self.parameter_values
    }

    /// Value of the parameter.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        position(&self.parameters, name).map(|i| self.parameter_values[i])
    }

    /// Sets the value of the parameter and invalidates the cached steady
    /// state.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        let i = position(&self.parameters, name)
            .ok_or_else(|| ModelError::UnknownName(name.to_string()))?;
        self.parameter_values[i] = value;
        self.cache = None;
        Ok(())
    }

    /// Steady-state value of the variable, if known.
    pub fn steady_state(&self, name: &str) -> Option<f64> {
        position(&self.variables, name).and_then(|i| self.steady_state[i])
    }

    /// Sets the steady-state value of the variable.
    pub fn set_steady_state(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        let i = position(&self.variables, name)
            .ok_or_else(|| ModelError::UnknownName(name.to_string()))?;
        self.steady_state[i] = Some(value);
        Ok(())
    }

    /// Steady state ordered by [`Model::variables`].
    ///
    /// Fails if the value of any variable is not known.
    pub fn steady_state_vector(&self) -> Result<DVector<f64>, ModelError> {
        self.variables
            .iter()
            .zip(self.steady_state.iter())
            .map(|(name, value)| value.ok_or_else(|| ModelError::MissingSteadyState(name.clone())))
            .collect::<Result<Vec<_>, _>>()
            .map(DVector::from_vec)
    }

    /// Returns `true` if the parameter is solved jointly with the steady
    /// state.
    pub fn is_calibrated(&self, name: &str) -> bool {
        self.calibrated.contains(name)
    }

    /// Names held at a literal value in the steady state: fixed variables
    /// followed by parameters that are not calibrated, with their values.
    pub fn fixed_values(&self) -> Vec<(&str, f64)> {
        let variables = self
            .fixed
            .iter()
            .map(|(name, value)| (name.as_str(), *value));

        let parameters = self
            .parameters
            .iter()
            .zip(self.parameter_values.iter())
            .filter(|(name, _)| !self.calibrated.contains(name.as_str()))
            .map(|(name, value)| (name.as_str(), *value));

        variables.chain(parameters).collect()
    }

    /// Fixes the steady-state value of a variable.
    pub fn set_fixed(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        if position(&self.variables, name).is_none() {
            return Err(ModelError::UnknownName(name.to_string()));
        }
        self.fixed.insert(name.to_string(), value);
        Ok(())
    }

    /// Whether the variable is fixed in the steady state.
    pub fn is_fixed(&self, name: &str) -> bool {
        self.fixed.contains_key(name)
    }

    /// Initial guess for the steady-state search of a variable or a
    /// calibrated parameter.
    ///
    /// Falls back to the current steady-state value, then to the current
    /// parameter value and finally to `1.0`.
    pub fn initial_guess(&self, name: &str) -> f64 {
        self.initial_guess
            .get(name)
            .copied()
            .or_else(|| self.steady_state(name))
            .or_else(|| self.parameter(name))
            .unwrap_or(1.0)
    }

    /// The linear operator, if supplied.
    pub fn linear_operator(&self) -> Option<&LinearOperator> {
        self.linear.as_ref()
    }

    /// Sets the linear operator.
    pub fn set_linear_operator(&mut self, linear: LinearOperator) -> Result<(), ModelError> {
        check_linear(&linear, self.dim())?;
        self.linear = Some(linear);
        Ok(())
    }

    /// Options for every per-period rootfinding.
    pub fn root_options(&self) -> &RootOptions {
        &self.root_options
    }

    /// Mutable access to the options for every per-period rootfinding.
    pub fn root_options_mut(&mut self) -> &mut RootOptions {
        &mut self.root_options
    }

    /// Checks that a state vector has one entry per variable.
    pub(crate) fn check_state(&self, x: &DVector<f64>) -> Result<(), ModelError> {
        if x.len() != self.dim() {
            Err(ModelError::InvalidLength {
                expected: self.dim(),
                actual: x.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Writes the solved steady state and parameters back. Does not touch the
    /// cache.
    pub(crate) fn write_steady_state(&mut self, steady_state: &DVector<f64>, parameters: &DVector<f64>) {
        for (slot, value) in self.steady_state.iter_mut().zip(steady_state.iter()) {
            *slot = Some(*value);
        }
        self.parameter_values.copy_from(parameters);
    }
}

/// Builder for the [`Model`].
pub struct ModelBuilder<R> {
    residual: R,
    variables: Vec<String>,
    parameters: Vec<(String, f64)>,
    shocks: Vec<String>,
    steady_state: Vec<(String, f64)>,
    calibrated: Vec<String>,
    fixed: Vec<(String, f64)>,
    initial_guess: Vec<(String, f64)>,
    linear: Option<LinearOperator>,
    root_options: RootOptions,
}

impl<R: ResidualSystem> ModelBuilder<R> {
    /// Sets the ordered list of variables.
    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = names.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a parameter with its value.
    pub fn parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    /// Sets the ordered list of shocks.
    pub fn shocks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shocks = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a known steady-state value of a variable.
    pub fn steady_state(mut self, name: impl Into<String>, value: f64) -> Self {
        self.steady_state.push((name.into(), value));
        self
    }

    /// Marks the parameter as solved jointly with the steady state. Its value
    /// serves as the initial guess.
    pub fn calibrated(mut self, name: impl Into<String>) -> Self {
        self.calibrated.push(name.into());
        self
    }

    /// Fixes the steady-state value of a variable.
    pub fn fixed(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fixed.push((name.into(), value));
        self
    }

    /// Sets the initial guess of a variable or a calibrated parameter for the
    /// steady-state search.
    pub fn initial_guess(mut self, name: impl Into<String>, value: f64) -> Self {
        self.initial_guess.push((name.into(), value));
        self
    }

    /// Sets the linear operator for the linear fast path.
    pub fn linear_operator(mut self, linear: LinearOperator) -> Self {
        self.linear = Some(linear);
        self
    }

    /// Sets the options for every per-period rootfinding.
    pub fn root_options(mut self, options: RootOptions) -> Self {
        self.root_options = options;
        self
    }

    /// Validates the definition and builds the [`Model`].
    pub fn build(self) -> Result<Model<R>, ModelError> {
        let Self {
            residual,
            variables,
            parameters,
            shocks,
            steady_state: known,
            calibrated,
            fixed,
            initial_guess,
            linear,
            root_options,
        } = self;

        if residual.dim() != variables.len() {
            return Err(ModelError::DimensionMismatch {
                residuals: residual.dim(),
                variables: variables.len(),
            });
        }

        let (parameters, parameter_values): (Vec<_>, Vec<_>) = parameters.into_iter().unzip();

        let mut names = HashSet::new();
        for name in variables.iter().chain(parameters.iter()).chain(shocks.iter()) {
            if !names.insert(name.as_str()) {
                return Err(ModelError::DuplicateName(name.clone()));
            }
        }

        let mut steady_state = vec![None; variables.len()];
        for (name, value) in known {
            let i = position(&variables, &name).ok_or(ModelError::UnknownName(name))?;
            steady_state[i] = Some(value);
        }

        for name in calibrated.iter() {
            if position(&parameters, name).is_none() {
                return Err(ModelError::UnknownName(name.clone()));
            }
        }

        for (name, _) in fixed.iter() {
            if position(&variables, name).is_none() {
                return Err(ModelError::UnknownName(name.clone()));
            }
        }

        for (name, _) in initial_guess.iter() {
            if !names.contains(name.as_str()) {
                return Err(ModelError::UnknownName(name.clone()));
            }
        }

        if let Some(linear) = &linear {
            check_linear(linear, variables.len())?;
        }

        Ok(Model {
            residual,
            variables,
            parameters,
            parameter_values: DVector::from_vec(parameter_values),
            shocks,
            steady_state,
            calibrated: calibrated.into_iter().collect(),
            fixed: fixed.into_iter().collect(),
            initial_guess: initial_guess.into_iter().collect(),
            linear,
            root_options,
            cache: None,
        })
    }
}

fn position(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|n| n == name)
}

fn check_linear(linear: &LinearOperator, n: usize) -> Result<(), ModelError> {
    if linear.dim() != n {
        Err(ModelError::LinearOperatorShape {
            expected: n,
            actual: linear.backward().shape(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{FnResidual, Slices};
    use nalgebra::dmatrix;

    fn two_equations() -> FnResidual<impl Fn(&Slices<'_>, &mut DVector<f64>) -> Result<(), crate::core::ProblemError>> {
        FnResidual::new(2, |s: &Slices<'_>, out: &mut DVector<f64>| {
            out[0] = s.current[0] - s.parameters[0];
            out[1] = s.current[1] - s.parameters[1] * s.current[0];
            Ok(())
        })
    }

    #[test]
    fn builder_validates_names() {
        let result = Model::builder(two_equations())
            .variables(["x", "y"])
            .parameter("x", 1.0)
            .build();
        assert!(matches!(result, Err(ModelError::DuplicateName(name)) if name == "x"));

        let result = Model::builder(two_equations())
            .variables(["x", "y"])
            .parameter("a", 1.0)
            .calibrated("b")
            .build();
        assert!(matches!(result, Err(ModelError::UnknownName(name)) if name == "b"));

        let result = Model::builder(two_equations())
            .variables(["x", "y"])
            .fixed("a", 1.0)
            .parameter("a", 1.0)
            .build();
        assert!(matches!(result, Err(ModelError::UnknownName(name)) if name == "a"));
    }

    #[test]
    fn builder_validates_dimensions() {
        let result = Model::builder(two_equations()).variables(["x"]).build();
        assert!(matches!(
            result,
            Err(ModelError::DimensionMismatch {
                residuals: 2,
                variables: 1
            })
        ));

        let result = Model::builder(two_equations())
            .variables(["x", "y"])
            .linear_operator(LinearOperator::new(dmatrix![1.0], dmatrix![1.0]).unwrap())
            .build();
        assert!(matches!(
            result,
            Err(ModelError::LinearOperatorShape { expected: 2, .. })
        ));
    }

    #[test]
    fn steady_state_must_be_complete() {
        let mut model = Model::builder(two_equations())
            .variables(["x", "y"])
            .steady_state("y", 2.0)
            .build()
            .unwrap();

        assert!(matches!(
            model.steady_state_vector(),
            Err(ModelError::MissingSteadyState(name)) if name == "x"
        ));

        model.set_steady_state("x", 1.0).unwrap();
        assert_eq!(model.steady_state_vector().unwrap().as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn fixed_values_and_guesses() {
        let model = Model::builder(two_equations())
            .variables(["x", "y"])
            .parameter("a", 3.0)
            .parameter("b", 0.5)
            .calibrated("b")
            .fixed("y", 4.0)
            .steady_state("x", 2.0)
            .initial_guess("b", 0.7)
            .build()
            .unwrap();

        assert_eq!(model.fixed_values(), vec![("y", 4.0), ("a", 3.0)]);
        assert!(model.is_calibrated("b"));
        assert!(model.is_fixed("y"));

        assert_eq!(model.initial_guess("b"), 0.7);
        assert_eq!(model.initial_guess("x"), 2.0);
        assert_eq!(model.initial_guess("a"), 3.0);
        assert_eq!(model.initial_guess("y"), 1.0);
    }

    #[test]
    fn set_parameter() {
        let mut model = Model::builder(two_equations())
            .variables(["x", "y"])
            .parameter("a", 3.0)
            .build()
            .unwrap();

        model.set_parameter("a", 4.0).unwrap();
        assert_eq!(model.parameter("a"), Some(4.0));
        assert!(matches!(
            model.set_parameter("z", 1.0),
            Err(ModelError::UnknownName(_))
        ));
    }
}
