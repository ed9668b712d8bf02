use thiserror::Error;

use super::domain::Domain;

/// The base trait for [`System`](super::system::System).
pub trait Problem {
    /// Get the domain of the problem, that is, the number of unknowns and
    /// optionally their typical magnitudes.
    fn domain(&self) -> Domain;
}

/// Error encountered while evaluating residuals.
///
/// This is the only kind of failure that the solvers do not absorb into their
/// results. It means that the model itself could not be evaluated, not that a
/// numerical method failed to converge.
#[derive(Debug, Error)]
pub enum ProblemError {
    /// The length of a vector does not match what the problem expects.
    #[error("invalid dimensionality (expected {expected}, got {actual})")]
    InvalidDimensionality {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// A custom error specific to the model.
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl ProblemError {
    /// Wraps a model-specific error.
    pub fn custom<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Custom(error.into())
    }
}
