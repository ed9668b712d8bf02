//! Problem domain definition.

use std::iter::FromIterator;

use nalgebra::DVector;

/// Domain for a problem.
///
/// All problems solved in this crate are unconstrained. The domain carries the
/// number of unknowns and, optionally, the scale of each of them, which is
/// used for finite differences and for measuring trust region steps.
#[derive(Debug, Clone)]
pub struct Domain {
    dim: usize,
    scale: Option<DVector<f64>>,
}

impl Domain {
    /// Creates unconstrained domain with given dimension.
    ///
    /// The dimension may be zero, for example for a steady state where every
    /// value is fixed.
    pub fn unconstrained(dim: usize) -> Self {
        Self { dim, scale: None }
    }

    /// Sets a custom scale for the domain.
    ///
    /// Scale value of a variable is the inverse of the expected magnitude of
    /// that variable.
    pub fn with_scale(mut self, scale: DVector<f64>) -> Self {
        assert!(scale.len() == self.dim, "scale has invalid dimension");

        self.scale = Some(scale);
        self
    }

    /// Gets the dimension of the domain.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Gets the scale if available.
    pub fn scale(&self) -> Option<&DVector<f64>> {
        self.scale.as_ref()
    }

    /// Gets the scale, falling back to unit scale for all variables.
    pub fn scale_or_unit(&self) -> DVector<f64> {
        self.scale
            .clone()
            .unwrap_or_else(|| DVector::from_element(self.dim, 1.0))
    }
}

/// Builds a domain from typical magnitudes of the variables.
///
/// Zero or non-finite magnitudes are replaced by one.
impl FromIterator<f64> for Domain {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let scale = iter
            .into_iter()
            .map(|magnitude| {
                let magnitude = magnitude.abs();
                if magnitude > 0.0 && magnitude.is_finite() {
                    1.0 / magnitude
                } else {
                    1.0
                }
            })
            .collect::<Vec<_>>();

        let dim = scale.len();
        Self::unconstrained(dim).with_scale(DVector::from_vec(scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitudes_to_scale() {
        let dom: Domain = [10.0, -0.5, 0.0].into_iter().collect();

        assert_eq!(dom.dim(), 3);
        assert_eq!(dom.scale().unwrap().as_slice(), &[0.1, 2.0, 1.0]);
    }

    #[test]
    fn unit_scale_fallback() {
        let dom = Domain::unconstrained(2);

        assert!(dom.scale().is_none());
        assert_eq!(dom.scale_or_unit().as_slice(), &[1.0, 1.0]);
    }
}
