//! High-level API for iterating a solver.
//!
//! The driver encapsulates all internal state of a [`Solver`] run and provides
//! a simple API to step through the iterative process. The rootfinders of this
//! crate are built on it, but it can be used directly for any [`System`].
//!
//! The simplest way of using the driver is to initialize it with the defaults:
//!
//! ```rust
//! use equilibria::nalgebra::{dvector, DVector};
//! use equilibria::{Domain, Problem, ProblemError, SolverDriver, System};
//!
//! struct Shifted;
//!
//! impl Problem for Shifted {
//!     fn domain(&self) -> Domain {
//!         Domain::unconstrained(2)
//!     }
//! }
//!
//! impl System for Shifted {
//!     fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError> {
//!         rx[0] = x[0] + x[1] - 3.0;
//!         rx[1] = x[0] - x[1] + 1.0;
//!         Ok(())
//!     }
//! }
//!
//! let f = Shifted;
//! let mut solver = SolverDriver::builder(&f)
//!     .with_initial(dvector![10.0, -10.0])
//!     .build();
//!
//! for _ in 0..100 {
//!     solver.next().expect("solver error");
//!
//!     if solver.max_abs() <= 1e-9 {
//!         break;
//!     }
//! }
//!
//! let x = solver.x();
//! assert!((x[0] - 1.0).abs() < 1e-6 && (x[1] - 2.0).abs() < 1e-6);
//! ```

use nalgebra::DVector;

use crate::{
    algo::TrustRegion,
    core::{max_abs, Domain, Solver, System},
};

/// Builder for the [`SolverDriver`].
pub struct SolverBuilder<'a, R: System, A> {
    r: &'a R,
    dom: Domain,
    algo: A,
    x0: DVector<f64>,
}

impl<'a, R: System> SolverBuilder<'a, R, TrustRegion> {
    fn new(r: &'a R) -> Self {
        let dom = r.domain();
        let algo = TrustRegion::new(r, &dom);
        let x0 = DVector::zeros(dom.dim());

        Self { r, dom, algo, x0 }
    }
}

impl<'a, R: System, A> SolverBuilder<'a, R, A> {
    /// Sets the initial point from which the iterative process starts.
    pub fn with_initial(mut self, x0: DVector<f64>) -> Self {
        self.x0 = x0;
        self
    }

    /// Sets specific algorithm to be used.
    ///
    /// This builder method accepts a closure that takes the reference to the
    /// system and its domain, so a constructor like `TrustRegion::new` can be
    /// passed directly.
    pub fn with_algo<S2, FA>(self, factory: FA) -> SolverBuilder<'a, R, S2>
    where
        FA: FnOnce(&R, &Domain) -> S2,
    {
        let algo = factory(self.r, &self.dom);

        SolverBuilder {
            r: self.r,
            dom: self.dom,
            algo,
            x0: self.x0,
        }
    }

    /// Builds the [`SolverDriver`].
    pub fn build(self) -> SolverDriver<'a, R, A> {
        let Self { r, dom, algo, x0 } = self;
        let rx = DVector::zeros(r.residuals());

        SolverDriver {
            r,
            dom,
            algo,
            x: x0,
            rx,
        }
    }
}

/// The driver for the process of solving a system of equations.
///
/// Created by [`SolverDriver::builder`], which defaults to the
/// [`TrustRegion`] algorithm.
pub struct SolverDriver<'a, R: System, A> {
    r: &'a R,
    dom: Domain,
    algo: A,
    x: DVector<f64>,
    rx: DVector<f64>,
}

impl<'a, R: System> SolverDriver<'a, R, TrustRegion> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(r: &'a R) -> SolverBuilder<'a, R, TrustRegion> {
        SolverBuilder::new(r)
    }
}

impl<'a, R: System, A> SolverDriver<'a, R, A> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Returns the maximum absolute residual.
    pub fn max_abs(&self) -> f64 {
        max_abs(&self.rx)
    }

    /// Consumes the driver, returning the current point and its residuals.
    pub fn into_parts(self) -> (DVector<f64>, DVector<f64>) {
        (self.x, self.rx)
    }
}

impl<'a, R: System, A: Solver<R>> SolverDriver<'a, R, A> {
    /// Does one iteration of the process, returning the current point and the
    /// norm of the residuals in case of no error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<(&DVector<f64>, f64), A::Error> {
        self.algo
            .solve_next(self.r, &self.dom, &mut self.x, &mut self.rx)?;
        Ok((&self.x, self.rx.norm()))
    }

    /// Returns the name of the used solver.
    pub fn name(&self) -> &str {
        A::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::algo::trust_region::TrustRegionOptions;
    use crate::core::{Problem, ProblemError};

    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    struct Shifted;

    impl Problem for Shifted {
        fn domain(&self) -> Domain {
            Domain::unconstrained(2)
        }
    }

    impl System for Shifted {
        fn eval(&self, x: &DVector<f64>, rx: &mut DVector<f64>) -> Result<(), ProblemError> {
            rx[0] = x[0] + x[1] - 3.0;
            rx[1] = x[0] - x[1] + 1.0;
            Ok(())
        }
    }

    #[test]
    fn builder_sets_initial_point() {
        let f = Shifted;
        let driver = SolverDriver::builder(&f)
            .with_initial(dvector![3.0, -1.0])
            .build();

        assert_eq!(driver.x().as_slice(), &[3.0, -1.0]);
        assert_eq!(driver.name(), "Trust-region");

        let (x, rx) = driver.into_parts();
        assert_eq!(x, dvector![3.0, -1.0]);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn iterate_with_custom_options() {
        let f = Shifted;
        let mut driver = SolverDriver::builder(&f)
            .with_initial(dvector![3.0, -1.0])
            .with_algo(|f, dom| {
                let mut options = TrustRegionOptions::default();
                options.set_rejections_thresh(50);
                TrustRegion::with_options(f, dom, options)
            })
            .build();

        let mut iters = 0;
        loop {
            let (_, norm) = driver.next().unwrap();
            iters += 1;

            if norm <= 1e-10 || iters >= 10 {
                break;
            }
        }

        assert!(driver.max_abs() <= 1e-10);
        assert_abs_diff_eq!(driver.x(), &dvector![1.0, 2.0], epsilon = 1e-8);
    }
}
