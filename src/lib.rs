#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Equilibria
//!
//! Steady states and perfect-foresight transition paths of discrete-time
//! nonlinear dynamic models, written entirely in Rust.
//!
//! A model is a residual function of three adjacent time slices of the state
//! (past, present and future), plus its steady state, shocks and parameters.
//! Given a model, the library answers two questions:
//!
//! * What is the steady state? The [steady-state solver](steady_state) runs
//!   a Newton iteration with the pseudo-inverse of the Jacobian matrix, so
//!   that singular or non-square systems (e.g., with jointly calibrated
//!   parameters) are handled too.
//! * How does the model get back to the steady state from a given initial
//!   state? The [path solver](path) shoots forward period by period, holding
//!   the far future at the steady state and growing the window of periods
//!   that are solved for until the first one settles.
//!
//! Numerical problems on the path (failed solves, non-finite values, an
//! exhausted budget) never abort the computation. They are collected in
//! [`ConvergenceFlags`] and returned together with the best available path.
//!
//! ## Model
//!
//! The residual function is any type that implements [`ResidualSystem`],
//! or a closure wrapped in [`FnResidual`]. Variables, parameters and the
//! steady state are attached in a [`Model`].
//!
//! ```rust
//! use equilibria::nalgebra::DVector;
//! use equilibria::{FnResidual, Model, Slices};
//!
//! // x[t] = x̄ + ρ (x[t-1] - x̄)
//! let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
//!     let rho = s.parameters[0];
//!     let ss = s.steady_state[0];
//!     out[0] = s.current[0] - ss - rho * (s.lagged[0] - ss);
//!     Ok(())
//! });
//!
//! let model = Model::builder(residual)
//!     .variables(["x"])
//!     .parameter("rho", 0.5)
//!     .steady_state("x", 10.0)
//!     .build()
//!     .expect("invalid model");
//! # assert_eq!(model.dim(), 1);
//! ```
//!
//! ## Solving
//!
//! ```rust
//! use equilibria::nalgebra::{dvector, DVector};
//! use equilibria::{FnResidual, Model, PathOptions, Slices, SteadyStateOptions};
//!
//! # let residual = FnResidual::new(1, |s: &Slices<'_>, out: &mut DVector<f64>| {
//! #     let rho = s.parameters[0];
//! #     let ss = s.steady_state[0];
//! #     out[0] = s.current[0] - ss - rho * (s.lagged[0] - ss);
//! #     Ok(())
//! # });
//! let mut model = Model::builder(residual)
//!     .variables(["x"])
//!     .parameter("rho", 0.5)
//!     .initial_guess("x", 1.0)
//!     .build()
//!     .expect("invalid model");
//!
//! // Any value is a steady state of this model. The Newton step with the
//! // pseudo-inverse stays at the initial guess.
//! let mut options = SteadyStateOptions::default();
//! options.set_verbose(false);
//! let result = model.solve_steady_state(&options).expect("evaluation error");
//! assert!(result.success);
//!
//! let mut options = PathOptions::default();
//! options.set_horizon(10).set_verbose(false);
//! let solution = model.find_path(&dvector![0.0], &options).expect("evaluation error");
//!
//! if solution.is_converged() {
//!     println!("x[1] = {}", solution.trajectory[1][0]);
//! } else {
//!     println!("path is not reliable{}", solution.flags);
//! }
//! ```
//!
//! ## Internals
//!
//! Each per-period solve and the steady state are algebraic systems
//! ([`System`]) solved by the [trust region](algo::trust_region) method,
//! with Jacobian matrices approximated by [finite
//! differences](derivatives). These are public for custom drivers and
//! rootfinders (see [`Rootfinder`] and [`path::find_path_using`]).
//!
//! ## License
//!
//! Licensed under MIT.

pub mod algo;
mod core;
pub mod derivatives;
pub mod driver;
pub mod flags;
pub mod linear;
pub mod model;
pub mod path;
pub mod root;
pub mod steady_state;

pub use crate::core::*;
pub use driver::SolverDriver;
pub use flags::{ConvergenceFlags, Flag};
pub use linear::LinearOperator;
pub use model::{Model, ModelBuilder, ModelError};
pub use path::{find_path, PathError, PathOptions, PathSolution};
pub use root::{RootOptions, RootReport, Rootfinder, TrustRegionRootfinder};
pub use steady_state::{SteadyStateError, SteadyStateOptions, SteadyStateResult};

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(all(test, not(feature = "testing")))]
pub(crate) mod testing;

pub use nalgebra;
