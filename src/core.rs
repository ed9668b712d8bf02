//! Core abstractions and types.
//!
//! *Users* are mainly interested in implementing the [`ResidualSystem`] trait
//! for their model and handing it to a [`Model`](crate::model::Model).
//!
//! The remaining traits describe the algebraic problems that the solvers work
//! on internally. A [`System`] is what a [`Solver`] iterates on; the steady
//! state and every per-period solve of the path are expressed as systems built
//! on top of the model's residual function.

mod base;
mod domain;
mod residual;
mod solver;
mod system;

pub use base::*;
pub use domain::*;
pub use residual::*;
pub use solver::*;
pub use system::*;
