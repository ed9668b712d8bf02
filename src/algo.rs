//! Iterative solvers of the algebraic systems.
//!
//! Only the [trust region](trust_region) method is provided. It is used for
//! every per-period solve of the path, through
//! [`TrustRegionRootfinder`](crate::root::TrustRegionRootfinder).

pub mod trust_region;

pub use trust_region::TrustRegion;
