//! Trust region method.
//!
//! More than a particular algorithm, [trust
//! region](https://en.wikipedia.org/wiki/Trust_region) methods is actually sort
//! of a framework of various techniques. This also applies to the
//! implementation of this method here; it is composed of multiple techniques
//! that are applied in specific cases. The basis is [Powell's dogleg
//! method](https://en.wikipedia.org/wiki/Powell%27s_dog_leg_method), while a
//! variant of
//! [Levenberg-Marquardt](https://en.wikipedia.org/wiki/Levenberg%E2%80%93Marquardt_algorithm)
//! method is used when using newton direction is not possible.
//!
//! It is the default algorithm behind the per-period solves of the path
//! solver, where the unknown is the state of a single period and its
//! neighbors are held fixed.
//!
//! # References
//!
//! \[1\] [Numerical
//! Optimization](https://link.springer.com/book/10.1007/978-0-387-40065-5)
//!
//! \[2\] [Methods for Non-Linear Least Squares
//! Problems](https://api.semanticscholar.org/CorpusID:64217935)
//!
//! \[3\] [Numerical Methods for Unconstrained Optimization and Nonlinear
//! Equations](https://epubs.siam.org/doi/book/10.1137/1.9781611971200)
//!
//! \[4\] [Implementation of scaled Hybrid algorithm in
//! GSL](https://git.savannah.gnu.org/cgit/gsl.git/tree/multiroots)

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::{
    core::{Domain, ProblemError, Solver, System},
    derivatives::{Jacobian, JacobianError, EPSILON_SQRT},
};

/// Specification for initial value of trust region size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaInit {
    /// Fixed value.
    Fixed(f64),
    /// Estimated from Jacobian matrix in the initial point.
    Estimated,
}

/// Options for [`TrustRegion`] solver.
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct TrustRegionOptions {
    /// Minimum allowed trust region size. Default: `f64::EPSILON.sqrt()`.
    delta_min: f64,
    /// Maximum allowed trust region size. Default: `1e9`.
    delta_max: f64,
    /// Initial trust region size. Default: estimated (see [`DeltaInit`]).
    delta_init: DeltaInit,
    /// Minimum scaling factor for lambda in Levenberg-Marquardt step. Default:
    /// `1e-10`.
    mu_min: f64,
    /// Threshold for gain ratio to shrink trust region size if lower. Default:
    /// `0.25`.
    shrink_thresh: f64,
    /// Threshold for gain ratio to expand trust region size if higher. Default:
    /// `0.75`.
    expand_thresh: f64,
    /// Threshold for gain ratio that needs to be exceeded to accept the
    /// calculated step. Default: `0.0001`.
    accept_thresh: f64,
    /// Number of step rejections that are allowed to happen before returning
    /// [`TrustRegionError::NoProgress`] error. Default: `10`.
    rejections_thresh: usize,
    /// Determines whether steps that increase the error can be accepted.
    /// Default: `true`.
    allow_ascent: bool,
}

impl Default for TrustRegionOptions {
    fn default() -> Self {
        Self {
            delta_min: EPSILON_SQRT,
            delta_max: 1e9,
            delta_init: DeltaInit::Estimated,
            mu_min: 1e-10,
            shrink_thresh: 0.25,
            expand_thresh: 0.75,
            accept_thresh: 0.0001,
            rejections_thresh: 10,
            allow_ascent: true,
        }
    }
}

/// Trust region solver.
///
/// See [module](self) documentation for more details.
pub struct TrustRegion {
    options: TrustRegionOptions,
    delta: f64,
    mu: f64,
    scale: DVector<f64>,
    jac: Jacobian,
    q_tr_rx_neg: DVector<f64>,
    newton: DVector<f64>,
    grad_neg: DVector<f64>,
    cauchy: DVector<f64>,
    p: DVector<f64>,
    temp: DVector<f64>,
    iter: usize,
    rejections_cnt: usize,
}

impl TrustRegion {
    /// Initializes trust region solver with default options.
    pub fn new<R: System>(r: &R, dom: &Domain) -> Self {
        Self::with_options(r, dom, TrustRegionOptions::default())
    }

    /// Initializes trust region solver with given options.
    pub fn with_options<R: System>(r: &R, dom: &Domain, options: TrustRegionOptions) -> Self {
        let n = dom.dim();
        let delta_init = match options.delta_init {
            DeltaInit::Fixed(fixed) => fixed,
            // Zero is recognized in the function `solve_next`.
            DeltaInit::Estimated => 0.0,
        };

        Self {
            options,
            delta: delta_init,
            mu: 0.5,
            scale: dom.scale_or_unit(),
            jac: Jacobian::zeros(r),
            q_tr_rx_neg: DVector::zeros(n),
            newton: DVector::zeros(n),
            grad_neg: DVector::zeros(n),
            cauchy: DVector::zeros(n),
            p: DVector::zeros(n),
            temp: DVector::zeros(n),
            iter: 1,
            rejections_cnt: 0,
        }
    }

    /// Resets the internal state of the solver.
    pub fn reset(&mut self) {
        self.delta = match self.options.delta_init {
            DeltaInit::Fixed(fixed) => fixed,
            DeltaInit::Estimated => 0.0,
        };
        self.mu = 0.5;
        self.iter = 1;
        self.rejections_cnt = 0;
    }
}

/// Error returned from [`TrustRegion`] solver.
#[derive(Debug, Error)]
pub enum TrustRegionError {
    /// Could not take any valid step.
    #[error("neither newton nor steepest descent step can be taken from the point")]
    NoValidStep,
    /// Maximum number of step rejections exceeded.
    #[error("cannot make progress")]
    NoProgress,
    /// The system could not be evaluated.
    #[error("{0}")]
    Problem(#[from] ProblemError),
}

impl From<JacobianError> for TrustRegionError {
    fn from(error: JacobianError) -> Self {
        match error {
            JacobianError::Problem(error) => Self::Problem(error),
        }
    }
}

impl<R: System> Solver<R> for TrustRegion {
    const NAME: &'static str = "Trust-region";

    type Error = TrustRegionError;

    fn solve_next(
        &mut self,
        r: &R,
        dom: &Domain,
        x: &mut DVector<f64>,
        rx: &mut DVector<f64>,
    ) -> Result<(), Self::Error> {
        let TrustRegionOptions {
            delta_min,
            delta_max,
            mu_min,
            shrink_thresh,
            expand_thresh,
            accept_thresh,
            rejections_thresh,
            allow_ascent,
            ..
        } = self.options;

        let Self {
            delta,
            mu,
            scale,
            jac,
            q_tr_rx_neg,
            newton,
            grad_neg,
            cauchy,
            p,
            temp,
            iter,
            rejections_cnt,
            ..
        } = self;

        #[derive(Debug, Clone, Copy, PartialEq)]
        enum StepType {
            FullNewton,
            ScaledNewton,
            LevenbergMarquardt,
            ScaledCauchy,
            Dogleg,
        }

        // Compute r(x) and r'(x).
        r.eval(x, rx)?;
        jac.compute(r, x, scale, rx)?;

        let rx_norm = rx.norm();

        if *delta == 0.0 {
            // Zero delta signifies that the initial delta is to be set
            // automatically and it has not been done yet.
            //
            // The initial delta is estimated as follows. Let vector d be
            // defined as
            //
            //     d_j = || F'(x)_*j || or 1 if it would be 0
            //
            // Then delta = K * || diag(d) x || or K if || diag(d) x || = 0,
            // where K = 100. The approach is taken from GSL.
            for (j, col) in jac.column_iter().enumerate() {
                temp[j] = col.norm();
                if temp[j] == 0.0 {
                    temp[j] = 1.0;
                }
            }
            temp.component_mul_assign(x);

            let factor = 100.0;
            *delta = temp.norm() * factor;

            if *delta == 0.0 || !delta.is_finite() {
                *delta = factor;
            }
        }

        // Perform QR decomposition of F'(x).
        let (qr_q, qr_r) = jac.clone_owned().qr().unpack();

        // Compute -Q^T r(x).
        qr_q.tr_mul_to(rx, q_tr_rx_neg);
        q_tr_rx_neg.neg_mut();

        // Find the Newton step by solving the system R newton = -Q^T r(x).
        newton.copy_from(q_tr_rx_neg);
        let is_newton_valid =
            qr_r.solve_upper_triangular_mut(newton) && newton.iter().all(|ni| ni.is_finite());

        if !is_newton_valid {
            debug!(
                "Newton step is invalid for ill-defined Jacobian (zero columns: {:?})",
                jac.column_iter()
                    .enumerate()
                    .filter(|(_, col)| col.norm() == 0.0)
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>()
            );
        }

        // Compute the norm of scaled Newton step (use temp for storage).
        temp.copy_from(newton);
        temp.component_mul_assign(scale);
        let newton_scaled_norm = temp.norm();

        let step_type = if is_newton_valid && newton_scaled_norm <= *delta {
            // Scaled Newton step is inside the trust region. We can safely take it.
            p.copy_from(newton);
            debug!("take full Newton: {:?}", p.as_slice());
            StepType::FullNewton
        } else {
            // Newton step is outside the trust region. We need to involve the
            // gradient.

            // Compute -grad r(x) = -r'(x)^T r(x) = -R^T Q^T r(x).
            qr_r.tr_mul_to(q_tr_rx_neg, grad_neg);

            let grad_norm = grad_neg.norm();

            if grad_norm == 0.0 {
                // Gradient is zero, it is useless to compute the dogleg step.
                // Instead, we take the Newton direction to the trust region
                // boundary.
                if is_newton_valid {
                    p.copy_from(newton);
                    *p *= *delta / newton_scaled_norm;
                    debug!(
                        "take scaled Newton to trust-region boundary: {:?}",
                        p.as_slice()
                    );
                    StepType::ScaledNewton
                } else {
                    return Err(TrustRegionError::NoValidStep);
                }
            } else {
                // Compute g = -D^(-2) grad F, the steepest descent direction in
                // scaled space (use cauchy for storage).
                cauchy.copy_from(scale);
                cauchy.apply(|s| *s = 1.0 / (*s * *s));
                cauchy.component_mul_assign(grad_neg);

                // Compute tau = -(grad r)^T g / || r'(x) g ||^2.
                let jac_g = &**jac * &*cauchy;
                let jac_g_norm2 = jac_g.norm_squared();
                let tau = grad_neg.dot(cauchy) / jac_g_norm2;

                // Scale the steepest descent to the Cauchy point.
                *cauchy *= tau;

                // Compute ||D cauchy||.
                temp.copy_from(scale);
                temp.component_mul_assign(cauchy);
                let cauchy_scaled_norm = temp.norm();

                if cauchy_scaled_norm >= *delta {
                    // Cauchy point is outside the trust region. We take the
                    // steepest gradient descent to the trust region boundary.
                    p.copy_from(cauchy);
                    *p *= *delta / cauchy_scaled_norm;
                    debug!(
                        "take scaled Cauchy to trust region-boundary: {:?}",
                        p.as_slice()
                    );
                    StepType::ScaledCauchy
                } else if is_newton_valid {
                    // The trust region boundary is crossed by the dogleg path
                    // p(alpha) = cauchy + alpha (newton - cauchy). We need to
                    // find alpha such that || D p || = delta. It is found by
                    // solving the following quadratic equation:
                    //
                    //     || D p ||^2 - delta^2 = 0
                    //
                    // For equation a alpha^2 + 2b alpha + c = 0, we get:
                    //
                    //     a = || D (newton - cauchy) ||^2
                    //     b = cauchy^T D^2 (newton - cauchy)
                    //     c = || D cauchy ||^2 - delta^2
                    //
                    // Due to || D cauchy || < delta, c is always negative and
                    // a is nonnegative, so only the root using the plus sign
                    // lies in (0, 1). Muller's formula is used for b > 0 to
                    // avoid catastrophic cancellation.

                    // Compute D (newton - cauchy) (use p for storage).
                    newton.sub_to(cauchy, p);
                    p.component_mul_assign(scale);

                    // Compute a, b and -c.
                    let a = p.norm_squared();

                    temp.copy_from(p);
                    temp.component_mul_assign(scale);
                    let b = cauchy.dot(temp);

                    let c_neg = *delta * *delta - cauchy_scaled_norm * cauchy_scaled_norm;

                    let d = (b * b + a * c_neg).sqrt();
                    let alpha = if b <= 0.0 {
                        (-b + d) / a
                    } else {
                        c_neg / (b + d)
                    };

                    // Finally, compute the dogleg step p = cauchy + alpha
                    // (newton - cauchy).
                    newton.sub_to(cauchy, p);
                    *p *= alpha;
                    *p += &*cauchy;
                    debug!("take dogleg (factor = {}): {:?}", alpha, p.as_slice());
                    StepType::Dogleg
                } else {
                    // Since F'(x) cannot be inverted so the Newton step is
                    // undefined, we need to fallback to Levenberg-Marquardt
                    // which overcomes this issue but at higher computational
                    // expense. We are looking for lambda such that
                    //
                    //     (B + lambda I) p = - grad r(x)
                    //
                    // such that p is the solution to
                    //
                    //     min 1/2 || r'(x) p + r(x) ||^2 s.t. || D p || <= delta.
                    //
                    // A common choice proven to lead to quadratic convergence
                    // is lambda = || r(x) ||^d, where d is from (0, 2]. An
                    // adaptive choice for d is:
                    //
                    //     d = 1 / || r(x) || if || r(x) || >= 1 and 1 + 1 / k otherwise,
                    //
                    // where k denotes the current iteration.
                    let d = if rx_norm >= 1.0 {
                        1.0 / rx_norm
                    } else {
                        1.0 + 1.0 / *iter as f64
                    };

                    let lambda = *mu * rx_norm.powf(d);

                    // Compute B + lambda I, where B = F'(x)^T F'(x).
                    let mut jac_tr_jac_lambda: DMatrix<f64> = jac.tr_mul(jac);
                    for i in 0..dom.dim() {
                        jac_tr_jac_lambda[(i, i)] += lambda;
                    }

                    // Solve p for (B + lambda I) p = - grad r(x).
                    p.copy_from(grad_neg);

                    let is_levenberg_marquardt_valid = jac_tr_jac_lambda.qr().solve_mut(p);

                    if !is_levenberg_marquardt_valid {
                        debug!(
                            "Levenberg-Marquardt step is invalid for ill-defined matrix B (lambda = {})",
                            lambda
                        );
                    }

                    // Scale p to be in the trust region, i.e., || D p || <=
                    // delta.
                    temp.copy_from(scale);
                    temp.component_mul_assign(p);

                    let p_scaled_norm = temp.norm();

                    if p_scaled_norm > *delta {
                        // The original step was outside, scale it to the
                        // boundary.
                        *p *= *delta / p_scaled_norm;
                    }

                    debug!(
                        "take Levenberg-Marquardt (lambda = {}): {:?}",
                        lambda,
                        p.as_slice()
                    );
                    StepType::LevenbergMarquardt
                }
            }
        };

        // Vectors for Newton and Cauchy steps are no longer used, so we reuse
        // their allocations for another purpose.
        let x_trial = newton;
        let rx_trial = cauchy;

        // Get candidate x' for the next iterate.
        x.add_to(p, x_trial);

        // Compute r(x').
        r.eval(x_trial, rx_trial)?;
        let is_trial_valid = rx_trial.iter().all(|rix| rix.is_finite());
        let rx_trial_norm = rx_trial.norm();

        let gain_ratio = if is_trial_valid {
            // Compute the gain ratio.
            jac.mul_to(p, temp);
            *temp += &*rx;
            let predicted = rx_norm - temp.norm();

            let deny = if allow_ascent {
                // If ascent is allowed, then check only for zero, which would
                // make the gain ratio calculation ill-defined.
                predicted == 0.0
            } else {
                predicted <= 0.0
            };

            if deny {
                debug!("predicted gain = {}", predicted);
                0.0
            } else {
                let actual = rx_norm - rx_trial_norm;
                let gain_ratio = actual / predicted;
                debug!("gain ratio = {} / {} = {}", actual, predicted, gain_ratio);

                gain_ratio
            }
        } else {
            debug!("trial step is invalid, gain ratio = 0");
            0.0
        };

        // Decide if the step is accepted or not.
        if gain_ratio > accept_thresh {
            x.copy_from(x_trial);
            rx.copy_from(rx_trial);
            debug!(
                "step accepted, || rx || = {}, x = {:?}",
                rx_trial_norm,
                x_trial.as_slice()
            );

            *rejections_cnt = 0;
        } else {
            debug!("step rejected, threshold for accepting = {}", accept_thresh);
            *rejections_cnt += 1;

            if *rejections_cnt == rejections_thresh {
                debug!(
                    "solving reached the rejections count limit ({})",
                    rejections_thresh
                );
                return Err(TrustRegionError::NoProgress);
            }
        }

        p.component_mul_assign(scale);
        let p_scaled_norm = p.norm();

        // Potentially update the size of the trust region.
        let delta_old = *delta;
        if gain_ratio < shrink_thresh {
            *delta = (delta_old * 0.25)
                .min(p_scaled_norm * 0.25)
                .max(delta_min);
            debug!(
                "shrink delta from {} to {} (|| D p || = {})",
                delta_old, *delta, p_scaled_norm
            );
        } else if gain_ratio > expand_thresh {
            *delta = (delta_old * 2.0).max(p_scaled_norm * 3.0).min(delta_max);
            debug!(
                "expand delta from {} to {} (|| D p || = {})",
                delta_old, *delta, p_scaled_norm
            );
        }

        // Potentially update the mu parameter for LM method. Shrinkage and
        // expansion are reversed for mu compared to delta.
        if step_type == StepType::LevenbergMarquardt {
            let mu_old = *mu;

            if gain_ratio < shrink_thresh {
                *mu = mu_old * 4.0;
                debug!("expand mu from {} to {}", mu_old, *mu);
            } else if gain_ratio > expand_thresh {
                *mu = (mu_old * 0.25).max(mu_min);
                debug!("shrink mu from {} to {}", mu_old, *mu);
            }
        }

        *iter += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::Problem;
    use crate::path::CurrentPeriod;
    use crate::testing::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    #[test]
    fn current_period_of_ar1() {
        let model = Ar1::new(0.5);
        let (lagged, future, ss) = (dvector![0.0], dvector![10.0], dvector![10.0]);
        let (shocks, parameters) = (DVector::zeros(0), DVector::zeros(0));

        let f = CurrentPeriod {
            residual: &model,
            lagged: &lagged,
            future: &future,
            steady_state: &ss,
            shocks: &shocks,
            parameters: &parameters,
        };
        let dom = f.domain();

        let x = solve(&f, &dom, TrustRegion::new(&f, &dom), dvector![10.0], 25, 1e-12).unwrap();
        assert_abs_diff_eq!(x[0], 5.0, epsilon = 1e-10);
    }

    #[test]
    fn current_period_of_rbc() {
        let (c, k) = Rbc::steady_state(Rbc::ALPHA, Rbc::BETA, Rbc::DELTA);
        let ss = dvector![c, k];
        let lagged = dvector![c, 0.9 * k];
        let shocks = DVector::zeros(0);
        let parameters = dvector![Rbc::ALPHA, Rbc::BETA, Rbc::DELTA];

        let f = CurrentPeriod {
            residual: &Rbc,
            lagged: &lagged,
            future: &ss,
            steady_state: &ss,
            shocks: &shocks,
            parameters: &parameters,
        };
        let dom = f.domain();

        let x = solve(&f, &dom, TrustRegion::new(&f, &dom), ss.clone(), 50, 1e-10).unwrap();
        assert!(is_root(&f, &x, 1e-10));
    }

    #[test]
    fn singular_jacobian_falls_back() {
        // Both equations are identical, the Newton step is undefined.
        let f = Redundant;
        let dom = f.domain();

        match solve(&f, &dom, TrustRegion::new(&f, &dom), dvector![3.0, -1.0], 50, 1e-8) {
            Ok(x) => assert_abs_diff_eq!(x[0] + x[1], 1.0, epsilon = 1e-6),
            Err(TestingError::Inner(TrustRegionError::NoValidStep))
            | Err(TestingError::Inner(TrustRegionError::NoProgress)) => {}
            Err(error) => panic!("{:?}", error),
        }
    }
}
