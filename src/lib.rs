//! # stochot
//!
//! Stochastic solvers for entropic regularized optimal transport.
//!
//! When the cost matrix is large, exact solvers (network simplex) and
//! full-batch fixed-point iteration (Sinkhorn scaling) become expensive:
//! every iteration touches all `ns × nt` entries. The solvers in this crate
//! instead run stochastic gradient ascent on the *dual* and *semi-dual*
//! formulations of the entropic OT problem, touching only a sampled row or
//! index batch per iteration.
//!
//! ## Solvers
//!
//! | Function | Formulation | Sampling | Per-iteration cost |
//! |----------|-------------|----------|--------------------|
//! | [`solve_semidual_entropic`] (`"sag"`) | semi-dual | one source row | O(nt), plus an ns×nt gradient table |
//! | [`solve_semidual_entropic`] (`"asgd"`) | semi-dual | one source row | O(nt) |
//! | [`solve_dual_entropic`] | dual | index batches | O(batch²) |
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::array;
//! use stochot::{solve_semidual_entropic, SemidualConfig};
//!
//! let a = array![0.5, 0.5];
//! let b = array![0.5, 0.5];
//! let cost = array![[0.0, 1.0], [1.0, 0.0]];
//!
//! let cfg = SemidualConfig { iterations: 2_000, ..Default::default() };
//! let (plan, _log) = solve_semidual_entropic(&a, &b, &cost, 1.0, "sag", &cfg).unwrap();
//! assert_eq!(plan.shape(), &[2, 2]);
//! ```
//!
//! ## What Can Go Wrong
//!
//! 1. **Overflow for small `reg`**: the semi-dual coordinate gradient
//!    exponentiates `(beta_j - C_ij)/reg` without a log-sum-exp shift. Scale
//!    costs or pick `reg` accordingly; only the c-transform is shifted.
//! 2. **Marginals match only approximately**: these are fixed-iteration
//!    stochastic methods with no convergence test. Row/column sums approach
//!    `a`/`b` in expectation as the iteration count grows, never exactly.
//! 3. **Zero source weights + default learning rate**: the `1/max(a/reg)`
//!    heuristic is only defined for strictly positive `a`; pass an explicit
//!    learning rate for sparse source measures.
//!
//! ## References
//!
//! - Genevay, Cuturi, Peyré, Bach (2016). "Stochastic Optimization for
//!   Large-scale Optimal Transport" (NeurIPS)
//! - Seguy et al. (2018). "Large-Scale Optimal Transport and Mapping
//!   Estimation" (ICLR)
//! - Peyré & Cuturi (2019). "Computational Optimal Transport"

use ndarray::{Array1, Array2};
use thiserror::Error;

pub mod dual;
pub mod semidual;

pub use dual::{solve_dual_entropic, DualSgdConfig};
pub use semidual::{solve_semidual_entropic, Method, SemidualConfig};

/// Optimal Transport error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecognized solver name passed to the semi-dual orchestrator.
    #[error("unknown solver method {0:?}, expected \"sag\" or \"asgd\"")]
    InvalidMethod(String),

    /// Cost matrix shape mismatch.
    #[error("cost matrix shape mismatch: expected ({0}, {1}), got ({2}, {3})")]
    CostShapeMismatch(usize, usize, usize, usize),

    /// Distribution does not sum to 1.0.
    #[error("distribution does not sum to 1.0 (sum = {0})")]
    NotNormalized(f64),

    /// Invalid regularization parameter.
    #[error("regularization parameter must be positive and finite, got {0}")]
    InvalidRegularization(f64),

    /// Batch size outside the sampleable index range.
    #[error("batch size must be in 1..=min(ns, nt) = {1}, got {0}")]
    InvalidBatchSize(usize, usize),

    /// Domain error (invalid inputs for the mathematical definition).
    #[error("{0}")]
    Domain(&'static str),
}

/// Result type for Optimal Transport operations.
pub type Result<T> = std::result::Result<T, Error>;

const NORMALIZATION_TOL: f64 = 1e-6;

/// Final dual potentials of a solver run, returned when logging is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Potentials {
    /// Source-side dual variable (length ns).
    pub alpha: Array1<f64>,
    /// Target-side dual variable (length nt).
    pub beta: Array1<f64>,
}

/// Reconstruct the transport plan from dual potentials via the Gibbs kernel:
///
/// ```text
/// pi_ij = exp((alpha_i + beta_j - C_ij) / reg) * a_i * b_j
/// ```
///
/// Shared by both orchestrators; the semi-dual path obtains `alpha` from the
/// c-transform, the dual path optimizes both potentials directly.
pub fn gibbs_plan(
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    a: &Array1<f64>,
    b: &Array1<f64>,
) -> Array2<f64> {
    let ns = alpha.len();
    let nt = beta.len();
    debug_assert_eq!(cost.nrows(), ns);
    debug_assert_eq!(cost.ncols(), nt);

    let mut plan = Array2::zeros((ns, nt));
    for i in 0..ns {
        for j in 0..nt {
            plan[[i, j]] = ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp() * a[i] * b[j];
        }
    }
    plan
}

/// Validate the (a, b, cost, reg) inputs shared by both solver families.
pub(crate) fn check_transport_inputs(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
) -> Result<()> {
    let ns = a.len();
    let nt = b.len();
    if cost.nrows() != ns || cost.ncols() != nt {
        return Err(Error::CostShapeMismatch(ns, nt, cost.nrows(), cost.ncols()));
    }
    if !reg.is_finite() || reg <= 0.0 {
        return Err(Error::InvalidRegularization(reg));
    }
    if a.iter().any(|&x| x < 0.0) || b.iter().any(|&x| x < 0.0) {
        return Err(Error::Domain("measures must be nonnegative"));
    }
    let a_sum = a.sum();
    if (a_sum - 1.0).abs() > NORMALIZATION_TOL {
        return Err(Error::NotNormalized(a_sum));
    }
    let b_sum = b.sum();
    if (b_sum - 1.0).abs() > NORMALIZATION_TOL {
        return Err(Error::NotNormalized(b_sum));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn gibbs_plan_zero_potentials_is_weighted_kernel() {
        let alpha = array![0.0, 0.0];
        let beta = array![0.0, 0.0];
        let cost = array![[0.0, 1.0], [1.0, 0.0]];
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];

        let plan = gibbs_plan(&alpha, &beta, &cost, 1.0, &a, &b);

        // pi_ij = exp(-C_ij) * a_i * b_j
        assert!((plan[[0, 0]] - 0.25).abs() < 1e-12);
        assert!((plan[[0, 1]] - 0.25 * (-1.0f64).exp()).abs() < 1e-12);
        assert!((plan[[1, 0]] - 0.25 * (-1.0f64).exp()).abs() < 1e-12);
        assert!((plan[[1, 1]] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn gibbs_plan_potential_shift_cancels() {
        // Shifting alpha by +c and beta by -c leaves the plan unchanged.
        let alpha = array![0.3, -0.1];
        let beta = array![0.2, 0.4];
        let cost = array![[0.0, 2.0], [1.0, 0.5]];
        let a = array![0.6, 0.4];
        let b = array![0.5, 0.5];

        let p1 = gibbs_plan(&alpha, &beta, &cost, 0.7, &a, &b);
        let shifted_alpha = alpha.mapv(|x| x + 1.3);
        let shifted_beta = beta.mapv(|x| x - 1.3);
        let p2 = gibbs_plan(&shifted_alpha, &shifted_beta, &cost, 0.7, &a, &b);

        for (x, y) in p1.iter().zip(p2.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn check_inputs_rejects_shape_mismatch() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let cost = Array2::zeros((3, 2));
        assert!(matches!(
            check_transport_inputs(&a, &b, &cost, 1.0),
            Err(Error::CostShapeMismatch(2, 2, 3, 2))
        ));
    }

    #[test]
    fn check_inputs_rejects_bad_reg() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let cost = Array2::zeros((2, 2));
        assert!(matches!(
            check_transport_inputs(&a, &b, &cost, 0.0),
            Err(Error::InvalidRegularization(_))
        ));
        assert!(matches!(
            check_transport_inputs(&a, &b, &cost, f64::NAN),
            Err(Error::InvalidRegularization(_))
        ));
    }

    #[test]
    fn check_inputs_rejects_unnormalized_and_negative() {
        let cost = Array2::zeros((2, 2));
        let good = array![0.5, 0.5];

        let unnormalized = array![0.7, 0.5];
        assert!(matches!(
            check_transport_inputs(&unnormalized, &good, &cost, 1.0),
            Err(Error::NotNormalized(_))
        ));

        let negative = array![1.5, -0.5];
        assert!(matches!(
            check_transport_inputs(&negative, &good, &cost, 1.0),
            Err(Error::Domain(_))
        ));
    }
}
