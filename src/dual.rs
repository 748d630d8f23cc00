//! Batched stochastic ascent on the full entropic OT dual.
//!
//! Unlike the semi-dual path, both potentials `alpha` and `beta` are
//! optimized directly; no c-transform is needed to reconstruct the plan.
//! Each iteration samples an index batch on each side (without replacement)
//! and applies partial-gradient ascent steps with a `lr/√k` decay, either
//! alternating the two updates or applying both from the same pre-update
//! state.
//!
//! # References
//!
//! - Seguy et al. (2018). "Large-Scale Optimal Transport and Mapping
//!   Estimation" (ICLR) -- algorithm 1

use crate::{check_transport_inputs, gibbs_plan, Error, Potentials, Result};
use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tracing::debug;

/// Configuration for the batched dual SGD solver.
#[derive(Debug, Clone)]
pub struct DualSgdConfig {
    /// Indices sampled per side per iteration, `1..=min(ns, nt)`.
    pub batch_size: usize,
    /// Number of ascent steps. The loop always runs to this count; there is
    /// no convergence test.
    pub iterations: usize,
    /// Base learning rate; the step at iteration `k` is `lr/√k`.
    pub lr: f64,
    /// Update `alpha` before computing the `beta` gradient (`true`), or
    /// compute both gradients from the same pre-update state (`false`).
    pub alternate: bool,
    /// RNG seed (deterministic by default).
    pub seed: u64,
    /// Return the final dual potentials alongside the plan.
    pub log: bool,
}

impl DualSgdConfig {
    /// Defaults with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }
}

impl Default for DualSgdConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            iterations: 10_000,
            lr: 1.0,
            alternate: true,
            seed: 42,
            log: false,
        }
    }
}

/// Partial gradient of the dual objective in `alpha`, restricted to the
/// sampled batches.
///
/// Entry `k` (for source index `batch_alpha[k]`) starts at `batch_size` and
/// subtracts `exp((alpha_i + beta_j - C_ij)/reg)` over the sampled target
/// indices. A scaled, unbiased estimator of the full gradient on the
/// sampled support.
pub fn grad_alpha_batch(
    cost: &Array2<f64>,
    reg: f64,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    batch_alpha: &[usize],
    batch_beta: &[usize],
) -> Array1<f64> {
    let bs = batch_alpha.len();
    debug_assert_eq!(batch_beta.len(), bs);

    let mut grad = Array1::from_elem(bs, bs as f64);
    for &j in batch_beta {
        for (k, &i) in batch_alpha.iter().enumerate() {
            grad[k] -= ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp();
        }
    }
    grad
}

/// Partial gradient of the dual objective in `beta`; mirror of
/// [`grad_alpha_batch`] over the target batch.
pub fn grad_beta_batch(
    cost: &Array2<f64>,
    reg: f64,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    batch_alpha: &[usize],
    batch_beta: &[usize],
) -> Array1<f64> {
    let bs = batch_beta.len();
    debug_assert_eq!(batch_alpha.len(), bs);

    let mut grad = Array1::from_elem(bs, bs as f64);
    for &i in batch_alpha {
        for (k, &j) in batch_beta.iter().enumerate() {
            grad[k] -= ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp();
        }
    }
    grad
}

/// Run batched SGD on the dual and return the final `(alpha, beta)`.
///
/// Both potentials are initialized from independent standard-normal draws.
/// With `alternate` set, the `beta` gradient at each iteration already sees
/// the updated `alpha`; otherwise both gradients are computed from the same
/// pre-update state and applied together. Either order is a valid
/// coordinate-block ascent step; only the trajectory differs.
///
/// # Panics
///
/// Panics if `batch_size` exceeds either dimension of `cost`; the
/// orchestrator [`solve_dual_entropic`] validates this up front.
pub fn sgd_potentials<R: Rng>(
    cost: &Array2<f64>,
    reg: f64,
    batch_size: usize,
    iterations: usize,
    lr: f64,
    alternate: bool,
    rng: &mut R,
) -> (Array1<f64>, Array1<f64>) {
    let ns = cost.nrows();
    let nt = cost.ncols();

    let mut alpha = Array1::zeros(ns);
    for i in 0..ns {
        alpha[i] = rng.sample::<f64, _>(StandardNormal);
    }
    let mut beta = Array1::zeros(nt);
    for j in 0..nt {
        beta[j] = rng.sample::<f64, _>(StandardNormal);
    }

    for iter in 0..iterations {
        let step = lr / ((iter + 1) as f64).sqrt();
        let batch_alpha = sample(rng, ns, batch_size).into_vec();
        let batch_beta = sample(rng, nt, batch_size).into_vec();

        if alternate {
            let grad_alpha = grad_alpha_batch(cost, reg, &alpha, &beta, &batch_alpha, &batch_beta);
            for (k, &i) in batch_alpha.iter().enumerate() {
                alpha[i] += step * grad_alpha[k];
            }
            let grad_beta = grad_beta_batch(cost, reg, &alpha, &beta, &batch_alpha, &batch_beta);
            for (k, &j) in batch_beta.iter().enumerate() {
                beta[j] += step * grad_beta[k];
            }
        } else {
            let grad_alpha = grad_alpha_batch(cost, reg, &alpha, &beta, &batch_alpha, &batch_beta);
            let grad_beta = grad_beta_batch(cost, reg, &alpha, &beta, &batch_alpha, &batch_beta);
            for (k, &i) in batch_alpha.iter().enumerate() {
                alpha[i] += step * grad_alpha[k];
            }
            for (k, &j) in batch_beta.iter().enumerate() {
                beta[j] += step * grad_beta[k];
            }
        }
    }

    (alpha, beta)
}

/// Solve entropic OT through the full dual formulation.
///
/// Runs [`sgd_potentials`] and reconstructs the plan with the Gibbs kernel.
/// Returns `(plan, potentials)`; `potentials` is `Some` iff `cfg.log` is
/// set. As with the semi-dual path, marginal feasibility is approximate and
/// improves only with `cfg.iterations`.
pub fn solve_dual_entropic(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    cfg: &DualSgdConfig,
) -> Result<(Array2<f64>, Option<Potentials>)> {
    check_transport_inputs(a, b, cost, reg)?;
    let limit = a.len().min(b.len());
    if cfg.batch_size == 0 || cfg.batch_size > limit {
        return Err(Error::InvalidBatchSize(cfg.batch_size, limit));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let (alpha, beta) = sgd_potentials(
        cost,
        reg,
        cfg.batch_size,
        cfg.iterations,
        cfg.lr,
        cfg.alternate,
        &mut rng,
    );
    debug!(
        batch_size = cfg.batch_size,
        iterations = cfg.iterations,
        alternate = cfg.alternate,
        seed = cfg.seed,
        "dual SGD solve finished"
    );

    let plan = gibbs_plan(&alpha, &beta, cost, reg, a, b);
    let log = cfg.log.then(|| Potentials { alpha, beta });
    Ok((plan, log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line_cost(ns: usize, nt: usize) -> Array2<f64> {
        let mut cost = Array2::zeros((ns, nt));
        for i in 0..ns {
            for j in 0..nt {
                cost[[i, j]] = (i as f64 - j as f64).abs();
            }
        }
        cost
    }

    #[test]
    fn full_coverage_batch_gradient_matches_closed_form() {
        let cost = line_cost(3, 3);
        let reg = 0.8;
        let alpha = array![0.1, -0.4, 0.2];
        let beta = array![-0.2, 0.3, 0.0];
        let full: Vec<usize> = (0..3).collect();

        let ga = grad_alpha_batch(&cost, reg, &alpha, &beta, &full, &full);
        let gb = grad_beta_batch(&cost, reg, &alpha, &beta, &full, &full);

        for i in 0..3 {
            let mut expected = 3.0;
            for j in 0..3 {
                expected -= ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp();
            }
            assert!((ga[i] - expected).abs() < 1e-12, "alpha grad at {}", i);
        }
        for j in 0..3 {
            let mut expected = 3.0;
            for i in 0..3 {
                expected -= ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp();
            }
            assert!((gb[j] - expected).abs() < 1e-12, "beta grad at {}", j);
        }
    }

    #[test]
    fn batch_gradients_have_batch_length() {
        let cost = line_cost(4, 5);
        let alpha = Array1::zeros(4);
        let beta = Array1::zeros(5);
        let batch_alpha = [3usize, 0];
        let batch_beta = [4usize, 1];

        let ga = grad_alpha_batch(&cost, 1.0, &alpha, &beta, &batch_alpha, &batch_beta);
        let gb = grad_beta_batch(&cost, 1.0, &alpha, &beta, &batch_alpha, &batch_beta);
        assert_eq!(ga.len(), 2);
        assert_eq!(gb.len(), 2);
    }

    #[test]
    fn sgd_potentials_is_deterministic_per_seed() {
        let cost = line_cost(4, 4);
        for alternate in [true, false] {
            let mut rng1 = ChaCha8Rng::seed_from_u64(11);
            let mut rng2 = ChaCha8Rng::seed_from_u64(11);
            let (a1, b1) = sgd_potentials(&cost, 1.0, 2, 300, 0.1, alternate, &mut rng1);
            let (a2, b2) = sgd_potentials(&cost, 1.0, 2, 300, 0.1, alternate, &mut rng2);
            assert_eq!(a1, a2);
            assert_eq!(b1, b2);
        }
    }

    #[test]
    fn update_orders_produce_different_trajectories() {
        let cost = line_cost(4, 4);
        let mut rng1 = ChaCha8Rng::seed_from_u64(5);
        let mut rng2 = ChaCha8Rng::seed_from_u64(5);
        let (alt_alpha, _) = sgd_potentials(&cost, 1.0, 2, 200, 0.5, true, &mut rng1);
        let (joint_alpha, _) = sgd_potentials(&cost, 1.0, 2, 200, 0.5, false, &mut rng2);
        assert_ne!(alt_alpha, joint_alpha);
    }

    #[test]
    fn solve_rejects_bad_batch_size() {
        let a = array![0.5, 0.5];
        let b = Array1::from_elem(4, 0.25);
        let cost = line_cost(2, 4);

        let too_big = DualSgdConfig::new(3);
        assert!(matches!(
            solve_dual_entropic(&a, &b, &cost, 1.0, &too_big),
            Err(Error::InvalidBatchSize(3, 2))
        ));

        let zero = DualSgdConfig::new(0);
        assert!(matches!(
            solve_dual_entropic(&a, &b, &cost, 1.0, &zero),
            Err(Error::InvalidBatchSize(0, 2))
        ));
    }

    #[test]
    fn solve_returns_log_only_when_requested() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let cost = line_cost(2, 2);

        let mut cfg = DualSgdConfig::new(1);
        cfg.iterations = 100;
        let (_, log) = solve_dual_entropic(&a, &b, &cost, 1.0, &cfg).unwrap();
        assert!(log.is_none());

        cfg.log = true;
        let (_, log) = solve_dual_entropic(&a, &b, &cost, 1.0, &cfg).unwrap();
        let log = log.unwrap();
        assert_eq!(log.alpha.len(), 2);
        assert_eq!(log.beta.len(), 2);
    }
}
