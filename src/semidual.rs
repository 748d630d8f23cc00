//! Semi-dual stochastic solvers for entropic optimal transport.
//!
//! The semi-dual problem eliminates the source-side potential analytically
//! (via the c-transform), leaving a single target-side vector `beta` to
//! optimize:
//!
//! ```text
//! max_beta Σᵢ aᵢ (Σⱼ betaⱼ bⱼ - reg · log Σⱼ exp((betaⱼ - C_ij)/reg) bⱼ)
//! ```
//!
//! Two fixed-iteration stochastic ascent methods are implemented, both
//! sampling one source row per iteration:
//!
//! - **SAG** keeps a table of the most recent per-row gradient and steps
//!   along the table average (variance reduced, `ns × nt` memory).
//! - **ASGD** is plain stochastic ascent with a `1/√k` step-size decay and a
//!   Polyak-Ruppert iterate average as the returned estimator.
//!
//! # References
//!
//! - Genevay, Cuturi, Peyré, Bach (2016). "Stochastic Optimization for
//!   Large-scale Optimal Transport" (NeurIPS) -- algorithms 1 & 2 and
//!   Proposition 2.1 (c-transform recovery)

use crate::{check_transport_inputs, gibbs_plan, Error, Potentials, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::str::FromStr;
use tracing::debug;

/// Configuration for the semi-dual solvers.
#[derive(Debug, Clone)]
pub struct SemidualConfig {
    /// Number of stochastic ascent steps. The loop always runs to this
    /// count; there is no convergence test.
    pub iterations: usize,
    /// Learning rate. `None` uses the `1/max(a/reg)` heuristic, which
    /// requires strictly positive source weights.
    pub lr: Option<f64>,
    /// RNG seed (deterministic by default).
    pub seed: u64,
    /// Return the final dual potentials alongside the plan.
    pub log: bool,
}

impl Default for SemidualConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            lr: None,
            seed: 42,
            log: false,
        }
    }
}

/// Semi-dual solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Stochastic Average Gradient (gradient-table variance reduction).
    Sag,
    /// Averaged stochastic gradient ascent (Polyak-Ruppert).
    Asgd,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sag" => Ok(Method::Sag),
            "asgd" => Ok(Method::Asgd),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

/// Gradient of the semi-dual objective along source row `i`.
///
/// Computes the Gibbs weights `exp((beta_j - C_ij)/reg) · b_j`, normalizes
/// them to a probability vector `khi`, and returns `b - khi`.
///
/// No log-sum-exp shift is applied here, unlike [`c_transform`]: callers
/// must pick `reg` large enough for the cost scale, or the exponential
/// under/overflows.
pub fn coordinate_gradient(
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    beta: &Array1<f64>,
    i: usize,
) -> Array1<f64> {
    let nt = b.len();
    debug_assert_eq!(beta.len(), nt);
    debug_assert!(i < cost.nrows());

    let mut khi = Array1::zeros(nt);
    let mut total = 0.0;
    for j in 0..nt {
        let r = cost[[i, j]] - beta[j];
        let w = (-r / reg).exp() * b[j];
        khi[j] = w;
        total += w;
    }

    let mut grad = Array1::zeros(nt);
    for j in 0..nt {
        grad[j] = b[j] - khi[j] / total;
    }
    grad
}

/// Recover the source-side potential `alpha` from an optimized `beta`.
///
/// Per source row: `alpha_i = min_r - reg · log Σⱼ exp(-(r_j - min_r)/reg) bⱼ`
/// with `r = C[i,:] - beta`. The `min_r` shift keeps the exponentials in
/// range for small `reg` or large cost magnitudes.
pub fn c_transform(
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    beta: &Array1<f64>,
) -> Array1<f64> {
    let ns = cost.nrows();
    let nt = cost.ncols();
    debug_assert_eq!(b.len(), nt);
    debug_assert_eq!(beta.len(), nt);

    let mut alpha = Array1::zeros(ns);
    for i in 0..ns {
        let mut min_r = f64::INFINITY;
        for j in 0..nt {
            min_r = min_r.min(cost[[i, j]] - beta[j]);
        }

        let mut sum_exp = 0.0;
        for j in 0..nt {
            let r = cost[[i, j]] - beta[j];
            sum_exp += (-(r - min_r) / reg).exp() * b[j];
        }
        alpha[i] = min_r - reg * sum_exp.ln();
    }
    alpha
}

/// SAG gradient storage: the most recent gradient per source row, plus a
/// running column sum.
///
/// Invariant: `sum` always equals the row-wise sum of `stored`; every update
/// applies the same delta to both.
#[derive(Debug, Clone)]
struct GradientTable {
    stored: Array2<f64>,
    sum: Array1<f64>,
}

impl GradientTable {
    fn new(ns: usize, nt: usize) -> Self {
        Self {
            stored: Array2::zeros((ns, nt)),
            sum: Array1::zeros(nt),
        }
    }

    /// Replace the stored gradient for row `i`, keeping `sum` in step.
    fn update(&mut self, i: usize, grad: &Array1<f64>) {
        for j in 0..self.sum.len() {
            self.sum[j] += grad[j] - self.stored[[i, j]];
            self.stored[[i, j]] = grad[j];
        }
    }

    fn sum(&self) -> &Array1<f64> {
        &self.sum
    }

    #[cfg(test)]
    fn recomputed_sum(&self) -> Array1<f64> {
        self.stored.sum_axis(ndarray::Axis(0))
    }
}

fn resolve_lr(lr: Option<f64>, a: &Array1<f64>, reg: f64) -> Result<f64> {
    if let Some(v) = lr {
        if !v.is_finite() || v <= 0.0 {
            return Err(Error::Domain("learning rate must be positive and finite"));
        }
        return Ok(v);
    }
    // Heuristic from Genevay et al.: lr = 1 / max(a / reg).
    let mut max_ratio = 0.0f64;
    for &ai in a {
        if ai <= 0.0 {
            return Err(Error::Domain(
                "default learning rate requires strictly positive source weights; pass an explicit lr",
            ));
        }
        max_ratio = max_ratio.max(ai / reg);
    }
    Ok(1.0 / max_ratio)
}

/// Run the SAG algorithm and return the final target-side potential `beta`.
///
/// Each iteration samples one source row `i`, stores `a_i · grad_i` in the
/// gradient table, and steps `beta` along `lr/ns` times the table sum. The
/// table averages over *all* previously seen row gradients, not just the
/// current sample, trading `ns × nt` memory for variance reduction.
pub fn sag_potentials<R: Rng>(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    iterations: usize,
    lr: Option<f64>,
    rng: &mut R,
) -> Result<Array1<f64>> {
    let ns = cost.nrows();
    let nt = cost.ncols();
    let lr = resolve_lr(lr, a, reg)?;

    let mut beta = Array1::zeros(nt);
    let mut table = GradientTable::new(ns, nt);
    let scale = lr / ns as f64;

    for _ in 0..iterations {
        let i = rng.gen_range(0..ns);
        let mut grad = coordinate_gradient(b, cost, reg, &beta, i);
        grad *= a[i];
        table.update(i, &grad);
        for j in 0..nt {
            beta[j] += scale * table.sum()[j];
        }
    }
    Ok(beta)
}

/// Run averaged SGD and return the iterate-averaged potential `beta`.
///
/// Each iteration `k` (1-indexed) samples one source row, steps the current
/// iterate by `lr/√k` along the (unweighted) coordinate gradient, and folds
/// it into the running average `ave = cur/k + (1 - 1/k)·ave`. The average,
/// not the last iterate, is returned.
pub fn averaged_sgd_potentials<R: Rng>(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    iterations: usize,
    lr: Option<f64>,
    rng: &mut R,
) -> Result<Array1<f64>> {
    let ns = cost.nrows();
    let nt = cost.ncols();
    let lr = resolve_lr(lr, a, reg)?;

    let mut cur_beta = Array1::zeros(nt);
    let mut ave_beta = Array1::zeros(nt);

    for iter in 0..iterations {
        let k = (iter + 1) as f64;
        let i = rng.gen_range(0..ns);
        let grad = coordinate_gradient(b, cost, reg, &cur_beta, i);
        let step = lr / k.sqrt();
        for j in 0..nt {
            cur_beta[j] += step * grad[j];
            ave_beta[j] = cur_beta[j] / k + (1.0 - 1.0 / k) * ave_beta[j];
        }
    }
    Ok(ave_beta)
}

/// Solve entropic OT through the semi-dual formulation.
///
/// Dispatches on `method` (`"sag"` or `"asgd"`, case-insensitive), recovers
/// `alpha` via [`c_transform`], and reconstructs the plan with the Gibbs
/// kernel. An unrecognized method name is [`Error::InvalidMethod`].
///
/// Returns `(plan, potentials)`; `potentials` is `Some` iff `cfg.log` is set.
/// Row/column sums of the plan approach `a`/`b` only as `cfg.iterations`
/// grows; no feasibility is guaranteed at any finite count.
pub fn solve_semidual_entropic(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
    method: &str,
    cfg: &SemidualConfig,
) -> Result<(Array2<f64>, Option<Potentials>)> {
    let method = method.parse::<Method>()?;
    check_transport_inputs(a, b, cost, reg)?;

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let beta = match method {
        Method::Sag => sag_potentials(a, b, cost, reg, cfg.iterations, cfg.lr, &mut rng)?,
        Method::Asgd => averaged_sgd_potentials(a, b, cost, reg, cfg.iterations, cfg.lr, &mut rng)?,
    };
    let alpha = c_transform(b, cost, reg, &beta);
    debug!(
        ?method,
        iterations = cfg.iterations,
        seed = cfg.seed,
        "semi-dual solve finished"
    );

    let plan = gibbs_plan(&alpha, &beta, cost, reg, a, b);
    let log = cfg.log.then(|| Potentials { alpha, beta });
    Ok((plan, log))
}
