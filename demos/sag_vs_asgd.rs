//! Compare the three stochastic solvers on a small point-cloud instance.
//!
//! Builds a squared-Euclidean cost between two 2D point sets, runs SAG,
//! ASGD and the batched dual SGD solver, and prints each plan together with
//! its marginal error.
//!
//! Run with: `cargo run --example sag_vs_asgd`

use ndarray::{Array1, Array2};
use stochot::{solve_dual_entropic, solve_semidual_entropic, DualSgdConfig, SemidualConfig};

fn marginal_error(plan: &Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let mut err = 0.0f64;
    for i in 0..a.len() {
        err = err.max((plan.row(i).sum() - a[i]).abs());
    }
    for j in 0..b.len() {
        err = err.max((plan.column(j).sum() - b[j]).abs());
    }
    err
}

fn report(name: &str, plan: &Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) {
    println!("== {} ==", name);
    for i in 0..plan.nrows() {
        let row: Vec<String> = (0..plan.ncols())
            .map(|j| format!("{:.4}", plan[[i, j]]))
            .collect();
        println!("  [{}]", row.join(", "));
    }
    println!("  max marginal error: {:.4}\n", marginal_error(plan, a, b));
}

fn main() {
    let xs = [[0.0, 0.0], [1.0, 0.2], [2.0, -0.1], [3.0, 0.3]];
    let ys = [[0.4, 0.1], [1.5, 0.0], [2.6, 0.2], [3.4, -0.2]];
    let n = xs.len();

    let cost = Array2::from_shape_fn((n, n), |(i, j)| {
        let dx = xs[i][0] - ys[j][0];
        let dy = xs[i][1] - ys[j][1];
        dx * dx + dy * dy
    });
    let a = Array1::from_elem(n, 1.0 / n as f64);
    let b = Array1::from_elem(n, 1.0 / n as f64);
    let reg = 0.5;

    let semidual_cfg = SemidualConfig {
        iterations: 30_000,
        ..Default::default()
    };
    for method in ["sag", "asgd"] {
        let (plan, _) = solve_semidual_entropic(&a, &b, &cost, reg, method, &semidual_cfg)
            .expect("semi-dual solve");
        report(method, &plan, &a, &b);
    }

    let dual_cfg = DualSgdConfig {
        iterations: 30_000,
        lr: 0.1,
        ..DualSgdConfig::new(2)
    };
    let (plan, _) = solve_dual_entropic(&a, &b, &cost, reg, &dual_cfg).expect("dual solve");
    report("dual sgd (batch 2)", &plan, &a, &b);
}
