//! Sequential Minimal Optimization (SMO) solver on a precomputed kernel
//!
//! Solves the C-SVM dual
//!
//! min ½ αᵀQα − eᵀα  s.t.  yᵀα = 0, 0 ≤ αᵢ ≤ C,  Q_ij = yᵢ y_j K_ij
//!
//! by repeatedly optimizing the maximal violating pair (i, j):
//! i maximizes −yₜ∇f(α)ₜ over the variables that can move up and j
//! minimizes it over the variables that can move down. The loop stops when
//! the gap between the two falls below `epsilon`.

use crate::core::{
    KernelBlock, KernelClassifier, KernelMatrix, OptimizationResult, RankCvError, Result,
    SolverConfig,
};
use log::{trace, warn};

/// Curvature used when a pair has a non-positive second derivative
const TAU: f64 = 1e-12;

/// SMO solver for SVM optimization
pub struct SmoSolver {
    config: SolverConfig,
}

impl SmoSolver {
    /// Create a new SMO solver with the given configuration
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve the dual problem for kernel `k`, labels `y` (±1) and bound `c`
    pub fn solve(&self, k: &KernelMatrix, y: &[f64], c: f64) -> Result<OptimizationResult> {
        let n = y.len();
        if n == 0 {
            return Err(RankCvError::EmptyDataset);
        }
        if k.size() != n {
            return Err(RankCvError::DimensionMismatch {
                expected: n,
                actual: k.size(),
            });
        }
        if let Some(&bad) = y.iter().find(|&&v| v != 1.0 && v != -1.0) {
            return Err(RankCvError::InvalidLabels(format!(
                "SVM labels must be -1 or +1, got {bad}"
            )));
        }
        if !(c.is_finite() && c > 0.0) {
            return Err(RankCvError::config(format!("C must be positive, got {c}")));
        }

        let mut alpha = vec![0.0; n];
        // Gradient of the dual objective: G = Qα − e
        let mut gradient = vec![-1.0; n];

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iterations {
            let (i, j) = match self.select_working_set(&alpha, &gradient, y, c) {
                Some(pair) => pair,
                None => {
                    converged = true;
                    break;
                }
            };
            self.take_step(i, j, k, y, c, &mut alpha, &mut gradient);
            iterations += 1;
        }
        if !converged {
            warn!(
                "SMO stopped after {} iterations without reaching tolerance {}",
                iterations, self.config.epsilon
            );
        }
        trace!("SMO finished in {iterations} iterations");

        let rho = self.calculate_rho(&alpha, &gradient, y, c);
        let support_vectors: Vec<usize> = alpha
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| (a > 0.0).then_some(i))
            .collect();

        Ok(OptimizationResult {
            objective_value: self.calculate_objective(&alpha, &gradient),
            alpha,
            b: -rho,
            support_vectors,
            iterations,
            converged,
        })
    }

    fn can_move_up(alpha: f64, y: f64, c: f64) -> bool {
        (y > 0.0 && alpha < c) || (y < 0.0 && alpha > 0.0)
    }

    fn can_move_down(alpha: f64, y: f64, c: f64) -> bool {
        (y > 0.0 && alpha > 0.0) || (y < 0.0 && alpha < c)
    }

    /// Maximal violating pair, `None` once the KKT gap is within tolerance
    fn select_working_set(
        &self,
        alpha: &[f64],
        gradient: &[f64],
        y: &[f64],
        c: f64,
    ) -> Option<(usize, usize)> {
        let mut best_up: Option<(usize, f64)> = None;
        let mut best_down: Option<(usize, f64)> = None;

        for t in 0..alpha.len() {
            let value = -y[t] * gradient[t];
            if Self::can_move_up(alpha[t], y[t], c) && best_up.map_or(true, |(_, v)| value > v) {
                best_up = Some((t, value));
            }
            if Self::can_move_down(alpha[t], y[t], c)
                && best_down.map_or(true, |(_, v)| value < v)
            {
                best_down = Some((t, value));
            }
        }

        let ((i, m_up), (j, m_down)) = (best_up?, best_down?);
        if m_up - m_down < self.config.epsilon {
            None
        } else {
            Some((i, j))
        }
    }

    /// Move αᵢ by yᵢ·t and α_j by −y_j·t along the feasible direction
    #[allow(clippy::too_many_arguments)]
    fn take_step(
        &self,
        i: usize,
        j: usize,
        k: &KernelMatrix,
        y: &[f64],
        c: f64,
        alpha: &mut [f64],
        gradient: &mut [f64],
    ) {
        let curvature = k.get(i, i) + k.get(j, j) - 2.0 * k.get(i, j);
        let curvature = if curvature > 0.0 { curvature } else { TAU };
        let descent = -y[i] * gradient[i] + y[j] * gradient[j];

        let bound_i = if y[i] > 0.0 { c - alpha[i] } else { alpha[i] };
        let bound_j = if y[j] > 0.0 { alpha[j] } else { c - alpha[j] };
        let step = descent / curvature;
        let t = step.min(bound_i).min(bound_j);

        let new_i = if t == bound_i {
            if y[i] > 0.0 {
                c
            } else {
                0.0
            }
        } else {
            (alpha[i] + y[i] * t).clamp(0.0, c)
        };
        let new_j = if t == bound_j {
            if y[j] > 0.0 {
                0.0
            } else {
                c
            }
        } else {
            (alpha[j] - y[j] * t).clamp(0.0, c)
        };
        let delta_i = new_i - alpha[i];
        let delta_j = new_j - alpha[j];
        alpha[i] = new_i;
        alpha[j] = new_j;

        // G_k += Q_ki Δαᵢ + Q_kj Δα_j
        let row_i = k.row(i);
        let row_j = k.row(j);
        for (t, g) in gradient.iter_mut().enumerate() {
            *g += y[t] * (y[i] * row_i[t] * delta_i + y[j] * row_j[t] * delta_j);
        }
    }

    /// Threshold ρ from free support vectors, or the middle of the feasible range
    fn calculate_rho(&self, alpha: &[f64], gradient: &[f64], y: &[f64], c: f64) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut free_count = 0usize;

        for t in 0..alpha.len() {
            let yg = y[t] * gradient[t];
            let at_upper = alpha[t] >= c;
            let at_lower = alpha[t] <= 0.0;
            if at_upper {
                if y[t] < 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else if at_lower {
                if y[t] > 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                free_sum += yg;
                free_count += 1;
            }
        }

        if free_count > 0 {
            free_sum / free_count as f64
        } else if upper.is_finite() && lower.is_finite() {
            (upper + lower) / 2.0
        } else if upper.is_finite() {
            upper
        } else if lower.is_finite() {
            lower
        } else {
            0.0
        }
    }

    /// Dual objective eᵀα − ½ αᵀQα
    fn calculate_objective(&self, alpha: &[f64], gradient: &[f64]) -> f64 {
        alpha
            .iter()
            .zip(gradient)
            .map(|(a, g)| a * (1.0 - g))
            .sum::<f64>()
            / 2.0
    }
}

/// Decision values Σ αᵢ yᵢ K(x, xᵢ) + b for the rows of a test block
pub fn decision_values(result: &OptimizationResult, y: &[f64], test_rows: &KernelBlock) -> Vec<f64> {
    (0..test_rows.rows())
        .map(|r| {
            let row = test_rows.row(r);
            result
                .support_vectors
                .iter()
                .map(|&s| result.alpha[s] * y[s] * row[s])
                .sum::<f64>()
                + result.b
        })
        .collect()
}

/// Kernel SVM classifier backed by [`SmoSolver`]
#[derive(Debug, Clone, Default)]
pub struct SmoClassifier {
    config: SolverConfig,
}

impl SmoClassifier {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }
}

impl KernelClassifier for SmoClassifier {
    fn train_predict(
        &self,
        train: &KernelMatrix,
        labels: &[f64],
        test_rows: &KernelBlock,
        c: f64,
    ) -> Result<Vec<f64>> {
        if test_rows.cols() != labels.len() {
            return Err(RankCvError::DimensionMismatch {
                expected: labels.len(),
                actual: test_rows.cols(),
            });
        }
        // A single-class training set predicts that class
        if let Some(&first) = labels.first() {
            if labels.iter().all(|&l| l == first) {
                return Ok(vec![first; test_rows.rows()]);
            }
        }

        let result = SmoSolver::new(self.config.clone()).solve(train, labels, c)?;
        Ok(decision_values(&result, labels, test_rows)
            .into_iter()
            .map(|d| if d >= 0.0 { 1.0 } else { -1.0 })
            .collect())
    }
}
