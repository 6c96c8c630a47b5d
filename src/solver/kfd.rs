//! Kernel Fisher Discriminant
//!
//! Projects samples on α ∈ ℝⁿ maximizing the ratio of between-class to
//! within-class scatter in feature space:
//!
//! N = Σ_c K_c (I − 1/n_c) K_cᵀ,   α = (N + μI)⁻¹ (m₊ − m₋)
//!
//! where K_c holds the kernel columns of class c and m_c their row means.
//! A test sample is assigned to the second class when its projection
//! is at least the midpoint of the two projected class means.

use crate::core::{KernelBlock, KernelClassifier, KernelMatrix, RankCvError, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Regularized Kernel Fisher Discriminant
#[derive(Debug, Clone, Copy)]
pub struct KernelFisher {
    regularization: f64,
}

impl Default for KernelFisher {
    fn default() -> Self {
        Self {
            regularization: 1e-3,
        }
    }
}

/// Trained discriminant: projection weights and decision threshold
#[derive(Debug, Clone)]
pub struct FisherModel {
    pub weights: Vec<f64>,
    pub threshold: f64,
}

impl FisherModel {
    /// Projection of one test row (kernel values against the training samples)
    pub fn project(&self, row: &[f64]) -> f64 {
        self.weights.iter().zip(row).map(|(w, k)| w * k).sum()
    }
}

impl KernelFisher {
    /// `regularization` is the ridge added to N relative to its mean diagonal
    pub fn new(regularization: f64) -> Result<Self> {
        if !(regularization.is_finite() && regularization > 0.0) {
            return Err(RankCvError::config(format!(
                "KFD regularization must be positive, got {regularization}"
            )));
        }
        Ok(Self { regularization })
    }

    pub fn regularization(&self) -> f64 {
        self.regularization
    }

    /// Fit on a training kernel with ±1 labels
    pub fn fit(&self, k: &KernelMatrix, labels: &[f64]) -> Result<FisherModel> {
        let n = labels.len();
        if k.size() != n {
            return Err(RankCvError::DimensionMismatch {
                expected: n,
                actual: k.size(),
            });
        }
        let positive: Vec<usize> = (0..n).filter(|&i| labels[i] > 0.0).collect();
        let negative: Vec<usize> = (0..n).filter(|&i| labels[i] <= 0.0).collect();
        if positive.is_empty() || negative.is_empty() {
            return Err(RankCvError::InvalidLabels(
                "KFD needs samples of both classes".to_string(),
            ));
        }

        let full = DMatrix::from_row_slice(n, n, k.values());
        let mut scatter = DMatrix::<f64>::zeros(n, n);
        let mut means = Vec::with_capacity(2);
        for class in [&negative, &positive] {
            let kc = full.select_columns(class.iter());
            let mean = kc.column_mean();
            scatter += &kc * kc.transpose() - (&mean * mean.transpose()) * class.len() as f64;
            means.push(mean);
        }

        let trace = scatter.trace();
        let ridge = if trace > 0.0 {
            self.regularization * trace / n as f64
        } else {
            self.regularization
        };
        for i in 0..n {
            scatter[(i, i)] += ridge;
        }

        let difference = &means[1] - &means[0];
        let alpha = solve(scatter, &difference)?;
        let projected_neg = alpha.dot(&means[0]);
        let projected_pos = alpha.dot(&means[1]);
        debug!(
            "KFD projected class means {:.4} / {:.4}",
            projected_neg, projected_pos
        );

        Ok(FisherModel {
            weights: alpha.iter().copied().collect(),
            threshold: (projected_neg + projected_pos) / 2.0,
        })
    }
}

/// Solve `a x = b`, Cholesky first and LU when `a` is not positive definite
fn solve(a: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        return Ok(chol.solve(b));
    }
    a.lu()
        .solve(b)
        .ok_or_else(|| RankCvError::Optimization("KFD scatter matrix is singular".to_string()))
}

impl KernelClassifier for KernelFisher {
    fn train_predict(
        &self,
        train: &KernelMatrix,
        labels: &[f64],
        test_rows: &KernelBlock,
        _c: f64,
    ) -> Result<Vec<f64>> {
        if test_rows.cols() != labels.len() {
            return Err(RankCvError::DimensionMismatch {
                expected: labels.len(),
                actual: test_rows.cols(),
            });
        }
        if let Some(&first) = labels.first() {
            if labels.iter().all(|&l| l == first) {
                return Ok(vec![first; test_rows.rows()]);
            }
        }

        let model = self.fit(train, labels)?;
        Ok((0..test_rows.rows())
            .map(|r| {
                if model.project(test_rows.row(r)) >= model.threshold {
                    1.0
                } else {
                    -1.0
                }
            })
            .collect())
    }
}
