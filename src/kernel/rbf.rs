//! Gaussian RBF kernel implementation
//!
//! The Gaussian kernel is defined as: K(x, y) = exp(-||x - y||² / (2σ²))
//! where σ is the bandwidth. When no bandwidth is given it is estimated
//! with the median heuristic: σ = median Euclidean distance between
//! distinct training samples.

use crate::core::{FeatureMatrix, KernelMatrix};
use crate::kernel::linear::squared_distance;
use crate::kernel::Kernel;
use crate::utils::stats::median;

/// Gaussian kernel with a fixed bandwidth
#[derive(Debug, Clone, Copy)]
pub struct GaussianKernel {
    sigma: f64,
}

impl GaussianKernel {
    /// Create a Gaussian kernel with bandwidth `sigma`
    ///
    /// # Panics
    /// Panics if sigma is not positive
    pub fn new(sigma: f64) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive, got: {}", sigma);
        Self { sigma }
    }

    /// Bandwidth from the median heuristic on the given training rows
    ///
    /// Returns `None` when fewer than two rows are given or the median
    /// distance is zero, e.g. when the training rows are identical.
    pub fn from_training(matrix: &FeatureMatrix, training: &[usize]) -> Option<Self> {
        let mut distances = Vec::new();
        for (pos, &a) in training.iter().enumerate() {
            for &b in &training[pos + 1..] {
                distances.push(squared_distance(matrix.row(a), matrix.row(b)).sqrt());
            }
        }
        median(&distances).filter(|&s| s > 0.0).map(Self::new)
    }

    /// Get the sigma parameter
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Kernel value for a precomputed squared distance
    pub fn from_squared_distance(&self, distance_sq: f64) -> f64 {
        (-distance_sq / (2.0 * self.sigma * self.sigma)).exp()
    }
}

impl Kernel for GaussianKernel {
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        self.from_squared_distance(squared_distance(x, y))
    }
}

/// Median heuristic bandwidth from a matrix of squared distances
///
/// Only entries between distinct `training` rows are used.
pub fn median_bandwidth(distances_sq: &KernelMatrix, training: &[usize]) -> Option<f64> {
    let mut distances = Vec::new();
    for (pos, &a) in training.iter().enumerate() {
        for &b in &training[pos + 1..] {
            distances.push(distances_sq.get(a, b).max(0.0).sqrt());
        }
    }
    median(&distances).filter(|&s| s > 0.0)
}
