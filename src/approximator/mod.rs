//! Monte-Carlo approximation of the stabilized Kendall kernel
//!
//! The stabilized kernel is the expected Kendall kernel of the data after
//! adding independent U[−a, a] noise to every entry. [`KernelApproximator`]
//! estimates it by averaging the Kendall kernels of D noisy copies, and
//! also computes the exact expectation for comparison.
//!
//! Draw `i` always uses the noise generated from `derive_seed(seed, [i])`,
//! so a D-draw estimate does not depend on how the draws were grouped or
//! scheduled. [`RunningMean`] folds draws in one at a time:
//!
//! mean_{D+1} = mean_D · D/(D+1) + draw · 1/(D+1)

use crate::core::{FeatureMatrix, KernelMatrix, RankCvError, Result};
use crate::kernel::{gram, KendallKernel, StabilizedKendallKernel};
use crate::utils::seed::derive_seed;
use log::debug;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Streaming arithmetic mean of kernel matrices
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: Option<KernelMatrix>,
    draws: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of matrices averaged so far
    pub fn draws(&self) -> usize {
        self.draws
    }

    /// Current average, `None` before the first update
    pub fn mean(&self) -> Option<&KernelMatrix> {
        self.mean.as_ref()
    }

    pub fn into_mean(self) -> Option<KernelMatrix> {
        self.mean
    }

    /// Fold one draw into the average and return the new average
    ///
    /// The previous average is replaced by a freshly built matrix.
    pub fn update(&mut self, draw: &KernelMatrix) -> Result<&KernelMatrix> {
        let other = RunningMean {
            mean: Some(draw.clone()),
            draws: 1,
        };
        self.merge(&other)?;
        self.mean
            .as_ref()
            .ok_or_else(|| RankCvError::Optimization("running mean is empty".to_string()))
    }

    /// Combine with another running mean as if all draws were folded here
    pub fn merge(&mut self, other: &RunningMean) -> Result<()> {
        let incoming = match &other.mean {
            Some(m) => m,
            None => return Ok(()),
        };
        let current = match self.mean.take() {
            Some(m) => m,
            None => {
                self.mean = Some(incoming.clone());
                self.draws = other.draws;
                return Ok(());
            }
        };
        if current.size() != incoming.size() {
            let expected = current.size();
            self.mean = Some(current);
            return Err(RankCvError::DimensionMismatch {
                expected,
                actual: incoming.size(),
            });
        }

        let total = (self.draws + other.draws) as f64;
        let w_old = self.draws as f64 / total;
        let w_new = other.draws as f64 / total;
        // Entries equal on both sides (the fixed diagonal) are kept exactly.
        let values = current
            .values()
            .iter()
            .zip(incoming.values())
            .map(|(&o, &n)| if o == n { o } else { o * w_old + n * w_new })
            .collect();

        let mut next = KernelMatrix::from_values(current.size(), values)?;
        for w in current.warnings().iter().chain(incoming.warnings()) {
            next.push_warning(w.clone());
        }
        self.mean = Some(next);
        self.draws += other.draws;
        Ok(())
    }
}

/// Estimator of the noise-stabilized Kendall kernel
#[derive(Debug, Clone, Copy)]
pub struct KernelApproximator {
    window: f64,
    seed: u64,
}

impl KernelApproximator {
    /// Create an approximator for noise half-width `window`
    pub fn new(window: f64, seed: u64) -> Result<Self> {
        if !window.is_finite() || window < 0.0 {
            return Err(RankCvError::config(format!(
                "noise window must be a non-negative number, got {window}"
            )));
        }
        Ok(Self { window, seed })
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Exact expected kernel at this window
    pub fn exact(&self, matrix: &FeatureMatrix) -> KernelMatrix {
        gram(&StabilizedKendallKernel::new(self.window), matrix)
    }

    /// Noise matrix of draw `index`, same shape as the data
    pub fn noise(&self, n_samples: usize, n_features: usize, index: usize) -> Vec<f64> {
        let len = n_samples * n_features;
        if self.window == 0.0 {
            return vec![0.0; len];
        }
        let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[index as u64]));
        let uniform = Uniform::new_inclusive(-self.window, self.window);
        (0..len).map(|_| uniform.sample(&mut rng)).collect()
    }

    /// Kendall kernel of the `index`-th noisy copy of the data
    pub fn draw(&self, matrix: &FeatureMatrix, index: usize) -> Result<KernelMatrix> {
        let noise = self.noise(matrix.n_samples(), matrix.n_features(), index);
        let noisy = matrix.perturbed(&noise)?;
        Ok(gram(&KendallKernel::new(), &noisy))
    }

    /// Add the next draw to `running` and return the updated average
    pub fn extend<'a>(
        &self,
        running: &'a mut RunningMean,
        matrix: &FeatureMatrix,
    ) -> Result<&'a KernelMatrix> {
        let draw = self.draw(matrix, running.draws())?;
        running.update(&draw)
    }

    /// Add draws to `running` until it averages `draws` matrices
    pub fn extend_to(
        &self,
        running: &mut RunningMean,
        matrix: &FeatureMatrix,
        draws: usize,
    ) -> Result<()> {
        while running.draws() < draws {
            self.extend(running, matrix)?;
        }
        Ok(())
    }

    /// Average of the first `draws` noisy kernels
    pub fn monte_carlo(&self, matrix: &FeatureMatrix, draws: usize) -> Result<KernelMatrix> {
        if draws == 0 {
            return Err(RankCvError::config("Monte-Carlo draw count must be at least 1"));
        }
        let mut running = RunningMean::new();
        self.extend_to(&mut running, matrix, draws)?;
        debug!(
            "Monte-Carlo kernel: {} draws at window {}",
            draws, self.window
        );
        running
            .into_mean()
            .ok_or_else(|| RankCvError::Optimization("no draws were averaged".to_string()))
    }

    /// Estimates after each requested draw count, ascending
    ///
    /// Earlier draws are reused: reaching D draws after D' < D costs D − D'
    /// kernel computations.
    pub fn draw_count_sweep(
        &self,
        matrix: &FeatureMatrix,
        counts: &[usize],
    ) -> Result<Vec<(usize, KernelMatrix)>> {
        let mut sorted = counts.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.first() == Some(&0) {
            return Err(RankCvError::config("Monte-Carlo draw count must be at least 1"));
        }

        let mut running = RunningMean::new();
        let mut curve = Vec::with_capacity(sorted.len());
        for count in sorted {
            self.extend_to(&mut running, matrix, count)?;
            if let Some(mean) = running.mean() {
                curve.push((count, mean.clone()));
            }
        }
        Ok(curve)
    }

    /// One kernel per window, at a fixed draw count (`None` = exact)
    pub fn window_sweep(
        matrix: &FeatureMatrix,
        windows: &[f64],
        draws: Option<usize>,
        seed: u64,
    ) -> Result<Vec<(f64, KernelMatrix)>> {
        windows
            .iter()
            .map(|&window| {
                let approximator = KernelApproximator::new(window, seed)?;
                let kernel = match draws {
                    Some(d) => approximator.monte_carlo(matrix, d)?,
                    None => approximator.exact(matrix),
                };
                Ok((window, kernel))
            })
            .collect()
    }
}
