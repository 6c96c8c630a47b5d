//! Evaluation configuration
//!
//! ```rust
//! use rankcv::config::EvaluationConfig;
//!
//! let config = EvaluationConfig::default()
//!     .with_seed(7)
//!     .with_outer_repeats(2)
//!     .with_k_grid(vec![2, 4, 8]);
//! assert!(config.validate().is_ok());
//! ```

use crate::core::{RankCvError, Result, SolverConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Options recognized by the evaluation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Regularization values C, in tie-break order
    pub c_grid: Vec<f64>,
    /// Top-k pair counts, in tie-break order
    pub k_grid: Vec<usize>,
    pub inner_folds: usize,
    pub outer_folds: usize,
    pub outer_repeats: usize,
    pub seed: u64,
    /// Noise half-widths a of the stabilized Kendall kernel
    pub noise_window_grid: Vec<f64>,
    /// Monte-Carlo draw counts D
    pub mc_draw_counts: Vec<usize>,
    /// Worker pool size, `None` for one worker per core
    pub workers: Option<usize>,
    pub solver: SolverConfig,
    /// Ridge of the Kernel Fisher Discriminant, relative to the scatter trace
    pub kfd_regularization: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            c_grid: vec![1e-2, 1e-1, 1.0, 10.0, 100.0],
            k_grid: vec![1, 3, 5, 7, 9, 11, 13, 15],
            inner_folds: 5,
            outer_folds: 5,
            outer_repeats: 10,
            seed: 0,
            noise_window_grid: vec![0.1, 0.5, 1.0],
            mc_draw_counts: vec![1, 5, 10, 20, 50],
            workers: None,
            solver: SolverConfig::default(),
            kfd_regularization: 1e-3,
        }
    }
}

impl EvaluationConfig {
    /// Load from a JSON file; missing fields take their default values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_c_grid(mut self, c_grid: Vec<f64>) -> Self {
        self.c_grid = c_grid;
        self
    }

    pub fn with_k_grid(mut self, k_grid: Vec<usize>) -> Self {
        self.k_grid = k_grid;
        self
    }

    pub fn with_folds(mut self, inner: usize, outer: usize) -> Self {
        self.inner_folds = inner;
        self.outer_folds = outer;
        self
    }

    pub fn with_outer_repeats(mut self, repeats: usize) -> Self {
        self.outer_repeats = repeats;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Check every option against its allowed range
    pub fn validate(&self) -> Result<()> {
        validate_c_grid(&self.c_grid)?;
        validate_k_grid(&self.k_grid)?;
        if self.inner_folds < 2 {
            return Err(RankCvError::config(format!(
                "inner_folds must be at least 2, got {}",
                self.inner_folds
            )));
        }
        if self.outer_folds < 2 {
            return Err(RankCvError::config(format!(
                "outer_folds must be at least 2, got {}",
                self.outer_folds
            )));
        }
        if self.outer_repeats == 0 {
            return Err(RankCvError::config("outer_repeats must be at least 1"));
        }
        if let Some(&bad) = self
            .noise_window_grid
            .iter()
            .find(|w| !(w.is_finite() && **w >= 0.0))
        {
            return Err(RankCvError::config(format!(
                "noise windows must be non-negative, got {bad}"
            )));
        }
        if self.mc_draw_counts.contains(&0) {
            return Err(RankCvError::config("Monte-Carlo draw counts must be at least 1"));
        }
        if self.workers == Some(0) {
            return Err(RankCvError::config("workers must be at least 1"));
        }
        if !(self.solver.epsilon.is_finite() && self.solver.epsilon > 0.0) {
            return Err(RankCvError::config(format!(
                "solver epsilon must be positive, got {}",
                self.solver.epsilon
            )));
        }
        if self.solver.max_iterations == 0 {
            return Err(RankCvError::config("solver max_iterations must be at least 1"));
        }
        if !(self.kfd_regularization.is_finite() && self.kfd_regularization > 0.0) {
            return Err(RankCvError::config(format!(
                "kfd_regularization must be positive, got {}",
                self.kfd_regularization
            )));
        }
        Ok(())
    }
}

/// Non-empty grid of positive, finite C values
pub fn validate_c_grid(c_grid: &[f64]) -> Result<()> {
    if c_grid.is_empty() {
        return Err(RankCvError::config("C grid is empty"));
    }
    if let Some(&bad) = c_grid.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
        return Err(RankCvError::config(format!("C must be positive, got {bad}")));
    }
    Ok(())
}

/// Non-empty grid of k values, each at least 1
pub fn validate_k_grid(k_grid: &[usize]) -> Result<()> {
    if k_grid.is_empty() {
        return Err(RankCvError::config("k grid is empty"));
    }
    if k_grid.contains(&0) {
        return Err(RankCvError::config("k must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = EvaluationConfig::default();
        assert_eq!(config.inner_folds, 5);
        assert_eq!(config.outer_folds, 5);
        assert_eq!(config.outer_repeats, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_options() {
        let cases = vec![
            EvaluationConfig::default().with_c_grid(vec![]),
            EvaluationConfig::default().with_c_grid(vec![1.0, -1.0]),
            EvaluationConfig::default().with_k_grid(vec![0, 1]),
            EvaluationConfig::default().with_folds(1, 5),
            EvaluationConfig::default().with_folds(5, 1),
            EvaluationConfig::default().with_outer_repeats(0),
            EvaluationConfig {
                noise_window_grid: vec![-0.5],
                ..Default::default()
            },
            EvaluationConfig {
                mc_draw_counts: vec![0, 1],
                ..Default::default()
            },
            EvaluationConfig {
                kfd_regularization: 0.0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(RankCvError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"c_grid": [0.5, 5.0], "seed": 42, "solver": {{"max_iterations": 500}}}}"#)
            .unwrap();

        let config = EvaluationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.c_grid, vec![0.5, 5.0]);
        assert_eq!(config.seed, 42);
        assert_eq!(config.solver.max_iterations, 500);
        assert_eq!(config.solver.epsilon, 0.001);
        assert_eq!(config.outer_repeats, 10);
    }

    #[test]
    fn test_invalid_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"inner_folds": 1}}"#).unwrap();
        assert!(matches!(
            EvaluationConfig::from_file(file.path()),
            Err(RankCvError::Config(_))
        ));

        let mut broken = NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(matches!(
            EvaluationConfig::from_file(broken.path()),
            Err(RankCvError::Serialization(_))
        ));
    }
}
