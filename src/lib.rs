//! Rank-comparison classifiers and Kendall kernel SVMs under nested
//! cross-validation
//!
//! Compares top-scoring-pair voting (TSP, kTSP, APMV) with kernel SVMs on
//! linear, polynomial, Gaussian, Kendall and noise-stabilized Kendall
//! kernels, with hyperparameters selected by inner cross-validation only.

pub mod approximator;
pub mod cache;
pub mod config;
pub mod core;
pub mod cv;
pub mod data;
pub mod kernel;
pub mod pairs;
pub mod solver;
pub mod utils;

// Re-export main types for convenience
pub use crate::approximator::{KernelApproximator, RunningMean};
pub use crate::cache::{CacheStats, KernelCache};
pub use crate::config::EvaluationConfig;
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{RankCvError, Result};
pub use crate::cv::{CvEngine, Dataset, EvaluationResult, ModelSpec, RunReport, Runner};
pub use crate::data::CsvDataset;
pub use crate::kernel::{Kernel, KernelMatrixBuilder, KernelSpec};
pub use crate::pairs::{PairScorer, PairVoteClassifier};
pub use crate::solver::{KernelFisher, SmoClassifier};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
