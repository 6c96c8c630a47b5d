//! Pairwise rank-comparison scoring
//!
//! For every unordered feature pair (i, j) the score is
//! |P(x_i < x_j | second class) − P(x_i < x_j | first class)|, estimated on
//! the training samples of the active split.
//!
//! The comparison x_i < x_j is evaluated once per (pair, sample) when the
//! scorer is built and stored as a bitset over samples. Scoring a split then
//! only counts bits under the class masks of its training samples, so pairs
//! can be re-scored for every fold without touching the data again.

pub mod classifier;

pub use self::classifier::*;

use crate::core::{BinaryLabels, FeatureMatrix, GenePair, RankCvError, Result};
use rayon::prelude::*;

/// Precomputed pairwise comparisons of a feature matrix
#[derive(Debug, Clone)]
pub struct PairScorer {
    n_samples: usize,
    n_features: usize,
    words: usize,
    bits: Vec<u64>,
}

impl PairScorer {
    /// Evaluate every feature comparison of every sample
    pub fn new(matrix: &FeatureMatrix) -> Self {
        let n_samples = matrix.n_samples();
        let n_features = matrix.n_features();
        let words = n_samples.div_ceil(64).max(1);

        let per_first: Vec<Vec<u64>> = (0..n_features)
            .into_par_iter()
            .map(|i| {
                let mut chunk = vec![0u64; (n_features - i - 1) * words];
                for j in (i + 1)..n_features {
                    let base = (j - i - 1) * words;
                    for s in 0..n_samples {
                        if matrix.get(s, i) < matrix.get(s, j) {
                            chunk[base + s / 64] |= 1u64 << (s % 64);
                        }
                    }
                }
                chunk
            })
            .collect();

        Self {
            n_samples,
            n_features,
            words,
            bits: per_first.concat(),
        }
    }

    /// Number of unordered pairs over `n_features` features
    pub fn pair_count(n_features: usize) -> usize {
        n_features * n_features.saturating_sub(1) / 2
    }

    pub fn n_pairs(&self) -> usize {
        Self::pair_count(self.n_features)
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn mask(&self, indices: impl Iterator<Item = usize>) -> Vec<u64> {
        let mut mask = vec![0u64; self.words];
        for s in indices {
            mask[s / 64] |= 1u64 << (s % 64);
        }
        mask
    }

    /// Score all pairs on the given training samples, best first
    ///
    /// Pairs with equal scores keep lexicographic (first, second) order.
    /// Both classes must be present among the training samples.
    pub fn score(&self, labels: &BinaryLabels, training: &[usize]) -> Result<Vec<GenePair>> {
        if labels.len() != self.n_samples {
            return Err(RankCvError::DimensionMismatch {
                expected: self.n_samples,
                actual: labels.len(),
            });
        }
        if let Some(&bad) = training.iter().find(|&&s| s >= self.n_samples) {
            return Err(RankCvError::config(format!(
                "training index {bad} out of range for {} samples",
                self.n_samples
            )));
        }

        let (n0, n1) = labels.counts(training);
        if n0 == 0 || n1 == 0 {
            return Err(RankCvError::InvalidLabels(
                "pair scoring needs samples of both classes".to_string(),
            ));
        }

        let mask1 = self.mask(training.iter().copied().filter(|&s| labels.is_positive(s)));
        let mask0 = self.mask(training.iter().copied().filter(|&s| !labels.is_positive(s)));
        let denominator = (n0 * n1) as f64;

        // Integer numerators |c1·n0 − c0·n1| keep equal scores exactly equal.
        let mut scored: Vec<(u64, GenePair)> = Vec::with_capacity(self.n_pairs());
        let mut offset = 0;
        for i in 0..self.n_features {
            for j in (i + 1)..self.n_features {
                let bits = &self.bits[offset..offset + self.words];
                offset += self.words;

                let c1: u64 = bits
                    .iter()
                    .zip(&mask1)
                    .map(|(b, m)| (b & m).count_ones() as u64)
                    .sum();
                let c0: u64 = bits
                    .iter()
                    .zip(&mask0)
                    .map(|(b, m)| (b & m).count_ones() as u64)
                    .sum();

                let lhs = c1 * n0 as u64;
                let rhs = c0 * n1 as u64;
                let numerator = lhs.abs_diff(rhs);
                scored.push((
                    numerator,
                    GenePair {
                        first: i,
                        second: j,
                        score: numerator as f64 / denominator,
                        positive_when_less: lhs >= rhs,
                    },
                ));
            }
        }

        // Stable: generation order is already lexicographic.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().map(|(_, pair)| pair).collect())
    }

    /// Score all pairs using every sample
    pub fn score_all(&self, labels: &BinaryLabels) -> Result<Vec<GenePair>> {
        let all: Vec<usize> = (0..self.n_samples).collect();
        self.score(labels, &all)
    }
}

/// Score every pair of `matrix` against `labels` using all samples
pub fn score_pairs(matrix: &FeatureMatrix, labels: &BinaryLabels) -> Result<Vec<GenePair>> {
    PairScorer::new(matrix).score_all(labels)
}

/// The best `k` pairs of a ranked list
pub fn top_k(ranked: &[GenePair], k: usize) -> Result<&[GenePair]> {
    if k == 0 {
        return Err(RankCvError::config("number of pairs k must be at least 1"));
    }
    if k > ranked.len() {
        return Err(RankCvError::config(format!(
            "requested k = {k} pairs but only {} pairs are available",
            ranked.len()
        )));
    }
    Ok(&ranked[..k])
}

/// Sorted, de-duplicated features used by a set of pairs
pub fn pair_features(pairs: &[GenePair]) -> Vec<usize> {
    let mut features: Vec<usize> = pairs.iter().flat_map(|p| [p.first, p.second]).collect();
    features.sort_unstable();
    features.dedup();
    features
}
