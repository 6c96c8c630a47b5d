//! Majority-vote classifiers over scored pairs (TSP, kTSP, APMV)

use crate::core::{FeatureMatrix, GenePair, RankCvError, Result};

/// Unweighted majority vote of a set of pairs
///
/// With one pair this is the TSP classifier, with the top k pairs kTSP and
/// with every pair APMV. A tied vote goes to the first class.
#[derive(Debug, Clone)]
pub struct PairVoteClassifier {
    pairs: Vec<GenePair>,
}

impl PairVoteClassifier {
    pub fn new(pairs: &[GenePair]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(RankCvError::config("a pair vote needs at least one pair"));
        }
        Ok(Self {
            pairs: pairs.to_vec(),
        })
    }

    pub fn pairs(&self) -> &[GenePair] {
        &self.pairs
    }

    /// Predicted class of one sample (true = second class)
    pub fn predict_row(&self, row: &[f64]) -> bool {
        let positive = self.pairs.iter().filter(|p| p.vote(row)).count();
        2 * positive > self.pairs.len()
    }

    /// Predicted classes of the given samples
    pub fn predict(&self, matrix: &FeatureMatrix, samples: &[usize]) -> Vec<bool> {
        samples
            .iter()
            .map(|&s| self.predict_row(matrix.row(s)))
            .collect()
    }
}
