//! Core type definitions: feature matrices, labels, pairs, kernel matrices and splits

use crate::core::{RankCvError, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dense samples × features matrix stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_samples: usize,
    n_features: usize,
    values: Vec<f64>,
}

impl FeatureMatrix {
    /// Create a matrix from row-major values
    pub fn new(n_samples: usize, n_features: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != n_samples * n_features {
            return Err(RankCvError::DimensionMismatch {
                expected: n_samples * n_features,
                actual: values.len(),
            });
        }
        Ok(Self {
            n_samples,
            n_features,
            values,
        })
    }

    /// Create a matrix from a list of equally long rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * n_features);
        for row in rows {
            if row.len() != n_features {
                return Err(RankCvError::DimensionMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(rows.len(), n_features, values)
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Value of feature `feature` in sample `sample`
    pub fn get(&self, sample: usize, feature: usize) -> f64 {
        self.values[sample * self.n_features + feature]
    }

    /// Feature vector of one sample
    pub fn row(&self, sample: usize) -> &[f64] {
        let start = sample * self.n_features;
        &self.values[start..start + self.n_features]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Copy restricted to the given feature columns, in the given order
    ///
    /// Fails with a configuration error when the subset is empty or refers
    /// to a feature that does not exist.
    pub fn columns(&self, features: &[usize]) -> Result<FeatureMatrix> {
        if features.is_empty() {
            return Err(RankCvError::config("feature subset is empty"));
        }
        if let Some(&bad) = features.iter().find(|&&f| f >= self.n_features) {
            return Err(RankCvError::config(format!(
                "feature index {bad} out of range for {} features",
                self.n_features
            )));
        }

        let mut values = Vec::with_capacity(self.n_samples * features.len());
        for s in 0..self.n_samples {
            let row = self.row(s);
            values.extend(features.iter().map(|&f| row[f]));
        }
        FeatureMatrix::new(self.n_samples, features.len(), values)
    }

    /// Stack the rows of `other` below the rows of `self`
    pub fn vstack(&self, other: &FeatureMatrix) -> Result<FeatureMatrix> {
        if other.n_features != self.n_features {
            return Err(RankCvError::DimensionMismatch {
                expected: self.n_features,
                actual: other.n_features,
            });
        }
        let mut values = self.values.clone();
        values.extend_from_slice(&other.values);
        FeatureMatrix::new(self.n_samples + other.n_samples, self.n_features, values)
    }

    /// Element-wise sum with a noise matrix of the same shape
    pub fn perturbed(&self, noise: &[f64]) -> Result<FeatureMatrix> {
        if noise.len() != self.values.len() {
            return Err(RankCvError::DimensionMismatch {
                expected: self.values.len(),
                actual: noise.len(),
            });
        }
        let values = self.values.iter().zip(noise).map(|(x, e)| x + e).collect();
        FeatureMatrix::new(self.n_samples, self.n_features, values)
    }
}

/// Binary label vector
///
/// The two class values are kept in ascending order: `classes[0]` is the
/// first (negative) class and `classes[1]` the second (positive) class.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryLabels {
    classes: [f64; 2],
    positive: Vec<bool>,
}

impl BinaryLabels {
    /// Build labels that must contain exactly two distinct, non-empty classes
    pub fn new(values: &[f64]) -> Result<Self> {
        let mut distinct: Vec<f64> = Vec::new();
        for &v in values {
            if !v.is_finite() {
                return Err(RankCvError::InvalidLabels(format!("non-finite label {v}")));
            }
            if !distinct.contains(&v) {
                distinct.push(v);
            }
        }
        if distinct.len() != 2 {
            return Err(RankCvError::InvalidLabels(format!(
                "expected exactly two classes, found {}",
                distinct.len()
            )));
        }
        distinct.sort_by(|a, b| a.total_cmp(b));
        Self::with_classes(values, [distinct[0], distinct[1]])
    }

    /// Build labels against a known pair of classes; either class may be absent
    pub fn with_classes(values: &[f64], classes: [f64; 2]) -> Result<Self> {
        let positive = values
            .iter()
            .map(|&v| {
                if v == classes[1] {
                    Ok(true)
                } else if v == classes[0] {
                    Ok(false)
                } else {
                    Err(RankCvError::InvalidLabels(format!(
                        "label {v} is not one of {} / {}",
                        classes[0], classes[1]
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { classes, positive })
    }

    pub fn len(&self) -> usize {
        self.positive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty()
    }

    pub fn classes(&self) -> [f64; 2] {
        self.classes
    }

    /// Whether sample `i` belongs to the second class
    pub fn is_positive(&self, i: usize) -> bool {
        self.positive[i]
    }

    /// Original class value of sample `i`
    pub fn value(&self, i: usize) -> f64 {
        self.class_value(self.positive[i])
    }

    pub fn class_value(&self, positive: bool) -> f64 {
        if positive {
            self.classes[1]
        } else {
            self.classes[0]
        }
    }

    /// Labels of the given samples as ±1 values
    pub fn signed(&self, indices: &[usize]) -> Vec<f64> {
        indices
            .iter()
            .map(|&i| if self.positive[i] { 1.0 } else { -1.0 })
            .collect()
    }

    /// (first class, second class) counts among the given samples
    pub fn counts(&self, indices: &[usize]) -> (usize, usize) {
        let pos = indices.iter().filter(|&&i| self.positive[i]).count();
        (indices.len() - pos, pos)
    }

    /// Labels of `self` followed by labels of `other` (same classes)
    pub fn concat(&self, other: &BinaryLabels) -> Result<BinaryLabels> {
        if other.classes != self.classes {
            return Err(RankCvError::mismatch(format!(
                "class values {:?} do not match {:?}",
                other.classes, self.classes
            )));
        }
        let mut positive = self.positive.clone();
        positive.extend_from_slice(&other.positive);
        Ok(Self {
            classes: self.classes,
            positive,
        })
    }
}

/// Scored feature pair used by the rank-comparison classifiers
///
/// `first < second` always holds. `positive_when_less` tells which class a
/// sample votes for when `x[first] < x[second]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenePair {
    pub first: usize,
    pub second: usize,
    pub score: f64,
    pub positive_when_less: bool,
}

impl GenePair {
    /// Class vote (true = second class) of a sample's feature vector
    pub fn vote(&self, row: &[f64]) -> bool {
        let less = row[self.first] < row[self.second];
        less == self.positive_when_less
    }
}

/// Recoverable degeneracy detected while building a kernel matrix
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelWarning {
    #[error("Gaussian bandwidth collapsed to zero")]
    ZeroBandwidth,

    #[error("sample {0} has a zero-norm feature vector")]
    ZeroNorm(usize),

    #[error("sample {0} has all feature values tied")]
    FullyTied(usize),

    #[error("kernel row {0} is constant")]
    ConstantRow(usize),
}

impl KernelWarning {
    /// The warning with its sample renumbered to its position in `indices`
    ///
    /// `None` when the sample is not selected.
    fn restricted_to(&self, indices: &[usize]) -> Option<KernelWarning> {
        let position = |sample: usize| indices.iter().position(|&i| i == sample);
        match *self {
            KernelWarning::ZeroBandwidth => Some(KernelWarning::ZeroBandwidth),
            KernelWarning::ZeroNorm(s) => position(s).map(KernelWarning::ZeroNorm),
            KernelWarning::FullyTied(s) => position(s).map(KernelWarning::FullyTied),
            KernelWarning::ConstantRow(s) => position(s).map(KernelWarning::ConstantRow),
        }
    }
}

/// Symmetric n × n kernel matrix
#[derive(Debug, Clone, PartialEq)]
pub struct KernelMatrix {
    n: usize,
    values: Vec<f64>,
    warnings: Vec<KernelWarning>,
}

impl KernelMatrix {
    /// Assemble a matrix from strictly-upper-triangle rows and a fixed diagonal
    ///
    /// `upper[a]` holds K[a, a+1..n]; the lower triangle is mirrored so the
    /// result is exactly symmetric.
    pub fn from_upper(upper: Vec<Vec<f64>>, diagonal: f64) -> Self {
        let n = upper.len();
        let mut values = vec![0.0; n * n];
        for (a, row) in upper.into_iter().enumerate() {
            values[a * n + a] = diagonal;
            for (offset, v) in row.into_iter().enumerate() {
                let b = a + 1 + offset;
                values[a * n + b] = v;
                values[b * n + a] = v;
            }
        }
        Self {
            n,
            values,
            warnings: Vec::new(),
        }
    }

    /// Wrap row-major values; the caller guarantees symmetry
    pub fn from_values(n: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != n * n {
            return Err(RankCvError::DimensionMismatch {
                expected: n * n,
                actual: values.len(),
            });
        }
        Ok(Self {
            n,
            values,
            warnings: Vec::new(),
        })
    }

    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            values: vec![0.0; n * n],
            warnings: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.values[a * self.n + b]
    }

    pub fn row(&self, a: usize) -> &[f64] {
        &self.values[a * self.n..(a + 1) * self.n]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|a| self.get(a, a)).collect()
    }

    /// Exact symmetry check (bitwise equal mirrored entries)
    pub fn is_symmetric(&self) -> bool {
        (0..self.n).all(|a| (a + 1..self.n).all(|b| self.get(a, b) == self.get(b, a)))
    }

    /// Square sub-matrix on the given samples
    pub fn select(&self, indices: &[usize]) -> KernelMatrix {
        let m = indices.len();
        let mut values = Vec::with_capacity(m * m);
        for &a in indices {
            let row = self.row(a);
            values.extend(indices.iter().map(|&b| row[b]));
        }
        KernelMatrix {
            n: m,
            values,
            warnings: self
                .warnings
                .iter()
                .filter_map(|w| w.restricted_to(indices))
                .collect(),
        }
    }

    /// Rectangular block K[rows, cols], e.g. test × train
    pub fn block(&self, rows: &[usize], cols: &[usize]) -> KernelBlock {
        let mut values = Vec::with_capacity(rows.len() * cols.len());
        for &a in rows {
            let row = self.row(a);
            values.extend(cols.iter().map(|&b| row[b]));
        }
        KernelBlock {
            rows: rows.len(),
            cols: cols.len(),
            values,
        }
    }

    /// Largest absolute entry-wise difference to another matrix
    pub fn max_abs_diff(&self, other: &KernelMatrix) -> Result<f64> {
        if other.n != self.n {
            return Err(RankCvError::DimensionMismatch {
                expected: self.n,
                actual: other.n,
            });
        }
        Ok(self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max))
    }

    /// Apply `f` to every entry, keeping symmetry and sample numbering
    pub fn map(&self, f: impl Fn(f64) -> f64) -> KernelMatrix {
        KernelMatrix {
            n: self.n,
            values: self.values.iter().map(|&v| f(v)).collect(),
            warnings: self.warnings.clone(),
        }
    }

    pub fn warnings(&self) -> &[KernelWarning] {
        &self.warnings
    }

    pub fn is_degenerate(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn push_warning(&mut self, warning: KernelWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Flag rows whose off-diagonal entries are all equal
    pub fn flag_constant_rows(&mut self) {
        if self.n < 3 {
            return;
        }
        let constant: Vec<usize> = (0..self.n)
            .filter(|&a| {
                let mut off = (0..self.n).filter(|&b| b != a).map(|b| self.get(a, b));
                match off.next() {
                    Some(first) => off.all(|v| (v - first).abs() < 1e-12),
                    None => false,
                }
            })
            .collect();
        for a in constant {
            self.push_warning(KernelWarning::ConstantRow(a));
        }
    }
}

/// Rectangular kernel block, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl KernelBlock {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.values[r * self.cols..(r + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.values[r * self.cols + c]
    }

    /// Apply `f` to every entry
    pub fn map(&self, f: impl Fn(f64) -> f64) -> KernelBlock {
        KernelBlock {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

/// Partition of sample indices into training and held-out sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl FoldSplit {
    pub fn new(train: Vec<usize>, test: Vec<usize>) -> Self {
        Self { train, test }
    }

    /// True when no index appears on both sides
    pub fn is_disjoint(&self) -> bool {
        !self.test.iter().any(|t| self.train.contains(t))
    }
}

/// Result of a dual optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Lagrange multipliers (alpha values)
    pub alpha: Vec<f64>,
    /// Bias term (b), decision = Σ αᵢ yᵢ K(xᵢ, x) + b
    pub b: f64,
    /// Indices of support vectors (where alpha > 0)
    pub support_vectors: Vec<usize>,
    /// Number of iterations performed
    pub iterations: usize,
    /// Final dual objective value
    pub objective_value: f64,
    /// Whether the stopping tolerance was reached within the iteration limit
    pub converged: bool,
}

/// Configuration for the SMO solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Tolerance on the maximal KKT violation
    pub epsilon: f64,
    /// Maximum number of working-set updates
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            max_iterations: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_config_default() {
        let config = SolverConfig::default();
        assert_eq!(config.epsilon, 0.001);
        assert_eq!(config.max_iterations, 100_000);

        let parsed: SolverConfig = serde_json::from_str(r#"{"epsilon": 0.01}"#).unwrap();
        assert_eq!(parsed.epsilon, 0.01);
        assert_eq!(parsed.max_iterations, 100_000);
    }

    #[test]
    fn test_feature_matrix_rows_and_columns() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(x.n_samples(), 2);
        assert_eq!(x.n_features(), 3);
        assert_eq!(x.row(1), &[4.0, 5.0, 6.0]);

        let sub = x.columns(&[2, 0]).unwrap();
        assert_eq!(sub.row(0), &[3.0, 1.0]);
        assert_eq!(sub.row(1), &[6.0, 4.0]);
    }

    #[test]
    fn test_feature_matrix_bad_subsets() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(x.columns(&[]), Err(RankCvError::Config(_))));
        assert!(matches!(x.columns(&[0, 2]), Err(RankCvError::Config(_))));
    }

    #[test]
    fn test_feature_matrix_ragged_rows() {
        let result = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![1.0]]);
        assert!(matches!(
            result,
            Err(RankCvError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_binary_labels() {
        let labels = BinaryLabels::new(&[3.0, 1.0, 3.0, 1.0, 1.0]).unwrap();
        assert_eq!(labels.classes(), [1.0, 3.0]);
        assert!(labels.is_positive(0));
        assert!(!labels.is_positive(1));
        assert_eq!(labels.counts(&[0, 1, 2, 3, 4]), (3, 2));
        assert_eq!(labels.signed(&[0, 1]), vec![1.0, -1.0]);
        assert_eq!(labels.value(4), 1.0);
    }

    #[test]
    fn test_binary_labels_reject_non_binary() {
        assert!(matches!(
            BinaryLabels::new(&[0.0, 0.0]),
            Err(RankCvError::InvalidLabels(_))
        ));
        assert!(matches!(
            BinaryLabels::new(&[0.0, 1.0, 2.0]),
            Err(RankCvError::InvalidLabels(_))
        ));
        assert!(BinaryLabels::with_classes(&[0.0, 0.0], [0.0, 1.0]).is_ok());
        assert!(BinaryLabels::with_classes(&[5.0], [0.0, 1.0]).is_err());
    }

    #[test]
    fn test_gene_pair_vote() {
        let pair = GenePair {
            first: 0,
            second: 1,
            score: 1.0,
            positive_when_less: true,
        };
        assert!(pair.vote(&[1.0, 2.0]));
        assert!(!pair.vote(&[2.0, 1.0]));
        assert!(!pair.vote(&[2.0, 2.0]));
    }

    #[test]
    fn test_kernel_matrix_from_upper_is_symmetric() {
        let k = KernelMatrix::from_upper(vec![vec![0.5, 0.2], vec![0.3], vec![]], 1.0);
        assert!(k.is_symmetric());
        assert_eq!(k.diagonal(), vec![1.0, 1.0, 1.0]);
        assert_eq!(k.get(2, 0), 0.2);
        assert_eq!(k.get(1, 2), 0.3);
    }

    #[test]
    fn test_kernel_matrix_select_and_block() {
        let k = KernelMatrix::from_upper(vec![vec![0.5, 0.2], vec![0.3], vec![]], 1.0);
        let sub = k.select(&[0, 2]);
        assert_eq!(sub.size(), 2);
        assert_eq!(sub.get(0, 1), 0.2);

        let block = k.block(&[1], &[0, 2]);
        assert_eq!(block.rows(), 1);
        assert_eq!(block.row(0), &[0.5, 0.3]);
    }

    #[test]
    fn test_kernel_matrix_constant_rows() {
        let mut k = KernelMatrix::from_upper(vec![vec![0.0, 0.0], vec![0.4], vec![]], 1.0);
        k.flag_constant_rows();
        assert_eq!(k.warnings(), &[KernelWarning::ConstantRow(0)]);
        assert!(k.is_degenerate());
    }

    #[test]
    fn test_kernel_matrix_select_renumbers_warnings() {
        let mut k = KernelMatrix::from_upper(
            vec![vec![0.5, 0.2, 0.1], vec![0.3, 0.4], vec![0.6], vec![]],
            1.0,
        );
        k.push_warning(KernelWarning::ZeroBandwidth);
        k.push_warning(KernelWarning::FullyTied(1));
        k.push_warning(KernelWarning::ZeroNorm(3));

        let sub = k.select(&[3, 2]);
        assert_eq!(
            sub.warnings(),
            &[KernelWarning::ZeroBandwidth, KernelWarning::ZeroNorm(0)]
        );
        let rest = k.select(&[0, 2]);
        assert_eq!(rest.warnings(), &[KernelWarning::ZeroBandwidth]);
        assert_eq!(k.map(|v| v * 2.0).warnings(), k.warnings());
    }

    #[test]
    fn test_fold_split_disjoint() {
        assert!(FoldSplit::new(vec![0, 1], vec![2]).is_disjoint());
        assert!(!FoldSplit::new(vec![0, 1], vec![1]).is_disjoint());
    }
}
