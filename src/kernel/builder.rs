//! Kernel matrix construction
//!
//! Every matrix is assembled from its upper triangle and mirrored, so it is
//! exactly symmetric, and its diagonal is the value fixed by the family.

use crate::approximator::KernelApproximator;
use crate::core::{FeatureMatrix, FoldSplit, KernelBlock, KernelMatrix, KernelWarning, RankCvError, Result};
use crate::kernel::linear::squared_distance;
use crate::kernel::rbf::median_bandwidth;
use crate::kernel::{GaussianKernel, KendallKernel, Kernel, LinearKernel, PolynomialKernel};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kernel family and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kernel", rename_all = "snake_case")]
pub enum KernelSpec {
    /// Normalized dot product
    Linear,
    /// Square of the normalized dot product
    Polynomial,
    /// Gaussian RBF; `sigma = None` uses the median heuristic on training rows
    Gaussian {
        #[serde(default)]
        sigma: Option<f64>,
    },
    /// Kendall tau over feature pairs
    Kendall,
    /// Kendall kernel under U[-window, window] noise; `draws = None` is exact
    StabilizedKendall {
        window: f64,
        #[serde(default)]
        draws: Option<usize>,
    },
}

impl KernelSpec {
    /// Check parameters before any computation
    pub fn validate(&self) -> Result<()> {
        match *self {
            KernelSpec::Gaussian { sigma: Some(s) } if !(s.is_finite() && s > 0.0) => Err(
                RankCvError::config(format!("Gaussian sigma must be positive, got {s}")),
            ),
            KernelSpec::StabilizedKendall { window, .. } if !(window.is_finite() && window >= 0.0) => {
                Err(RankCvError::config(format!(
                    "noise window must be non-negative, got {window}"
                )))
            }
            KernelSpec::StabilizedKendall { draws: Some(0), .. } => Err(RankCvError::config(
                "Monte-Carlo draw count must be at least 1",
            )),
            _ => Ok(()),
        }
    }

    /// Short family name used in model labels
    pub fn family(&self) -> &'static str {
        match self {
            KernelSpec::Linear => "linear",
            KernelSpec::Polynomial => "poly",
            KernelSpec::Gaussian { .. } => "rbf",
            KernelSpec::Kendall => "kendall",
            KernelSpec::StabilizedKendall { .. } => "kendall-stab",
        }
    }
}

impl fmt::Display for KernelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelSpec::Gaussian { sigma: Some(s) } => write!(f, "rbf(sigma={s})"),
            KernelSpec::StabilizedKendall { window, draws } => match draws {
                Some(d) => write!(f, "kendall-stab(a={window},D={d})"),
                None => write!(f, "kendall-stab(a={window})"),
            },
            other => f.write_str(other.family()),
        }
    }
}

/// Gram matrix of `kernel` over all rows of `matrix`
pub fn gram<K: Kernel>(kernel: &K, matrix: &FeatureMatrix) -> KernelMatrix {
    let n = matrix.n_samples();
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|a| {
            let x = matrix.row(a);
            ((a + 1)..n).map(|b| kernel.compute(x, matrix.row(b))).collect()
        })
        .collect();

    let mut k = KernelMatrix::from_upper(upper, kernel.diagonal());
    for a in 0..n {
        if let Some(w) = kernel.inspect(a, matrix.row(a)) {
            k.push_warning(w);
        }
    }
    k.flag_constant_rows();
    k
}

/// Matrix of squared Euclidean distances between rows
pub fn squared_distances(matrix: &FeatureMatrix) -> KernelMatrix {
    let n = matrix.n_samples();
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|a| {
            let x = matrix.row(a);
            ((a + 1)..n)
                .map(|b| squared_distance(x, matrix.row(b)))
                .collect()
        })
        .collect();
    KernelMatrix::from_upper(upper, 0.0)
}

fn gaussian_entry(distance_sq: f64, sigma: Option<f64>) -> f64 {
    match sigma {
        Some(s) => GaussianKernel::new(s).from_squared_distance(distance_sq),
        None if distance_sq == 0.0 => 1.0,
        None => 0.0,
    }
}

/// Kernel restricted to one split
#[derive(Debug, Clone)]
pub struct SplitKernel {
    /// train × train
    pub train: KernelMatrix,
    /// test × train
    pub test: KernelBlock,
}

impl SplitKernel {
    pub fn warnings(&self) -> &[KernelWarning] {
        self.train.warnings()
    }
}

/// Kernel prepared once per (data, family, feature subset) and sliced per split
///
/// Pointwise kernels are stored as a finished matrix. The Gaussian kernel
/// keeps squared distances so its bandwidth can be re-estimated on the
/// training rows of each split.
#[derive(Debug, Clone)]
pub enum PreparedKernel {
    Fixed(KernelMatrix),
    Gaussian {
        distances: KernelMatrix,
        sigma: Option<f64>,
    },
}

impl PreparedKernel {
    pub fn size(&self) -> usize {
        match self {
            PreparedKernel::Fixed(k) => k.size(),
            PreparedKernel::Gaussian { distances, .. } => distances.size(),
        }
    }

    fn bandwidth(&self, training: &[usize]) -> Option<f64> {
        match self {
            PreparedKernel::Fixed(_) => None,
            PreparedKernel::Gaussian {
                sigma: Some(s), ..
            } => Some(*s),
            PreparedKernel::Gaussian {
                distances,
                sigma: None,
            } => median_bandwidth(distances, training),
        }
    }

    /// Full kernel matrix; the Gaussian bandwidth comes from `training`
    pub fn materialize(&self, training: &[usize]) -> KernelMatrix {
        match self {
            PreparedKernel::Fixed(k) => k.clone(),
            PreparedKernel::Gaussian { distances, .. } => {
                let sigma = self.bandwidth(training);
                let mut k = distances.map(|d| gaussian_entry(d, sigma));
                if sigma.is_none() {
                    k.push_warning(KernelWarning::ZeroBandwidth);
                }
                k.flag_constant_rows();
                k
            }
        }
    }

    /// Training and test blocks of one split
    pub fn split(&self, split: &FoldSplit) -> SplitKernel {
        match self {
            PreparedKernel::Fixed(k) => SplitKernel {
                train: k.select(&split.train),
                test: k.block(&split.test, &split.train),
            },
            PreparedKernel::Gaussian { distances, .. } => {
                let sigma = self.bandwidth(&split.train);
                let mut train = distances
                    .select(&split.train)
                    .map(|d| gaussian_entry(d, sigma));
                if sigma.is_none() {
                    train.push_warning(KernelWarning::ZeroBandwidth);
                }
                train.flag_constant_rows();
                let test = distances
                    .block(&split.test, &split.train)
                    .map(|d| gaussian_entry(d, sigma));
                SplitKernel { train, test }
            }
        }
    }
}

/// Builds kernel matrices for a feature matrix and a kernel specification
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelMatrixBuilder {
    seed: u64,
}

impl KernelMatrixBuilder {
    /// `seed` drives the noise of Monte-Carlo stabilized kernels
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Prepare a kernel over all rows, optionally on a subset of features
    pub fn prepare(
        &self,
        matrix: &FeatureMatrix,
        spec: &KernelSpec,
        features: Option<&[usize]>,
    ) -> Result<PreparedKernel> {
        spec.validate()?;
        let restricted;
        let data = match features {
            Some(f) => {
                restricted = matrix.columns(f)?;
                &restricted
            }
            None => matrix,
        };
        debug!(
            "Building {} kernel on {} samples x {} features",
            spec,
            data.n_samples(),
            data.n_features()
        );

        let prepared = match *spec {
            KernelSpec::Linear => PreparedKernel::Fixed(gram(&LinearKernel::new(), data)),
            KernelSpec::Polynomial => {
                PreparedKernel::Fixed(gram(&PolynomialKernel::quadratic(), data))
            }
            KernelSpec::Gaussian { sigma } => PreparedKernel::Gaussian {
                distances: squared_distances(data),
                sigma,
            },
            KernelSpec::Kendall => PreparedKernel::Fixed(gram(&KendallKernel::new(), data)),
            KernelSpec::StabilizedKendall { window, draws } => {
                let approximator = KernelApproximator::new(window, self.seed)?;
                PreparedKernel::Fixed(match draws {
                    Some(d) => approximator.monte_carlo(data, d)?,
                    None => approximator.exact(data),
                })
            }
        };

        if let PreparedKernel::Fixed(k) = &prepared {
            for w in k.warnings() {
                warn!("{spec} kernel is degenerate: {w}");
            }
        }
        Ok(prepared)
    }

    /// Kernel matrix over all rows, Gaussian bandwidth estimated on all rows
    pub fn build(
        &self,
        matrix: &FeatureMatrix,
        spec: &KernelSpec,
        features: Option<&[usize]>,
    ) -> Result<KernelMatrix> {
        let all: Vec<usize> = (0..matrix.n_samples()).collect();
        self.build_with_training(matrix, spec, features, &all)
    }

    /// Kernel matrix over all rows, Gaussian bandwidth estimated on `training`
    pub fn build_with_training(
        &self,
        matrix: &FeatureMatrix,
        spec: &KernelSpec,
        features: Option<&[usize]>,
        training: &[usize],
    ) -> Result<KernelMatrix> {
        Ok(self.prepare(matrix, spec, features)?.materialize(training))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn data() -> FeatureMatrix {
        FeatureMatrix::from_rows(&[
            vec![0.1, 2.0, 1.5, 3.3],
            vec![1.2, 0.4, 2.2, 0.9],
            vec![2.5, 1.1, 0.3, 1.8],
            vec![0.7, 3.1, 1.9, 2.4],
            vec![1.9, 0.2, 2.8, 0.5],
        ])
        .unwrap()
    }

    fn all_specs() -> Vec<KernelSpec> {
        vec![
            KernelSpec::Linear,
            KernelSpec::Polynomial,
            KernelSpec::Gaussian { sigma: None },
            KernelSpec::Gaussian { sigma: Some(1.5) },
            KernelSpec::Kendall,
            KernelSpec::StabilizedKendall {
                window: 0.5,
                draws: None,
            },
            KernelSpec::StabilizedKendall {
                window: 0.5,
                draws: Some(4),
            },
        ]
    }

    #[test]
    fn test_every_family_is_symmetric_with_unit_diagonal() {
        let x = data();
        let builder = KernelMatrixBuilder::new(3);
        for spec in all_specs() {
            let k = builder.build(&x, &spec, None).unwrap();
            assert_eq!(k.size(), 5);
            assert!(k.is_symmetric(), "{spec} is not symmetric");
            assert!(
                k.diagonal().iter().all(|&d| d == 1.0),
                "{spec} diagonal is not 1"
            );
            assert!(!k.is_degenerate(), "{spec} flagged degenerate");
        }
    }

    #[test]
    fn test_feature_subset() {
        let x = data();
        let builder = KernelMatrixBuilder::default();
        let sub = builder.build(&x, &KernelSpec::Kendall, Some(&[0, 2])).unwrap();
        let direct = gram(&KendallKernel::new(), &x.columns(&[0, 2]).unwrap());
        assert_eq!(sub, direct);

        assert!(matches!(
            builder.build(&x, &KernelSpec::Kendall, Some(&[])),
            Err(RankCvError::Config(_))
        ));
        assert!(matches!(
            builder.build(&x, &KernelSpec::Linear, Some(&[1, 9])),
            Err(RankCvError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_specs() {
        let x = data();
        let builder = KernelMatrixBuilder::default();
        for spec in [
            KernelSpec::Gaussian { sigma: Some(0.0) },
            KernelSpec::StabilizedKendall {
                window: -1.0,
                draws: None,
            },
            KernelSpec::StabilizedKendall {
                window: 1.0,
                draws: Some(0),
            },
        ] {
            assert!(matches!(
                builder.build(&x, &spec, None),
                Err(RankCvError::Config(_))
            ));
        }
    }

    #[test]
    fn test_gaussian_bandwidth_uses_training_rows_only() {
        let x = FeatureMatrix::from_rows(&[vec![0.0], vec![1.0], vec![2.0], vec![50.0]]).unwrap();
        let builder = KernelMatrixBuilder::default();
        let prepared = builder
            .prepare(&x, &KernelSpec::Gaussian { sigma: None }, None)
            .unwrap();

        let split = FoldSplit::new(vec![0, 1, 2], vec![3]);
        let sk = prepared.split(&split);
        // training distances 1, 2, 1 -> sigma = 1
        assert_relative_eq!(sk.train.get(0, 1), (-0.5_f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(sk.test.get(0, 2), (-48.0_f64 * 48.0 / 2.0).exp(), epsilon = 1e-12);

        // the outlier changes sigma once it is part of the training rows
        let with_outlier = prepared.materialize(&[0, 1, 2, 3]);
        assert!(with_outlier.get(0, 1) > sk.train.get(0, 1));
    }

    #[test]
    fn test_gaussian_zero_bandwidth_is_flagged() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 1.0], vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let k = KernelMatrixBuilder::default()
            .build(&x, &KernelSpec::Gaussian { sigma: None }, None)
            .unwrap();
        assert!(k.warnings().contains(&KernelWarning::ZeroBandwidth));
        assert!(k.is_symmetric());
        assert_eq!(k.get(0, 1), 1.0);
    }

    #[test]
    fn test_tied_sample_is_flagged() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 1.0, 1.0], vec![1.0, 2.0, 3.0], vec![3.0, 1.0, 2.0]])
            .unwrap();
        let k = KernelMatrixBuilder::default()
            .build(&x, &KernelSpec::Kendall, None)
            .unwrap();
        assert!(k.warnings().contains(&KernelWarning::FullyTied(0)));
        assert_eq!(k.get(0, 1), 0.0);
    }

    #[test]
    fn test_split_blocks_match_full_matrix() {
        let x = data();
        let prepared = KernelMatrixBuilder::default()
            .prepare(&x, &KernelSpec::Linear, None)
            .unwrap();
        let full = prepared.materialize(&[0, 1, 2, 3, 4]);
        let sk = prepared.split(&FoldSplit::new(vec![0, 2, 4], vec![1, 3]));
        assert_eq!(sk.train.size(), 3);
        assert_eq!(sk.train.get(1, 2), full.get(2, 4));
        assert_eq!(sk.test.rows(), 2);
        assert_eq!(sk.test.get(1, 0), full.get(3, 0));
    }

    #[test]
    fn test_spec_display_and_serde() {
        let spec = KernelSpec::StabilizedKendall {
            window: 0.25,
            draws: Some(10),
        };
        assert_eq!(spec.to_string(), "kendall-stab(a=0.25,D=10)");
        assert_eq!(KernelSpec::Gaussian { sigma: None }.to_string(), "rbf");

        let json = serde_json::to_string(&spec).unwrap();
        let back: KernelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);

        let parsed: KernelSpec = serde_json::from_str(r#"{"kernel":"gaussian"}"#).unwrap();
        assert_eq!(parsed, KernelSpec::Gaussian { sigma: None });
    }
}
