//! Runs the engine over several datasets on a bounded worker pool

use crate::config::EvaluationConfig;
use crate::core::{KernelClassifier, RankCvError, Result};
use crate::cv::engine::{CvEngine, Dataset, DatasetOutcome, ModelSpec};
use crate::cv::results::{RunReport, UnitFailure};
use crate::solver::SmoClassifier;
use crate::utils::seed::derive_seed;
use log::{error, info};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

/// One unit of work per dataset, each with a seed derived from its index
pub struct Runner<C: KernelClassifier = SmoClassifier> {
    engine: CvEngine<C>,
}

impl Runner<SmoClassifier> {
    pub fn new(config: EvaluationConfig) -> Result<Self> {
        Ok(Self {
            engine: CvEngine::new(config)?,
        })
    }
}

impl<C: KernelClassifier> Runner<C> {
    pub fn with_engine(engine: CvEngine<C>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &CvEngine<C> {
        &self.engine
    }

    /// Evaluate `models` on every dataset
    ///
    /// A dataset that fails is recorded in the report's failures; the
    /// other datasets are still evaluated.
    pub fn run(&self, datasets: &[Dataset], models: &[ModelSpec]) -> Result<RunReport> {
        let config = self.engine.config();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .build()
            .map_err(|e| RankCvError::config(format!("cannot start worker pool: {e}")))?;
        info!(
            "Running {} models on {} datasets with {} workers",
            models.len(),
            datasets.len(),
            pool.current_num_threads()
        );

        let outcomes: Vec<(String, Result<DatasetOutcome>)> = pool.install(|| {
            datasets
                .par_iter()
                .enumerate()
                .map(|(d, dataset)| {
                    let seed = derive_seed(config.seed, &[d as u64]);
                    (dataset.name.clone(), self.engine.evaluate(dataset, models, seed))
                })
                .collect()
        });

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    results.extend(outcome.results);
                    failures.extend(outcome.failures);
                }
                Err(e) => {
                    error!("Dataset '{name}' failed: {e}");
                    failures.push(UnitFailure {
                        dataset: name,
                        model: None,
                        fold: None,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(RunReport::new(results, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeatureMatrix;
    use crate::cv::engine::Partition;
    use crate::cv::results::RunStatus;

    fn separable(n_per_class: usize) -> (FeatureMatrix, Vec<f64>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for s in 0..2 * n_per_class {
            let positive = s >= n_per_class;
            let shift = (s % 5) as f64 * 0.1;
            rows.push(if positive {
                vec![1.0 + shift, 3.0, 2.0 - shift]
            } else {
                vec![3.0 + shift, 1.0, 2.0 - shift]
            });
            labels.push(if positive { 1.0 } else { -1.0 });
        }
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    fn config() -> EvaluationConfig {
        EvaluationConfig::default()
            .with_folds(2, 2)
            .with_outer_repeats(2)
            .with_c_grid(vec![1.0])
            .with_k_grid(vec![1, 2])
            .with_workers(2)
    }

    #[test]
    fn test_failed_dataset_is_reported() {
        let (x, y) = separable(4);
        let empty = Partition {
            features: FeatureMatrix::new(0, 3, vec![]).unwrap(),
            labels: vec![],
        };
        let datasets = vec![
            Dataset::nested("good", x.clone(), y.clone()),
            Dataset::held_out(
                "broken",
                Partition {
                    features: x,
                    labels: y,
                },
                empty,
            ),
        ];
        let report = Runner::new(config())
            .unwrap()
            .run(&datasets, &[ModelSpec::Tsp])
            .unwrap();

        assert_eq!(report.status(), RunStatus::Incomplete);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].dataset, "broken");
        assert!(report.find("good", "TSP").is_some());
    }

    #[test]
    fn test_results_do_not_depend_on_worker_count() {
        let (x, y) = separable(5);
        let datasets = vec![
            Dataset::nested("a", x.clone(), y.clone()),
            Dataset::nested("b", x, y),
        ];
        let models = vec![ModelSpec::Ktsp { k_grid: vec![1, 2] }];

        let one = Runner::new(config().with_workers(1))
            .unwrap()
            .run(&datasets, &models)
            .unwrap();
        let four = Runner::new(config().with_workers(4))
            .unwrap()
            .run(&datasets, &models)
            .unwrap();

        assert_eq!(one.status(), RunStatus::Complete);
        assert_eq!(one.results.len(), four.results.len());
        for (a, b) in one.results.iter().zip(&four.results) {
            assert_eq!(a.model, b.model);
            assert_eq!(a.selected, b.selected);
            assert_eq!(a.fold_accuracy, b.fold_accuracy);
        }
    }
}
