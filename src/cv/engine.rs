//! Cross-validation engine
//!
//! Evaluates a battery of models on one dataset. In held-out mode the
//! training partition is cross-validated for selection and the fixed test
//! partition gives the held-out accuracy. In nested mode R repeats of a
//! stratified outer k-fold split each run an inner k-fold on their own
//! training indices only.
//!
//! Kernels never depend on C. Full-feature kernels are prepared once per
//! dataset and shared by every split; top-k kernels are prepared per
//! feature subset through an LRU cache owned by the outer fold. The pair
//! ranking of each split is likewise computed once per outer fold and read
//! by every model.

use crate::approximator::KernelApproximator;
use crate::cache::{KernelCache, KernelKey};
use crate::config::{validate_c_grid, validate_k_grid, EvaluationConfig};
use crate::core::{
    BinaryLabels, FeatureMatrix, FoldSplit, GenePair, KernelClassifier, KernelWarning,
    RankCvError, Result,
};
use crate::cv::folds::{holdout_split, min_class_count, stratified_folds};
use crate::cv::grid::{select_best, HyperparameterGrid};
use crate::cv::results::{AccuracyTable, ConvergencePoint, EvaluationResult, Metric, UnitFailure};
use crate::kernel::{KernelMatrixBuilder, KernelSpec, PreparedKernel, SplitKernel};
use crate::pairs::classifier::PairVoteClassifier;
use crate::pairs::{pair_features, top_k, PairScorer};
use crate::solver::{KernelFisher, SmoClassifier};
use crate::utils::seed::derive_seed;
use crate::utils::stats::accuracy;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Seed stream of kernel noise, apart from the fold streams
const KERNEL_STREAM: u64 = 0x6b65_726e;
/// Seed stream of inner splits within an outer fold
const INNER_STREAM: u64 = 0x696e;
const CACHE_CAPACITY: usize = 64;

/// Model evaluated by the engine, with the parameters it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Majority vote of all pairs
    Apmv,
    /// Best single pair
    Tsp,
    /// Majority vote of the top k pairs
    Ktsp { k_grid: Vec<usize> },
    /// Kernel SVM on all features
    KernelSvm { kernel: KernelSpec, c_grid: Vec<f64> },
    /// Kernel SVM on the features of the top k pairs
    KernelSvmTopK {
        kernel: KernelSpec,
        c_grid: Vec<f64>,
        k_grid: Vec<usize>,
    },
}

impl ModelSpec {
    pub fn name(&self) -> String {
        match self {
            ModelSpec::Apmv => "APMV".to_string(),
            ModelSpec::Tsp => "TSP".to_string(),
            ModelSpec::Ktsp { .. } => "kTSP".to_string(),
            ModelSpec::KernelSvm { kernel, .. } => format!("SVM-{kernel}"),
            ModelSpec::KernelSvmTopK { kernel, .. } => format!("SVM-{kernel}-topk"),
        }
    }

    /// Name of the Kernel Fisher Discriminant evaluated alongside a kernel model
    pub fn reference_name(&self) -> Option<String> {
        match self {
            ModelSpec::KernelSvm { kernel, .. } => Some(format!("KFD-{kernel}")),
            ModelSpec::KernelSvmTopK { kernel, .. } => Some(format!("KFD-{kernel}-topk")),
            _ => None,
        }
    }

    pub fn grid(&self) -> HyperparameterGrid {
        match self {
            ModelSpec::Apmv | ModelSpec::Tsp => HyperparameterGrid::single(),
            ModelSpec::Ktsp { k_grid } => HyperparameterGrid::over_k(k_grid),
            ModelSpec::KernelSvm { c_grid, .. } => HyperparameterGrid::over_c(c_grid),
            ModelSpec::KernelSvmTopK { c_grid, k_grid, .. } => {
                HyperparameterGrid::over_k_and_c(k_grid, c_grid)
            }
        }
    }

    fn reference_grid(&self) -> HyperparameterGrid {
        match self {
            ModelSpec::KernelSvmTopK { k_grid, .. } => HyperparameterGrid::over_k(k_grid),
            _ => HyperparameterGrid::single(),
        }
    }

    /// Check the parameters against a dataset with `n_features` features
    pub fn validate(&self, n_features: usize) -> Result<()> {
        let n_pairs = PairScorer::pair_count(n_features);
        let check_k = |k_grid: &[usize]| -> Result<()> {
            validate_k_grid(k_grid)?;
            match k_grid.iter().max() {
                Some(&k) if k > n_pairs => Err(RankCvError::config(format!(
                    "requested k = {k} pairs but only {n_pairs} pairs exist for {n_features} features"
                ))),
                _ => Ok(()),
            }
        };
        match self {
            ModelSpec::Apmv | ModelSpec::Tsp => check_k(&[1]),
            ModelSpec::Ktsp { k_grid } => check_k(k_grid),
            ModelSpec::KernelSvm { kernel, c_grid } => {
                validate_c_grid(c_grid)?;
                kernel.validate()
            }
            ModelSpec::KernelSvmTopK {
                kernel,
                c_grid,
                k_grid,
            } => {
                validate_c_grid(c_grid)?;
                check_k(k_grid)?;
                kernel.validate()
            }
        }
    }

    /// The standard comparison battery for a configuration
    pub fn default_battery(config: &EvaluationConfig) -> Vec<ModelSpec> {
        let mut kernels = vec![
            KernelSpec::Linear,
            KernelSpec::Polynomial,
            KernelSpec::Gaussian { sigma: None },
            KernelSpec::Kendall,
        ];
        if let Some(&window) = config.noise_window_grid.first() {
            kernels.push(KernelSpec::StabilizedKendall {
                window,
                draws: None,
            });
        }

        let mut battery = vec![
            ModelSpec::Apmv,
            ModelSpec::Tsp,
            ModelSpec::Ktsp {
                k_grid: config.k_grid.clone(),
            },
        ];
        for kernel in &kernels {
            battery.push(ModelSpec::KernelSvm {
                kernel: kernel.clone(),
                c_grid: config.c_grid.clone(),
            });
        }
        for kernel in kernels {
            battery.push(ModelSpec::KernelSvmTopK {
                kernel,
                c_grid: config.c_grid.clone(),
                k_grid: config.k_grid.clone(),
            });
        }
        battery
    }
}

/// How a dataset is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Cross-validate the training partition, test on a fixed partition
    HeldOut,
    /// Repeated outer k-fold with inner k-fold selection
    Nested,
}

/// Samples of one partition
#[derive(Debug, Clone)]
pub struct Partition {
    pub features: FeatureMatrix,
    pub labels: Vec<f64>,
}

/// Named dataset with its declared evaluation mode
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub mode: EvaluationMode,
    pub train: Partition,
    pub test: Option<Partition>,
}

impl Dataset {
    pub fn nested(name: impl Into<String>, features: FeatureMatrix, labels: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            mode: EvaluationMode::Nested,
            train: Partition { features, labels },
            test: None,
        }
    }

    pub fn held_out(name: impl Into<String>, train: Partition, test: Partition) -> Self {
        Self {
            name: name.into(),
            mode: EvaluationMode::HeldOut,
            train,
            test: Some(test),
        }
    }
}

/// Dataset checked and stacked into one matrix (training rows first)
struct PreparedData {
    name: String,
    mode: EvaluationMode,
    matrix: FeatureMatrix,
    labels: BinaryLabels,
    n_train: usize,
    scorer: PairScorer,
}

fn check_rows(partition: &Partition, which: &str) -> Result<()> {
    if partition.features.n_samples() != partition.labels.len() {
        return Err(RankCvError::mismatch(format!(
            "{which} partition has {} rows but {} labels",
            partition.features.n_samples(),
            partition.labels.len()
        )));
    }
    Ok(())
}

impl PreparedData {
    fn new(dataset: &Dataset) -> Result<Self> {
        let name = dataset.name.as_str();
        check_rows(&dataset.train, "training")?;
        let test = match (dataset.mode, &dataset.test) {
            (EvaluationMode::HeldOut, None) => {
                return Err(RankCvError::mismatch(format!(
                    "dataset '{name}' is declared held-out but has no test partition"
                )))
            }
            (EvaluationMode::HeldOut, Some(t)) if t.labels.is_empty() => {
                return Err(RankCvError::mismatch(format!(
                    "dataset '{name}' is declared held-out but its test partition is empty"
                )))
            }
            (EvaluationMode::Nested, Some(_)) => {
                return Err(RankCvError::mismatch(format!(
                    "dataset '{name}' is declared nested but carries a test partition"
                )))
            }
            (_, test) => test.as_ref(),
        };
        if dataset.train.labels.is_empty() {
            return Err(RankCvError::EmptyDataset);
        }

        let train_labels = BinaryLabels::new(&dataset.train.labels)?;
        let n_train = train_labels.len();
        let (matrix, labels) = match test {
            Some(t) => {
                check_rows(t, "test")?;
                let test_labels = BinaryLabels::with_classes(&t.labels, train_labels.classes())
                    .map_err(|e| RankCvError::mismatch(format!("dataset '{name}': {e}")))?;
                (
                    dataset.train.features.vstack(&t.features)?,
                    train_labels.concat(&test_labels)?,
                )
            }
            None => (dataset.train.features.clone(), train_labels),
        };

        Ok(Self {
            name: dataset.name.clone(),
            mode: dataset.mode,
            scorer: PairScorer::new(&matrix),
            matrix,
            labels,
            n_train,
        })
    }
}

/// One outer split with its own seed and the inner splits of its training rows
#[derive(Debug, Clone)]
struct OuterFold {
    repeat: usize,
    fold: usize,
    split: FoldSplit,
    seed: u64,
    inner: Vec<FoldSplit>,
}

/// Pair rankings of one outer fold's splits, keyed by training rows
///
/// Every model of the fold reads the same ranking of a split.
#[derive(Default)]
struct PairRankings {
    ranked: HashMap<Vec<usize>, Option<Arc<Vec<GenePair>>>>,
    computed: usize,
}

impl PairRankings {
    fn get(
        &mut self,
        data: &PreparedData,
        split: &FoldSplit,
    ) -> Result<Option<Arc<Vec<GenePair>>>> {
        if let Some(ranked) = self.ranked.get(&split.train) {
            return Ok(ranked.clone());
        }
        let ranked = ranked_pairs(data, split)?.map(Arc::new);
        self.computed += 1;
        self.ranked.insert(split.train.clone(), ranked.clone());
        Ok(ranked)
    }
}

/// State shared by all models evaluated on one outer fold
struct FoldWorkspace {
    kernels: KernelCache,
    rankings: PairRankings,
}

impl FoldWorkspace {
    fn new() -> Self {
        Self {
            kernels: KernelCache::new(CACHE_CAPACITY),
            rankings: PairRankings::default(),
        }
    }
}

/// Full-feature kernels of one dataset, shared by all splits
#[derive(Default)]
struct KernelSet {
    kernels: Vec<(KernelSpec, Arc<PreparedKernel>)>,
}

impl KernelSet {
    fn get(&self, spec: &KernelSpec) -> Result<&PreparedKernel> {
        self.kernels
            .iter()
            .find(|(s, _)| s == spec)
            .map(|(_, k)| k.as_ref())
            .ok_or_else(|| RankCvError::config(format!("{spec} kernel was not prepared")))
    }

    fn contains(&self, spec: &KernelSpec) -> bool {
        self.kernels.iter().any(|(s, _)| s == spec)
    }
}

/// Accuracies of one split over a model's grids
#[derive(Default)]
struct SplitScores {
    primary: Vec<f64>,
    reference: Option<Vec<f64>>,
    warnings: Vec<KernelWarning>,
}

/// Inner and held-out accuracies of one model on one outer fold
struct ModelFold {
    inner: Vec<f64>,
    held_out: Vec<f64>,
    reference: Option<(Vec<f64>, Vec<f64>)>,
    warnings: Vec<KernelWarning>,
}

/// Results and failures of one dataset
#[derive(Debug, Clone, Default)]
pub struct DatasetOutcome {
    pub results: Vec<EvaluationResult>,
    pub failures: Vec<UnitFailure>,
}

/// Nested cross-validation controller
pub struct CvEngine<C: KernelClassifier = SmoClassifier> {
    config: EvaluationConfig,
    classifier: C,
    reference: KernelFisher,
}

impl CvEngine<SmoClassifier> {
    /// Engine with the SMO kernel SVM as training service
    pub fn new(config: EvaluationConfig) -> Result<Self> {
        let classifier = SmoClassifier::new(config.solver.clone());
        Self::with_classifier(config, classifier)
    }
}

impl<C: KernelClassifier> CvEngine<C> {
    /// Engine with a custom training service
    pub fn with_classifier(config: EvaluationConfig, classifier: C) -> Result<Self> {
        config.validate()?;
        let reference = KernelFisher::new(config.kfd_regularization)?;
        Ok(Self {
            config,
            classifier,
            reference,
        })
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate `models` on one dataset
    ///
    /// Dataset-level problems (mode/partition mismatch, bad labels, fold
    /// counts the data cannot support) fail the whole call before any
    /// kernel is built. A model with invalid parameters, or a fold that
    /// fails, is reported in the outcome's failures while the other
    /// models and folds proceed.
    pub fn evaluate(
        &self,
        dataset: &Dataset,
        models: &[ModelSpec],
        seed: u64,
    ) -> Result<DatasetOutcome> {
        let data = PreparedData::new(dataset)?;
        let outer = self.outer_folds(&data, seed)?;
        info!(
            "Evaluating {} models on '{}' ({} samples, {} features, {} outer folds)",
            models.len(),
            data.name,
            data.matrix.n_samples(),
            data.matrix.n_features(),
            outer.len()
        );

        let mut outcome = DatasetOutcome::default();
        let mut valid = Vec::with_capacity(models.len());
        for model in models {
            match model.validate(data.matrix.n_features()) {
                Ok(()) => valid.push(model),
                Err(e) => {
                    error!("{} on '{}': {}", model.name(), data.name, e);
                    outcome.failures.push(UnitFailure {
                        dataset: data.name.clone(),
                        model: Some(model.name()),
                        fold: None,
                        message: e.to_string(),
                    });
                }
            }
        }

        let builder = KernelMatrixBuilder::new(derive_seed(seed, &[KERNEL_STREAM]));
        let mut kernels = KernelSet::default();
        let mut runnable = Vec::with_capacity(valid.len());
        for model in valid {
            if let ModelSpec::KernelSvm { kernel, .. } = model {
                if !kernels.contains(kernel) {
                    match builder.prepare(&data.matrix, kernel, None) {
                        Ok(prepared) => {
                            kernels.kernels.push((kernel.clone(), Arc::new(prepared)))
                        }
                        Err(e) => {
                            error!("{kernel} kernel on '{}': {}", data.name, e);
                            outcome.failures.push(UnitFailure {
                                dataset: data.name.clone(),
                                model: Some(model.name()),
                                fold: None,
                                message: e.to_string(),
                            });
                            continue;
                        }
                    }
                }
            }
            runnable.push(model);
        }

        let evaluated = self.run_models(&data, &runnable, &kernels, &builder, &outer);
        outcome.results.extend(evaluated.results);
        outcome.failures.extend(evaluated.failures);
        Ok(outcome)
    }

    fn outer_folds(&self, data: &PreparedData, seed: u64) -> Result<Vec<OuterFold>> {
        let training: Vec<usize> = (0..data.n_train).collect();
        match data.mode {
            EvaluationMode::HeldOut => {
                if self.config.inner_folds > data.n_train {
                    return Err(RankCvError::config(format!(
                        "{} inner folds for {} training samples",
                        self.config.inner_folds, data.n_train
                    )));
                }
                let split = holdout_split(data.n_train, data.matrix.n_samples());
                Ok(vec![self.outer_fold(data, 0, 0, split, seed)?])
            }
            EvaluationMode::Nested => {
                let smallest = min_class_count(&training, &data.labels);
                if self.config.outer_folds > smallest {
                    return Err(RankCvError::config(format!(
                        "{} outer folds but the smallest class of '{}' has {} samples",
                        self.config.outer_folds, data.name, smallest
                    )));
                }
                let mut folds =
                    Vec::with_capacity(self.config.outer_repeats * self.config.outer_folds);
                for repeat in 0..self.config.outer_repeats {
                    let splits = stratified_folds(
                        &training,
                        &data.labels,
                        self.config.outer_folds,
                        derive_seed(seed, &[repeat as u64]),
                    )?;
                    for (fold, split) in splits.into_iter().enumerate() {
                        folds.push(self.outer_fold(data, repeat, fold, split, seed)?);
                    }
                }
                Ok(folds)
            }
        }
    }

    /// Outer split with its seed and the inner splits of its training rows
    fn outer_fold(
        &self,
        data: &PreparedData,
        repeat: usize,
        fold: usize,
        split: FoldSplit,
        seed: u64,
    ) -> Result<OuterFold> {
        let seed = derive_seed(seed, &[repeat as u64, fold as u64]);
        let inner = stratified_folds(
            &split.train,
            &data.labels,
            self.config.inner_folds,
            derive_seed(seed, &[INNER_STREAM]),
        )?;
        Ok(OuterFold {
            repeat,
            fold,
            split,
            seed,
            inner,
        })
    }

    /// Evaluate prepared models over all outer folds and assemble results
    fn run_models(
        &self,
        data: &PreparedData,
        models: &[&ModelSpec],
        kernels: &KernelSet,
        builder: &KernelMatrixBuilder,
        outer: &[OuterFold],
    ) -> DatasetOutcome {
        let per_fold: Vec<Vec<Result<ModelFold>>> = outer
            .par_iter()
            .map(|fold| {
                debug!(
                    "'{}' repeat {} fold {}: {} train / {} test",
                    data.name,
                    fold.repeat,
                    fold.fold,
                    fold.split.train.len(),
                    fold.split.test.len()
                );
                let mut workspace = FoldWorkspace::new();
                let results: Vec<Result<ModelFold>> = models
                    .iter()
                    .map(|model| {
                        self.evaluate_outer_fold(data, model, kernels, builder, &mut workspace, fold)
                    })
                    .collect();
                let stats = workspace.kernels.stats();
                debug!(
                    "'{}' repeat {} fold {}: kernel cache {} hits, {} misses ({:.0}% hit rate), {} pair rankings",
                    data.name,
                    fold.repeat,
                    fold.fold,
                    stats.hits,
                    stats.misses,
                    workspace.kernels.hit_rate() * 100.0,
                    workspace.rankings.computed
                );
                results
            })
            .collect();

        let mut outcome = DatasetOutcome::default();
        for (m, model) in models.iter().enumerate() {
            let grid = model.grid();
            let reference_grid = model.reference_grid();
            let mut table = AccuracyTable::new(outer.len(), grid.len());
            let mut reference_table = AccuracyTable::new(outer.len(), reference_grid.len());
            let mut warnings: Vec<String> = Vec::new();
            let mut failed = false;

            for (f, fold_results) in per_fold.iter().enumerate() {
                match &fold_results[m] {
                    Ok(result) => {
                        fill_row(&mut table, f, &result.inner, &result.held_out);
                        if let Some((inner, held_out)) = &result.reference {
                            fill_row(&mut reference_table, f, inner, held_out);
                        }
                        for w in &result.warnings {
                            let text = w.to_string();
                            if !warnings.contains(&text) {
                                warnings.push(text);
                            }
                        }
                    }
                    Err(e) => {
                        failed = true;
                        error!("{} on '{}' fold {}: {}", model.name(), data.name, f, e);
                        outcome.failures.push(UnitFailure {
                            dataset: data.name.clone(),
                            model: Some(model.name()),
                            fold: Some(f),
                            message: e.to_string(),
                        });
                    }
                }
            }
            for w in &warnings {
                warn!("{} on '{}' is degenerate: {}", model.name(), data.name, w);
            }

            let inconclusive = failed || !warnings.is_empty();
            outcome.results.push(assemble(
                &data.name,
                model.name(),
                grid,
                table,
                warnings.clone(),
                inconclusive,
            ));
            if let Some(name) = model.reference_name() {
                outcome.results.push(assemble(
                    &data.name,
                    name,
                    reference_grid,
                    reference_table,
                    warnings,
                    inconclusive,
                ));
            }
        }
        outcome
    }

    fn evaluate_outer_fold(
        &self,
        data: &PreparedData,
        model: &ModelSpec,
        kernels: &KernelSet,
        builder: &KernelMatrixBuilder,
        workspace: &mut FoldWorkspace,
        outer: &OuterFold,
    ) -> Result<ModelFold> {
        let mut inner: Option<SplitScores> = None;
        for split in &outer.inner {
            let scores = self.score_split(data, model, kernels, builder, workspace, split)?;
            inner = Some(match inner {
                None => scores,
                Some(mut total) => {
                    add_into(&mut total.primary, &scores.primary);
                    if let (Some(t), Some(s)) =
                        (total.reference.as_mut(), scores.reference.as_ref())
                    {
                        add_into(t, s);
                    }
                    total.warnings.extend(scores.warnings);
                    total
                }
            });
        }
        let mut inner = inner.unwrap_or_default();
        let folds = outer.inner.len() as f64;
        inner.primary.iter_mut().for_each(|v| *v /= folds);
        if let Some(r) = inner.reference.as_mut() {
            r.iter_mut().for_each(|v| *v /= folds);
        }

        let held = self.score_split(data, model, kernels, builder, workspace, &outer.split)?;
        let mut warnings = inner.warnings;
        warnings.extend(held.warnings);
        warnings.dedup();

        Ok(ModelFold {
            inner: inner.primary,
            held_out: held.primary,
            reference: inner.reference.zip(held.reference),
            warnings,
        })
    }

    /// Train on `split.train` and score `split.test` at every grid point
    fn score_split(
        &self,
        data: &PreparedData,
        model: &ModelSpec,
        kernels: &KernelSet,
        builder: &KernelMatrixBuilder,
        workspace: &mut FoldWorkspace,
        split: &FoldSplit,
    ) -> Result<SplitScores> {
        let ranked = match model {
            ModelSpec::KernelSvm { .. } => None,
            _ => workspace.rankings.get(data, split)?,
        };
        let single_class = match model {
            ModelSpec::KernelSvm { .. } => false,
            _ => ranked.is_none(),
        };
        let constant = || only_class_accuracy(data, split);

        let scores = match model {
            ModelSpec::Apmv | ModelSpec::Tsp | ModelSpec::Ktsp { .. } if single_class => {
                SplitScores {
                    primary: vec![constant(); model.grid().len()],
                    ..Default::default()
                }
            }
            ModelSpec::Apmv => SplitScores {
                primary: vec![vote_accuracy(data, split, all_pairs(&ranked))?],
                ..Default::default()
            },
            ModelSpec::Tsp => SplitScores {
                primary: vec![vote_accuracy(data, split, top_k(all_pairs(&ranked), 1)?)?],
                ..Default::default()
            },
            ModelSpec::Ktsp { k_grid } => SplitScores {
                primary: k_grid
                    .iter()
                    .map(|&k| vote_accuracy(data, split, top_k(all_pairs(&ranked), k)?))
                    .collect::<Result<Vec<_>>>()?,
                ..Default::default()
            },
            ModelSpec::KernelSvm { kernel, c_grid } => {
                let split_kernel = kernels.get(kernel)?.split(split);
                self.kernel_scores(data, split, &split_kernel, c_grid)?
            }
            ModelSpec::KernelSvmTopK { k_grid, c_grid, .. } if single_class => SplitScores {
                primary: vec![constant(); k_grid.len() * c_grid.len()],
                reference: Some(vec![constant(); k_grid.len()]),
                warnings: Vec::new(),
            },
            ModelSpec::KernelSvmTopK {
                kernel,
                c_grid,
                k_grid,
            } => {
                let mut scores = SplitScores {
                    primary: Vec::with_capacity(k_grid.len() * c_grid.len()),
                    reference: Some(Vec::with_capacity(k_grid.len())),
                    warnings: Vec::new(),
                };
                for &k in k_grid {
                    let features = pair_features(top_k(all_pairs(&ranked), k)?);
                    let key = KernelKey::new(kernel.to_string(), Some(&features), builder.seed());
                    let prepared = workspace.kernels.get_or_build(key, || {
                        builder.prepare(&data.matrix, kernel, Some(&features))
                    })?;
                    let split_kernel = prepared.split(split);
                    let at_k = self.kernel_scores(data, split, &split_kernel, c_grid)?;
                    scores.primary.extend(at_k.primary);
                    if let (Some(all), Some(r)) = (scores.reference.as_mut(), at_k.reference) {
                        all.extend(r);
                    }
                    scores.warnings.extend(at_k.warnings);
                }
                scores
            }
        };
        Ok(scores)
    }

    /// SVM accuracy per C plus the reference discriminant on one split kernel
    fn kernel_scores(
        &self,
        data: &PreparedData,
        split: &FoldSplit,
        split_kernel: &SplitKernel,
        c_grid: &[f64],
    ) -> Result<SplitScores> {
        let y = data.labels.signed(&split.train);
        let truth = data.labels.signed(&split.test);
        let primary = c_grid
            .iter()
            .map(|&c| {
                self.classifier
                    .train_predict(&split_kernel.train, &y, &split_kernel.test, c)
                    .map(|predicted| accuracy(&predicted, &truth))
            })
            .collect::<Result<Vec<_>>>()?;

        let reference = match self
            .reference
            .train_predict(&split_kernel.train, &y, &split_kernel.test, 0.0)
        {
            Ok(predicted) => accuracy(&predicted, &truth),
            Err(e) => {
                warn!("Kernel Fisher Discriminant failed: {e}");
                f64::NAN
            }
        };

        Ok(SplitScores {
            primary,
            reference: Some(vec![reference]),
            warnings: split_kernel.warnings().to_vec(),
        })
    }

    /// Accuracy of an SVM on a fixed kernel, cross-validated like `evaluate`
    fn kernel_accuracy(
        &self,
        data: &PreparedData,
        kernel: KernelSpec,
        prepared: PreparedKernel,
        builder: &KernelMatrixBuilder,
        outer: &[OuterFold],
    ) -> Result<f64> {
        let model = ModelSpec::KernelSvm {
            kernel: kernel.clone(),
            c_grid: self.config.c_grid.clone(),
        };
        let kernels = KernelSet {
            kernels: vec![(kernel, Arc::new(prepared))],
        };
        let outcome = self.run_models(data, &[&model], &kernels, builder, outer);
        if let Some(failure) = outcome.failures.first() {
            return Err(RankCvError::Optimization(failure.message.clone()));
        }
        outcome
            .results
            .first()
            .map(|r| r.accuracy())
            .ok_or_else(|| RankCvError::Optimization("no result was produced".to_string()))
    }

    /// Accuracy and deviation from the exact kernel against the draw count D
    ///
    /// The window is held at `window`; D runs over `mc_draw_counts`, and each
    /// estimate extends the previous one instead of starting over.
    pub fn draw_count_curve(
        &self,
        dataset: &Dataset,
        window: f64,
        seed: u64,
    ) -> Result<Vec<ConvergencePoint>> {
        let data = PreparedData::new(dataset)?;
        let outer = self.outer_folds(&data, seed)?;
        let builder = KernelMatrixBuilder::new(derive_seed(seed, &[KERNEL_STREAM]));
        let approximator = KernelApproximator::new(window, builder.seed())?;
        let exact = approximator.exact(&data.matrix);

        let sweep = approximator.draw_count_sweep(&data.matrix, &self.config.mc_draw_counts)?;
        let mut curve = Vec::with_capacity(sweep.len());
        for (draws, kernel) in sweep {
            let deviation = kernel.max_abs_diff(&exact)?;
            let spec = KernelSpec::StabilizedKendall {
                window,
                draws: Some(draws),
            };
            let accuracy =
                self.kernel_accuracy(&data, spec, PreparedKernel::Fixed(kernel), &builder, &outer)?;
            info!(
                "'{}' a={window} D={draws}: accuracy {accuracy:.4}, deviation {deviation:.4}",
                data.name
            );
            curve.push(ConvergencePoint {
                draws: Some(draws),
                window,
                accuracy,
                deviation,
            });
        }
        Ok(curve)
    }

    /// Accuracy against the window a, at a fixed draw count (`None` = exact)
    pub fn window_curve(
        &self,
        dataset: &Dataset,
        draws: Option<usize>,
        seed: u64,
    ) -> Result<Vec<ConvergencePoint>> {
        let data = PreparedData::new(dataset)?;
        let outer = self.outer_folds(&data, seed)?;
        let builder = KernelMatrixBuilder::new(derive_seed(seed, &[KERNEL_STREAM]));

        let sweep = KernelApproximator::window_sweep(
            &data.matrix,
            &self.config.noise_window_grid,
            draws,
            builder.seed(),
        )?;
        let mut curve = Vec::with_capacity(sweep.len());
        for (window, kernel) in sweep {
            let deviation = match draws {
                Some(_) => {
                    let exact = KernelApproximator::new(window, builder.seed())?.exact(&data.matrix);
                    kernel.max_abs_diff(&exact)?
                }
                None => 0.0,
            };
            let spec = KernelSpec::StabilizedKendall { window, draws };
            let accuracy =
                self.kernel_accuracy(&data, spec, PreparedKernel::Fixed(kernel), &builder, &outer)?;
            info!("'{}' a={window}: accuracy {accuracy:.4}", data.name);
            curve.push(ConvergencePoint {
                draws,
                window,
                accuracy,
                deviation,
            });
        }
        Ok(curve)
    }
}

/// Pairs ranked on the training rows, `None` when only one class is present
fn ranked_pairs(data: &PreparedData, split: &FoldSplit) -> Result<Option<Vec<GenePair>>> {
    let (first, second) = data.labels.counts(&split.train);
    if first == 0 || second == 0 {
        return Ok(None);
    }
    data.scorer.score(&data.labels, &split.train).map(Some)
}

fn all_pairs(ranked: &Option<Arc<Vec<GenePair>>>) -> &[GenePair] {
    match ranked {
        Some(pairs) => pairs.as_slice(),
        None => &[],
    }
}

/// Accuracy of predicting the class the training rows all share
fn only_class_accuracy(data: &PreparedData, split: &FoldSplit) -> f64 {
    let positive = split
        .train
        .first()
        .map_or(false, |&s| data.labels.is_positive(s));
    let correct = split
        .test
        .iter()
        .filter(|&&s| data.labels.is_positive(s) == positive)
        .count();
    if split.test.is_empty() {
        0.0
    } else {
        correct as f64 / split.test.len() as f64
    }
}

fn vote_accuracy(data: &PreparedData, split: &FoldSplit, pairs: &[GenePair]) -> Result<f64> {
    let predicted: Vec<f64> = PairVoteClassifier::new(pairs)?
        .predict(&data.matrix, &split.test)
        .into_iter()
        .map(|p| if p { 1.0 } else { -1.0 })
        .collect();
    Ok(accuracy(&predicted, &data.labels.signed(&split.test)))
}

fn add_into(total: &mut [f64], values: &[f64]) {
    for (t, v) in total.iter_mut().zip(values) {
        *t += v;
    }
}

fn fill_row(table: &mut AccuracyTable, fold: usize, inner: &[f64], held_out: &[f64]) {
    for (g, (&i, &h)) in inner.iter().zip(held_out).enumerate() {
        table.set(fold, g, Metric::InnerCv, i);
        table.set(fold, g, Metric::HeldOut, h);
    }
}

fn assemble(
    dataset: &str,
    model: String,
    grid: HyperparameterGrid,
    table: AccuracyTable,
    warnings: Vec<String>,
    inconclusive: bool,
) -> EvaluationResult {
    let selected: Vec<usize> = (0..table.folds())
        .map(|f| select_best(&table.fold_row(f, Metric::InnerCv)).unwrap_or(0))
        .collect();
    let fold_accuracy = selected
        .iter()
        .enumerate()
        .map(|(f, &s)| table.get(f, s, Metric::HeldOut))
        .collect();
    EvaluationResult {
        dataset: dataset.to_string(),
        model,
        grid,
        table,
        selected,
        fold_accuracy,
        warnings,
        inconclusive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two classes with opposite orderings of the first features plus noise features
    fn toy(n_per_class: usize, n_features: usize) -> (FeatureMatrix, Vec<f64>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for s in 0..2 * n_per_class {
            let positive = s >= n_per_class;
            let row: Vec<f64> = (0..n_features)
                .map(|f| {
                    let jitter = ((s * 7 + f * 13) % 11) as f64 / 11.0;
                    match (f, positive) {
                        (0, false) | (1, true) => 5.0 + jitter,
                        (0, true) | (1, false) => 1.0 + jitter,
                        _ => 2.0 + 2.0 * jitter,
                    }
                })
                .collect();
            rows.push(row);
            labels.push(if positive { 1.0 } else { 0.0 });
        }
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    fn small_config() -> EvaluationConfig {
        EvaluationConfig::default()
            .with_folds(3, 3)
            .with_outer_repeats(2)
            .with_c_grid(vec![0.1, 10.0])
            .with_k_grid(vec![1, 3])
            .with_seed(5)
    }

    #[test]
    fn test_model_names_and_grids() {
        let svm = ModelSpec::KernelSvmTopK {
            kernel: KernelSpec::Kendall,
            c_grid: vec![1.0, 10.0],
            k_grid: vec![1, 2, 3],
        };
        assert_eq!(svm.name(), "SVM-kendall-topk");
        assert_eq!(svm.reference_name().as_deref(), Some("KFD-kendall-topk"));
        assert_eq!(svm.grid().len(), 6);
        assert_eq!(svm.reference_grid().len(), 3);
        assert_eq!(ModelSpec::Tsp.reference_name(), None);
    }

    #[test]
    fn test_k_larger_than_pair_count_is_rejected() {
        // 10 features give 45 pairs
        let ktsp = ModelSpec::Ktsp { k_grid: vec![50] };
        assert!(matches!(ktsp.validate(10), Err(RankCvError::Config(_))));
        assert!(ModelSpec::Ktsp { k_grid: vec![45] }.validate(10).is_ok());
    }

    #[test]
    fn test_default_battery() {
        let battery = ModelSpec::default_battery(&EvaluationConfig::default());
        assert_eq!(battery.len(), 3 + 5 + 5);
        assert!(battery.iter().any(|m| m.name() == "SVM-kendall"));
        assert!(battery.iter().any(|m| m.name() == "SVM-kendall-stab(a=0.1)-topk"));
    }

    #[test]
    fn test_model_spec_serde() {
        let json = r#"{"model":"kernel_svm","kernel":{"kernel":"kendall"},"c_grid":[1.0]}"#;
        let model: ModelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            model,
            ModelSpec::KernelSvm {
                kernel: KernelSpec::Kendall,
                c_grid: vec![1.0]
            }
        );
    }

    #[test]
    fn test_held_out_mode_requires_test_rows() {
        let (x, y) = toy(6, 4);
        let empty = Partition {
            features: FeatureMatrix::new(0, 4, vec![]).unwrap(),
            labels: vec![],
        };
        let train = Partition {
            features: x.clone(),
            labels: y.clone(),
        };
        let dataset = Dataset::held_out("toy", train, empty);
        let engine = CvEngine::new(small_config()).unwrap();
        assert!(matches!(
            engine.evaluate(&dataset, &[ModelSpec::Tsp], 0),
            Err(RankCvError::DataMismatch(_))
        ));

        let mut missing = Dataset::nested("toy", x.clone(), y.clone());
        missing.mode = EvaluationMode::HeldOut;
        assert!(matches!(
            engine.evaluate(&missing, &[ModelSpec::Tsp], 0),
            Err(RankCvError::DataMismatch(_))
        ));

        let mut extra = Dataset::held_out(
            "toy",
            Partition {
                features: x.clone(),
                labels: y.clone(),
            },
            Partition {
                features: x,
                labels: y,
            },
        );
        extra.mode = EvaluationMode::Nested;
        assert!(matches!(
            engine.evaluate(&extra, &[ModelSpec::Tsp], 0),
            Err(RankCvError::DataMismatch(_))
        ));
    }

    #[test]
    fn test_nested_mode_shapes_and_accuracy() {
        let (x, y) = toy(9, 5);
        let dataset = Dataset::nested("toy", x, y);
        let models = vec![
            ModelSpec::Tsp,
            ModelSpec::Ktsp { k_grid: vec![1, 3] },
            ModelSpec::KernelSvm {
                kernel: KernelSpec::Kendall,
                c_grid: vec![0.1, 10.0],
            },
        ];
        let outcome = CvEngine::new(small_config())
            .unwrap()
            .evaluate(&dataset, &models, 1)
            .unwrap();
        assert!(outcome.failures.is_empty());
        // Tsp, kTSP, SVM-kendall, KFD-kendall
        assert_eq!(outcome.results.len(), 4);

        for result in &outcome.results {
            assert_eq!(result.table.folds(), 6);
            assert_eq!(result.selected.len(), 6);
            assert_eq!(result.table.grid_len(), result.grid.len());
            for f in 0..6 {
                for g in 0..result.grid.len() {
                    let inner = result.table.get(f, g, Metric::InnerCv);
                    assert!((0.0..=1.0).contains(&inner));
                }
            }
        }
        let tsp = &outcome.results[0];
        assert_eq!(tsp.model, "TSP");
        assert_eq!(tsp.accuracy(), 1.0);
        let svm = outcome.results.iter().find(|r| r.model == "SVM-kendall").unwrap();
        assert!(svm.accuracy() > 0.8);
    }

    #[test]
    fn test_invalid_model_does_not_stop_others() {
        let (x, y) = toy(6, 4);
        let dataset = Dataset::nested("toy", x, y);
        let models = vec![ModelSpec::Ktsp { k_grid: vec![50] }, ModelSpec::Apmv];
        let outcome = CvEngine::new(small_config())
            .unwrap()
            .evaluate(&dataset, &models, 1)
            .unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].model.as_deref(), Some("kTSP"));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].model, "APMV");
    }

    #[test]
    fn test_outer_folds_exceeding_class_size() {
        let (x, y) = toy(2, 4);
        let dataset = Dataset::nested("toy", x, y);
        let result = CvEngine::new(small_config())
            .unwrap()
            .evaluate(&dataset, &[ModelSpec::Tsp], 1);
        assert!(matches!(result, Err(RankCvError::Config(_))));
    }

    #[test]
    fn test_top_k_svm_grid_is_k_major() {
        let (x, y) = toy(6, 4);
        let dataset = Dataset::nested("toy", x, y);
        let model = ModelSpec::KernelSvmTopK {
            kernel: KernelSpec::Linear,
            c_grid: vec![0.1, 10.0],
            k_grid: vec![1, 2],
        };
        let outcome = CvEngine::new(small_config())
            .unwrap()
            .evaluate(&dataset, &[model], 2)
            .unwrap();
        assert!(outcome.failures.is_empty());
        let svm = &outcome.results[0];
        let kfd = &outcome.results[1];
        assert_eq!(svm.grid.len(), 4);
        assert_eq!(svm.grid.get(1).unwrap().k, Some(1));
        assert_eq!(svm.grid.get(2).unwrap().k, Some(2));
        assert_eq!(kfd.model, "KFD-linear-topk");
        assert_eq!(kfd.grid.len(), 2);
    }

    #[test]
    fn test_inner_splits_stay_inside_outer_training() {
        let (x, y) = toy(10, 3);
        let data = PreparedData::new(&Dataset::nested("toy", x, y)).unwrap();
        let engine = CvEngine::new(small_config().with_folds(2, 5)).unwrap();
        let outer = engine.outer_folds(&data, 3).unwrap();
        assert_eq!(outer.len(), 2 * 5);
        for fold in &outer {
            assert!(fold.split.is_disjoint());
            assert_eq!(fold.inner.len(), 2);
            for inner in &fold.inner {
                for s in inner.train.iter().chain(&inner.test) {
                    assert!(fold.split.train.contains(s));
                    assert!(!fold.split.test.contains(s));
                }
            }
        }

        let (x, y) = toy(6, 3);
        let (tx, ty) = toy(2, 3);
        let dataset = Dataset::held_out(
            "toy",
            Partition {
                features: x,
                labels: y,
            },
            Partition {
                features: tx,
                labels: ty,
            },
        );
        let data = PreparedData::new(&dataset).unwrap();
        let outer = engine.outer_folds(&data, 3).unwrap();
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].split.test, (12..16).collect::<Vec<_>>());
        for inner in &outer[0].inner {
            assert!(inner.train.iter().chain(&inner.test).all(|&s| s < 12));
        }
    }

    #[test]
    fn test_pair_ranking_is_shared_across_models() {
        let (x, y) = toy(6, 4);
        let data = PreparedData::new(&Dataset::nested("toy", x, y)).unwrap();
        let engine = CvEngine::new(small_config()).unwrap();
        let outer = engine.outer_folds(&data, 4).unwrap();
        let fold = &outer[0];
        let builder = KernelMatrixBuilder::new(0);
        let kernels = KernelSet::default();
        let models = [
            ModelSpec::Apmv,
            ModelSpec::Tsp,
            ModelSpec::Ktsp { k_grid: vec![1, 3] },
            ModelSpec::KernelSvmTopK {
                kernel: KernelSpec::Linear,
                c_grid: vec![1.0],
                k_grid: vec![1, 2],
            },
        ];

        let mut workspace = FoldWorkspace::new();
        for model in &models {
            engine
                .evaluate_outer_fold(&data, model, &kernels, &builder, &mut workspace, fold)
                .unwrap();
        }
        // one ranking per inner split plus the outer split
        let splits = fold.inner.len() + 1;
        assert_eq!(workspace.rankings.computed, splits);

        let first = workspace.rankings.get(&data, &fold.split).unwrap().unwrap();
        let again = workspace.rankings.get(&data, &fold.split).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(workspace.rankings.computed, splits);
    }
}
