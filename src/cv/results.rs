//! Accuracy tables, per-model results and the run report

use crate::cv::grid::{GridPoint, HyperparameterGrid};
use crate::utils::stats::mean;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which accuracy a table cell holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Mean accuracy over the inner cross-validation folds
    InnerCv,
    /// Accuracy on the outer fold's (or fixed partition's) test samples
    HeldOut,
}

impl Metric {
    fn offset(self) -> usize {
        match self {
            Metric::InnerCv => 0,
            Metric::HeldOut => 1,
        }
    }
}

/// Accuracies indexed by (outer fold, grid point, metric)
///
/// Dimensions are fixed at construction; unset cells are NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyTable {
    folds: usize,
    grid: usize,
    values: Vec<f64>,
}

impl AccuracyTable {
    pub fn new(folds: usize, grid: usize) -> Self {
        Self {
            folds,
            grid,
            values: vec![f64::NAN; folds * grid * 2],
        }
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    pub fn grid_len(&self) -> usize {
        self.grid
    }

    fn position(&self, fold: usize, point: usize, metric: Metric) -> usize {
        (fold * self.grid + point) * 2 + metric.offset()
    }

    pub fn get(&self, fold: usize, point: usize, metric: Metric) -> f64 {
        self.values[self.position(fold, point, metric)]
    }

    pub fn set(&mut self, fold: usize, point: usize, metric: Metric, value: f64) {
        let at = self.position(fold, point, metric);
        self.values[at] = value;
    }

    /// One fold's accuracies over the whole grid
    pub fn fold_row(&self, fold: usize, metric: Metric) -> Vec<f64> {
        (0..self.grid).map(|g| self.get(fold, g, metric)).collect()
    }

    /// Mean over folds for every grid point
    pub fn grid_means(&self, metric: Metric) -> Vec<f64> {
        (0..self.grid)
            .map(|g| {
                let column: Vec<f64> = (0..self.folds).map(|f| self.get(f, g, metric)).collect();
                mean(&column)
            })
            .collect()
    }
}

/// Evaluation of one model on one dataset
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub dataset: String,
    pub model: String,
    pub grid: HyperparameterGrid,
    pub table: AccuracyTable,
    /// Selected grid index per outer fold
    pub selected: Vec<usize>,
    /// Held-out accuracy of the selected configuration per outer fold
    pub fold_accuracy: Vec<f64>,
    pub warnings: Vec<String>,
    /// Set when a degenerate kernel or a failed fold makes the estimate unreliable
    pub inconclusive: bool,
}

impl EvaluationResult {
    /// Mean held-out accuracy of the selected configurations
    pub fn accuracy(&self) -> f64 {
        mean(&self.fold_accuracy)
    }

    pub fn selected_points(&self) -> Vec<GridPoint> {
        self.selected
            .iter()
            .filter_map(|&s| self.grid.get(s).copied())
            .collect()
    }
}

/// A unit of work that did not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub dataset: String,
    pub model: Option<String>,
    pub fold: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Incomplete,
}

/// Point of a Monte-Carlo study
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvergencePoint {
    pub draws: Option<usize>,
    pub window: f64,
    /// Cross-validated accuracy with the kernel at this point
    pub accuracy: f64,
    /// Largest entry-wise distance to the exact kernel at the same window
    pub deviation: f64,
}

/// Everything produced by one run over a set of datasets
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<EvaluationResult>,
    pub failures: Vec<UnitFailure>,
}

impl RunReport {
    pub fn new(results: Vec<EvaluationResult>, failures: Vec<UnitFailure>) -> Self {
        Self {
            generated_at: Utc::now(),
            results,
            failures,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.failures.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Incomplete
        }
    }

    /// Result of `model` on `dataset`
    pub fn find(&self, dataset: &str, model: &str) -> Option<&EvaluationResult> {
        self.results
            .iter()
            .find(|r| r.dataset == dataset && r.model == model)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportJson {
            status: self.status(),
            report: self,
        })
    }
}

#[derive(Serialize)]
struct ReportJson<'a> {
    status: RunStatus,
    #[serde(flatten)]
    report: &'a RunReport,
}
