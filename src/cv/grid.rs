//! Hyperparameter grids and first-maximum selection

use serde::Serialize;
use std::fmt;

/// One candidate configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridPoint {
    /// Number of top-scoring pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    /// SVM regularization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.k, self.c) {
            (Some(k), Some(c)) => write!(f, "k={k}, C={c}"),
            (Some(k), None) => write!(f, "k={k}"),
            (None, Some(c)) => write!(f, "C={c}"),
            (None, None) => f.write_str("-"),
        }
    }
}

/// Ordered candidate configurations; order decides ties
///
/// Two-dimensional grids are flattened k-major (k outer, C inner), so the
/// first maximum is the one with the smallest k, then the smallest C.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HyperparameterGrid {
    points: Vec<GridPoint>,
    c_len: usize,
}

impl HyperparameterGrid {
    /// Grid of a parameter-free model
    pub fn single() -> Self {
        Self {
            points: vec![GridPoint { k: None, c: None }],
            c_len: 1,
        }
    }

    pub fn over_c(c_grid: &[f64]) -> Self {
        Self {
            points: c_grid
                .iter()
                .map(|&c| GridPoint { k: None, c: Some(c) })
                .collect(),
            c_len: c_grid.len(),
        }
    }

    pub fn over_k(k_grid: &[usize]) -> Self {
        Self {
            points: k_grid
                .iter()
                .map(|&k| GridPoint { k: Some(k), c: None })
                .collect(),
            c_len: 1,
        }
    }

    pub fn over_k_and_c(k_grid: &[usize], c_grid: &[f64]) -> Self {
        let points = k_grid
            .iter()
            .flat_map(|&k| {
                c_grid.iter().map(move |&c| GridPoint {
                    k: Some(k),
                    c: Some(c),
                })
            })
            .collect();
        Self {
            points,
            c_len: c_grid.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&GridPoint> {
        self.points.get(index)
    }

    /// Flat index of (k position, C position)
    pub fn index(&self, k_pos: usize, c_pos: usize) -> usize {
        k_pos * self.c_len + c_pos
    }
}

/// Index of the first maximum; NaN never wins
pub fn select_best(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in scores.iter().enumerate() {
        let s = if s.is_nan() { f64::NEG_INFINITY } else { s };
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}
