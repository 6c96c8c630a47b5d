//! Core traits

use crate::core::{KernelBlock, KernelMatrix, Result};

/// Classifier trained from a precomputed kernel matrix
///
/// This is the training service the cross-validation engine calls once
/// per (split, grid point). Labels are ±1; predictions are returned as ±1
/// for every row of `test_rows`.
pub trait KernelClassifier: Send + Sync {
    /// Train on `train` with regularization `c` and predict the test rows
    fn train_predict(
        &self,
        train: &KernelMatrix,
        labels: &[f64],
        test_rows: &KernelBlock,
        c: f64,
    ) -> Result<Vec<f64>>;
}

impl<T: KernelClassifier + ?Sized> KernelClassifier for Box<T> {
    fn train_predict(
        &self,
        train: &KernelMatrix,
        labels: &[f64],
        test_rows: &KernelBlock,
        c: f64,
    ) -> Result<Vec<f64>> {
        (**self).train_predict(train, labels, test_rows, c)
    }
}
