//! Kernel trait definition

use crate::core::KernelWarning;

/// Kernel function trait
///
/// A kernel function K(x, y) compares two dense feature vectors. Every
/// family used here is normalized, so the value on the diagonal is fixed
/// by the family rather than computed from the sample.
pub trait Kernel: Send + Sync {
    /// Compute kernel value K(x, y) for two distinct samples
    fn compute(&self, x: &[f64], y: &[f64]) -> f64;

    /// Value of K(x, x) fixed by the kernel family
    fn diagonal(&self) -> f64 {
        1.0
    }

    /// Report a sample whose vector makes this kernel degenerate
    fn inspect(&self, sample: usize, x: &[f64]) -> Option<KernelWarning> {
        let _ = (sample, x);
        None
    }
}
