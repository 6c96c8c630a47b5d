//! Linear kernel implementation

use crate::core::KernelWarning;
use crate::kernel::Kernel;

/// Normalized linear kernel: K(x, y) = <x, y> / (||x|| * ||y||)
///
/// Normalizing puts every sample on the unit sphere, so K(x, x) = 1 and
/// values lie in [-1, 1]. A zero vector has no direction; its kernel
/// values are 0 and it is reported as degenerate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearKernel;

impl LinearKernel {
    /// Create a new linear kernel
    pub fn new() -> Self {
        Self
    }
}

impl Kernel for LinearKernel {
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        cosine(x, y)
    }

    fn inspect(&self, sample: usize, x: &[f64]) -> Option<KernelWarning> {
        (dot(x, x) == 0.0).then_some(KernelWarning::ZeroNorm(sample))
    }
}

/// Dot product of two dense vectors
pub(crate) fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Cosine similarity, 0 when either vector is zero
pub(crate) fn cosine(x: &[f64], y: &[f64]) -> f64 {
    let norms = (dot(x, x) * dot(y, y)).sqrt();
    if norms == 0.0 {
        0.0
    } else {
        (dot(x, y) / norms).clamp(-1.0, 1.0)
    }
}

/// Squared Euclidean distance between two dense vectors
pub(crate) fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_kernel_basic() {
        let kernel = LinearKernel::new();
        // <(1,0), (1,1)> / (1 * sqrt 2)
        assert_relative_eq!(
            kernel.compute(&[1.0, 0.0], &[1.0, 1.0]),
            1.0 / 2.0_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_linear_kernel_scale_invariant() {
        let kernel = LinearKernel::new();
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 4.0, 6.0];
        assert_relative_eq!(kernel.compute(&x, &y), 1.0, epsilon = 1e-12);
        assert_relative_eq!(kernel.compute(&x, &[-1.0, -2.0, -3.0]), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_kernel_zero_vector() {
        let kernel = LinearKernel::new();
        assert_eq!(kernel.compute(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(
            kernel.inspect(4, &[0.0, 0.0]),
            Some(KernelWarning::ZeroNorm(4))
        );
        assert_eq!(kernel.inspect(4, &[0.0, 1.0]), None);
    }

    #[test]
    fn test_squared_distance() {
        assert_eq!(squared_distance(&[1.0, 3.0], &[2.0, 1.0]), 5.0);
        assert_eq!(squared_distance(&[1.0, 3.0], &[1.0, 3.0]), 0.0);
    }
}
