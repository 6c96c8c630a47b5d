//! Polynomial Kernel Implementation
//!
//! The homogeneous polynomial kernel on normalized vectors:
//! K(x, y) = (<x, y> / (||x|| * ||y||))^d
//!
//! With d = 2 this is the square of the normalized linear kernel, which is
//! the configuration used for the kernel battery.

use crate::core::KernelWarning;
use crate::kernel::linear::cosine;
use crate::kernel::Kernel;

/// Homogeneous polynomial kernel over normalized vectors
#[derive(Debug, Clone, Copy)]
pub struct PolynomialKernel {
    /// Degree of the polynomial (default: 2)
    pub degree: u32,
}

impl PolynomialKernel {
    /// Creates a polynomial kernel of the given degree
    ///
    /// # Panics
    /// Panics if degree is zero
    pub fn new(degree: u32) -> Self {
        assert!(degree > 0, "Polynomial degree must be positive");
        Self { degree }
    }

    /// Creates the degree-2 kernel
    pub fn quadratic() -> Self {
        Self::new(2)
    }
}

impl Default for PolynomialKernel {
    fn default() -> Self {
        Self::quadratic()
    }
}

impl Kernel for PolynomialKernel {
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        cosine(x, y).powi(self.degree as i32)
    }

    fn inspect(&self, sample: usize, x: &[f64]) -> Option<KernelWarning> {
        x.iter()
            .all(|&v| v == 0.0)
            .then_some(KernelWarning::ZeroNorm(sample))
    }
}
