//! Kernel classifiers trained on precomputed kernel matrices
//!
//! [`SmoClassifier`] solves the C-SVM dual with Sequential Minimal
//! Optimization; [`KernelFisher`] is the parameter-free Kernel Fisher
//! Discriminant evaluated alongside it on the same kernel.

pub mod kfd;
pub mod smo;

pub use self::kfd::*;
pub use self::smo::*;
