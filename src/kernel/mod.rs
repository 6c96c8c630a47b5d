//! Kernel functions and kernel matrix construction

pub mod builder;
pub mod kendall;
pub mod linear;
pub mod polynomial;
pub mod rbf;
pub mod traits;

pub use self::builder::*;
pub use self::kendall::*;
pub use self::linear::LinearKernel;
pub use self::polynomial::*;
pub use self::rbf::*;
pub use self::traits::*;
