//! Nested cross-validation: folds, grids, the engine and the run driver

pub mod engine;
pub mod folds;
pub mod grid;
pub mod results;
pub mod runner;

pub use self::engine::*;
pub use self::folds::*;
pub use self::grid::*;
pub use self::results::*;
pub use self::runner::*;
