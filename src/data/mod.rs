//! Data loading
//!
//! Expression matrices are read from dense CSV files, one sample per row
//! with the class label in the last column.

pub mod csv;

pub use self::csv::*;

use crate::core::Result;
use crate::cv::Partition;
use std::path::Path;

/// Read a CSV file into a partition usable by the engine
pub fn load_partition<P: AsRef<Path>>(path: P) -> Result<Partition> {
    let dataset = CsvDataset::from_file(path)?;
    Ok(Partition {
        features: dataset.features,
        labels: dataset.labels,
    })
}
