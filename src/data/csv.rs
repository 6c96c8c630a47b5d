//! Dense CSV dataset loading
//!
//! Supports files where:
//! - Each row is one sample
//! - The last column is the class label
//! - All other columns are feature values (e.g. gene expression)
//! - The first row can be a header (automatically detected)
//! - Lines starting with `#` are comments

use crate::core::{FeatureMatrix, RankCvError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Samples and labels read from a CSV file
#[derive(Debug, Clone)]
pub struct CsvDataset {
    pub features: FeatureMatrix,
    pub labels: Vec<f64>,
    /// Feature names from the header, if one was present
    pub feature_names: Option<Vec<String>>,
}

impl CsvDataset {
    /// Load a dataset from a CSV file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a dataset from a reader, detecting a header row
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Self::from_reader_with_options(reader, true)
    }

    /// Load a dataset from a reader with explicit header option
    pub fn from_reader_with_options<R: BufRead>(
        reader: R,
        auto_detect_header: bool,
    ) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut labels = Vec::new();
        let mut feature_names = None;
        let mut first = true;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if first {
                first = false;
                if auto_detect_header && Self::is_header_line(line) {
                    let names: Vec<String> = line.split(',').map(|f| f.trim().to_string()).collect();
                    feature_names = Some(names[..names.len() - 1].to_vec());
                    continue;
                }
            }

            let (row, label) = Self::parse_data_line(line, number + 1)?;
            if let Some(expected) = rows.first().map(|r| r.len()) {
                if row.len() != expected {
                    return Err(RankCvError::Parse(format!(
                        "line {}: expected {} features, found {}",
                        number + 1,
                        expected,
                        row.len()
                    )));
                }
            }
            rows.push(row);
            labels.push(label);
        }

        if rows.is_empty() {
            return Err(RankCvError::EmptyDataset);
        }
        if let Some(names) = &feature_names {
            if names.len() != rows[0].len() {
                return Err(RankCvError::Parse(format!(
                    "header names {} features but rows have {}",
                    names.len(),
                    rows[0].len()
                )));
            }
        }

        Ok(CsvDataset {
            features: FeatureMatrix::from_rows(&rows)?,
            labels,
            feature_names,
        })
    }

    /// Check if a line appears to be a header
    fn is_header_line(line: &str) -> bool {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 2 {
            return false;
        }

        // Most feature fields non-numeric
        let non_numeric = fields
            .iter()
            .take(fields.len() - 1)
            .filter(|field| field.trim().parse::<f64>().is_err())
            .count();
        non_numeric > (fields.len() - 1) / 2
    }

    /// Parse one data line into feature values and a label
    fn parse_data_line(line: &str, number: usize) -> Result<(Vec<f64>, f64)> {
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() < 2 {
            return Err(RankCvError::Parse(format!(
                "line {number}: too few fields: {line}"
            )));
        }

        let label_str = fields[fields.len() - 1];
        let label = label_str.parse::<f64>().map_err(|_| {
            RankCvError::Parse(format!("line {number}: invalid label: {label_str}"))
        })?;

        let row = fields[..fields.len() - 1]
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                field.parse::<f64>().ok().filter(|v| v.is_finite()).ok_or_else(|| {
                    RankCvError::Parse(format!(
                        "line {number}: invalid feature value at column {}: {field}",
                        idx + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((row, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_csv_basic_parsing() {
        let data = "1.0,2.0,0\n3.0,4.0,1\n5.5,0.0,1\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(dataset.features.n_samples(), 3);
        assert_eq!(dataset.features.n_features(), 2);
        assert_eq!(dataset.features.row(2), &[5.5, 0.0]);
        assert_eq!(dataset.labels, vec![0.0, 1.0, 1.0]);
        assert!(dataset.feature_names.is_none());
    }

    #[test]
    fn test_csv_with_header_and_comments() {
        let data = "# expression data\nTP53,BRCA1,MYC,class\n1.0,2.0,3.0,1\n\n# tumour\n3.0,2.0,1.0,-1\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(dataset.features.n_samples(), 2);
        assert_eq!(
            dataset.feature_names,
            Some(vec!["TP53".to_string(), "BRCA1".to_string(), "MYC".to_string()])
        );
        assert_eq!(dataset.labels, vec![1.0, -1.0]);
    }

    #[test]
    fn test_csv_header_detection_disabled() {
        let data = "a,b,1\n1.0,2.0,0\n";
        let result = CsvDataset::from_reader_with_options(Cursor::new(data), false);
        assert!(matches!(result, Err(RankCvError::Parse(_))));
    }

    #[test]
    fn test_csv_errors() {
        let ragged = "1.0,2.0,0\n3.0,1\n";
        assert!(matches!(
            CsvDataset::from_reader(Cursor::new(ragged)),
            Err(RankCvError::Parse(_))
        ));

        let bad_label = "1.0,2.0,yes\n";
        assert!(matches!(
            CsvDataset::from_reader(Cursor::new(bad_label)),
            Err(RankCvError::Parse(_))
        ));

        let bad_value = "1.0,NaN,0\n";
        assert!(matches!(
            CsvDataset::from_reader(Cursor::new(bad_value)),
            Err(RankCvError::Parse(_))
        ));

        assert!(matches!(
            CsvDataset::from_reader(Cursor::new("# only a comment\n")),
            Err(RankCvError::EmptyDataset)
        ));
    }

    #[test]
    fn test_csv_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "g1,g2,label").unwrap();
        writeln!(file, "0.5,1.5,1").unwrap();
        writeln!(file, "2.5,1.0,2").unwrap();
        let dataset = CsvDataset::from_file(file.path()).unwrap();
        assert_eq!(dataset.features.n_samples(), 2);
        assert_eq!(dataset.labels, vec![1.0, 2.0]);
    }
}
