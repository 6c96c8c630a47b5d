//! Utility functions shared across the crate

/// Summary statistics
pub mod stats {
    /// Arithmetic mean, 0.0 for an empty slice
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Median of the values (average of the two middle ones for even length)
    pub fn median(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Sample standard deviation
    pub fn std_dev(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let m = mean(values);
        let variance =
            values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        variance.sqrt()
    }

    /// Fraction of predictions equal to the truth
    pub fn accuracy(predicted: &[f64], truth: &[f64]) -> f64 {
        if truth.is_empty() {
            return 0.0;
        }
        let correct = predicted
            .iter()
            .zip(truth)
            .filter(|(p, t)| p == t)
            .count();
        correct as f64 / truth.len() as f64
    }
}

/// Deterministic seed derivation
pub mod seed {
    const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

    fn splitmix64(mut z: u64) -> u64 {
        z = z.wrapping_add(GOLDEN);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Derive a sub-seed from a base seed and a unit coordinate path
    ///
    /// The same (base, path) always gives the same seed; different paths
    /// give statistically independent streams.
    pub fn derive_seed(base: u64, path: &[u64]) -> u64 {
        path.iter()
            .fold(splitmix64(base), |acc, &part| splitmix64(acc ^ splitmix64(part)))
    }
}

#[cfg(test)]
mod tests {
    use super::seed::derive_seed;
    use super::stats::*;

    #[test]
    fn test_mean_and_median() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert!((std_dev(&[1.0, 3.0]) - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[1.0, -1.0, 1.0, 1.0], &[1.0, -1.0, -1.0, 1.0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_derive_seed_is_deterministic() {
        assert_eq!(derive_seed(7, &[1, 2]), derive_seed(7, &[1, 2]));
        assert_ne!(derive_seed(7, &[1, 2]), derive_seed(7, &[2, 1]));
        assert_ne!(derive_seed(7, &[1]), derive_seed(8, &[1]));
        assert_ne!(derive_seed(7, &[]), derive_seed(7, &[0]));
    }
}
