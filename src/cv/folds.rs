//! Stratified fold construction

use crate::core::{BinaryLabels, FoldSplit, RankCvError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Split `indices` into `folds` stratified train/test partitions
///
/// Each class is shuffled with a generator seeded from `seed` and dealt
/// round-robin over the folds, continuing the deal from one class to the
/// next so fold sizes differ by at most one. Every returned index set is
/// a subset of `indices`, in ascending order.
pub fn stratified_folds(
    indices: &[usize],
    labels: &BinaryLabels,
    folds: usize,
    seed: u64,
) -> Result<Vec<FoldSplit>> {
    if folds < 2 {
        return Err(RankCvError::config(format!(
            "cross-validation needs at least 2 folds, got {folds}"
        )));
    }
    if folds > indices.len() {
        return Err(RankCvError::config(format!(
            "cannot split {} samples into {folds} folds",
            indices.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment: Vec<Vec<usize>> = vec![Vec::new(); folds];
    let mut next = 0;
    for positive in [false, true] {
        let mut members: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| labels.is_positive(i) == positive)
            .collect();
        members.shuffle(&mut rng);
        for m in members {
            assignment[next % folds].push(m);
            next += 1;
        }
    }

    Ok(assignment
        .into_iter()
        .map(|mut test| {
            test.sort_unstable();
            let mut train: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|i| test.binary_search(i).is_err())
                .collect();
            train.sort_unstable();
            FoldSplit::new(train, test)
        })
        .collect())
}

/// Fixed split of stacked rows: the first `n_train` train, the rest test
pub fn holdout_split(n_train: usize, n_total: usize) -> FoldSplit {
    FoldSplit::new((0..n_train).collect(), (n_train..n_total).collect())
}

/// Smallest class size among `indices`
pub fn min_class_count(indices: &[usize], labels: &BinaryLabels) -> usize {
    let (first, second) = labels.counts(indices);
    first.min(second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> BinaryLabels {
        BinaryLabels::new(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]).unwrap()
    }

    #[test]
    fn test_folds_partition_indices() {
        let all: Vec<usize> = (0..10).collect();
        let folds = stratified_folds(&all, &labels(), 3, 1).unwrap();
        assert_eq!(folds.len(), 3);

        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, all);

        for f in &folds {
            assert!(f.is_disjoint());
            assert_eq!(f.train.len() + f.test.len(), 10);
        }
    }

    #[test]
    fn test_folds_are_stratified_and_balanced() {
        let all: Vec<usize> = (0..10).collect();
        let folds = stratified_folds(&all, &labels(), 2, 4).unwrap();
        for f in &folds {
            assert_eq!(f.test.len(), 5);
            assert_eq!(labels().counts(&f.test), (3, 2));
        }
    }

    #[test]
    fn test_folds_stay_within_subset() {
        let subset = vec![0, 2, 3, 5, 6, 8, 9];
        let folds = stratified_folds(&subset, &labels(), 3, 2).unwrap();
        for f in &folds {
            assert!(f.train.iter().chain(&f.test).all(|i| subset.contains(i)));
        }
    }

    #[test]
    fn test_folds_deterministic_per_seed() {
        let all: Vec<usize> = (0..10).collect();
        let a = stratified_folds(&all, &labels(), 5, 9).unwrap();
        let b = stratified_folds(&all, &labels(), 5, 9).unwrap();
        assert_eq!(a, b);
        let others: Vec<Vec<FoldSplit>> = (10..20)
            .map(|s| stratified_folds(&all, &labels(), 5, s).unwrap())
            .collect();
        assert!(others.iter().any(|o| *o != a));
    }

    #[test]
    fn test_invalid_fold_counts() {
        let all: Vec<usize> = (0..10).collect();
        assert!(matches!(
            stratified_folds(&all, &labels(), 1, 0),
            Err(RankCvError::Config(_))
        ));
        assert!(matches!(
            stratified_folds(&all[..3], &labels(), 4, 0),
            Err(RankCvError::Config(_))
        ));
    }

    #[test]
    fn test_holdout_split() {
        let split = holdout_split(3, 5);
        assert_eq!(split.train, vec![0, 1, 2]);
        assert_eq!(split.test, vec![3, 4]);
        assert_eq!(min_class_count(&[0, 1, 6], &labels()), 1);
    }
}
