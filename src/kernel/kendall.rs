//! Kendall kernels
//!
//! The Kendall kernel treats each sample's feature vector as a ranking and
//! compares two samples by the concordance of their feature-pair orders:
//!
//! K(x, y) = (concordant − discordant) / sqrt(n_x * n_y)
//!
//! where n_x counts the untied feature pairs of x. Without ties this is
//! Kendall's tau over the p(p−1)/2 feature pairs, and the kernel is the
//! cosine of the two ±1 pair-sign vectors, hence positive semi-definite.
//!
//! The stabilized variant is the expectation of the Kendall kernel after
//! adding independent U[−a, a] noise to every entry. The difference of two
//! noisy entries is d + Z with Z triangular on [−2a, 2a], so the expected
//! sign of a feature pair has a closed form and the expected kernel of two
//! distinct samples factorizes over pairs.

use crate::core::KernelWarning;
use crate::kernel::Kernel;

fn sign(d: f64) -> i64 {
    (d > 0.0) as i64 - (d < 0.0) as i64
}

/// E[sign(d + Z)] for Z the difference of two U[−window, window] variables
pub fn smoothed_sign(d: f64, window: f64) -> f64 {
    if window <= 0.0 {
        return sign(d) as f64;
    }
    let width = 2.0 * window;
    let magnitude = d.abs();
    if magnitude >= width {
        return sign(d) as f64;
    }
    let rest = width - magnitude;
    sign(d) as f64 * (1.0 - rest * rest / (width * width))
}

/// Sort key that orders -0.0 together with 0.0
fn rank_key(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// Number of pairs inside runs of adjacent equal items
fn tied_pairs<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> u64 {
    let mut tied = 0u64;
    let mut run = 1u64;
    for w in items.windows(2) {
        if same(&w[0], &w[1]) {
            run += 1;
        } else {
            tied += run * (run - 1) / 2;
            run = 1;
        }
    }
    tied + run * (run - 1) / 2
}

/// Sorts `values` ascending and returns the number of strictly inverted pairs
fn count_inversions(values: &mut Vec<f64>) -> u64 {
    let n = values.len();
    let mut buffer = values.clone();
    let mut inversions = 0u64;
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if values[j] < values[i] {
                    buffer[k] = values[j];
                    inversions += (mid - i) as u64;
                    j += 1;
                } else {
                    buffer[k] = values[i];
                    i += 1;
                }
                k += 1;
            }
            let left = mid - i;
            buffer[k..k + left].copy_from_slice(&values[i..mid]);
            buffer[k + left..end].copy_from_slice(&values[j..end]);
            start = end;
        }
        std::mem::swap(values, &mut buffer);
        width *= 2;
    }
    inversions
}

/// Kendall tau kernel between feature rankings
#[derive(Debug, Clone, Copy, Default)]
pub struct KendallKernel;

impl KendallKernel {
    pub fn new() -> Self {
        Self
    }
}

impl Kernel for KendallKernel {
    /// Knight's O(p log p) tau-b: sort by (x, y), count the inversions of
    /// y with a merge sort, and correct the pair total for ties.
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        let p = x.len().min(y.len());
        let total = (p * p.saturating_sub(1) / 2) as u64;
        if total == 0 {
            return 0.0;
        }
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_unstable_by(|&a, &b| {
            rank_key(x[a])
                .total_cmp(&rank_key(x[b]))
                .then_with(|| rank_key(y[a]).total_cmp(&rank_key(y[b])))
        });
        let tied_x = tied_pairs(&order, |&a, &b| x[a] == x[b]);
        let tied_xy = tied_pairs(&order, |&a, &b| x[a] == x[b] && y[a] == y[b]);

        let mut ys: Vec<f64> = order.iter().map(|&i| rank_key(y[i])).collect();
        let discordant = count_inversions(&mut ys);
        let tied_y = tied_pairs(&ys, |a, b| a == b);

        let untied_x = total - tied_x;
        let untied_y = total - tied_y;
        if untied_x == 0 || untied_y == 0 {
            return 0.0;
        }
        // untied in both = concordant + discordant
        let both = (total + tied_xy - tied_x - tied_y) as i64;
        let concordance = both - 2 * discordant as i64;
        concordance as f64 / ((untied_x as f64) * (untied_y as f64)).sqrt()
    }

    fn inspect(&self, sample: usize, x: &[f64]) -> Option<KernelWarning> {
        let first = x.first()?;
        x.iter()
            .all(|v| v == first)
            .then_some(KernelWarning::FullyTied(sample))
    }
}

/// Expected Kendall kernel under uniform noise of half-width `window`
///
/// `compute` gives the off-diagonal expectation; the diagonal is 1 because
/// a sample shares its own noise draw.
#[derive(Debug, Clone, Copy)]
pub struct StabilizedKendallKernel {
    window: f64,
}

impl StabilizedKendallKernel {
    /// # Panics
    /// Panics if window is negative or not finite
    pub fn new(window: f64) -> Self {
        assert!(
            window.is_finite() && window >= 0.0,
            "Window must be non-negative, got: {}",
            window
        );
        Self { window }
    }

    pub fn window(&self) -> f64 {
        self.window
    }
}

impl Kernel for StabilizedKendallKernel {
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        if self.window == 0.0 {
            return KendallKernel.compute(x, y);
        }
        let p = x.len();
        let pairs = p * p.saturating_sub(1) / 2;
        if pairs == 0 {
            return 0.0;
        }
        let mut total = 0.0;
        for i in 0..p {
            for j in (i + 1)..p {
                total += smoothed_sign(x[i] - x[j], self.window)
                    * smoothed_sign(y[i] - y[j], self.window);
            }
        }
        total / pairs as f64
    }

    fn inspect(&self, sample: usize, x: &[f64]) -> Option<KernelWarning> {
        if self.window == 0.0 || x.len() < 2 {
            KendallKernel.inspect(sample, x)
        } else {
            None
        }
    }
}
