//! Kernel matrix cache
//!
//! Provides an LRU cache of prepared kernels so that the same
//! (kernel, feature subset, seed) combination is built only once, e.g. when
//! several top-k models of one split share the same k.

use crate::core::Result;
use crate::kernel::PreparedKernel;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Cache key identifying a prepared kernel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    kernel: String,
    features: Option<Vec<usize>>,
    seed: u64,
}

impl KernelKey {
    /// `kernel` is the display form of the kernel specification
    pub fn new(kernel: impl Into<String>, features: Option<&[usize]>, seed: u64) -> Self {
        Self {
            kernel: kernel.into(),
            features: features.map(|f| f.to_vec()),
            seed,
        }
    }
}

/// LRU cache of prepared kernels
pub struct KernelCache {
    cache: LruCache<KernelKey, Arc<PreparedKernel>>,
    hits: u64,
    misses: u64,
}

impl KernelCache {
    /// Create a new kernel cache holding at most `capacity` kernels
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Get a kernel from cache
    pub fn get(&mut self, key: &KernelKey) -> Option<Arc<PreparedKernel>> {
        if let Some(kernel) = self.cache.get(key) {
            self.hits += 1;
            Some(Arc::clone(kernel))
        } else {
            self.misses += 1;
            None
        }
    }

    /// Put a kernel into cache
    pub fn put(&mut self, key: KernelKey, kernel: Arc<PreparedKernel>) {
        self.cache.put(key, kernel);
    }

    /// Cached kernel for `key`, building it with `build` on a miss
    pub fn get_or_build<F>(&mut self, key: KernelKey, build: F) -> Result<Arc<PreparedKernel>>
    where
        F: FnOnce() -> Result<PreparedKernel>,
    {
        if let Some(kernel) = self.get(&key) {
            return Ok(kernel);
        }
        let kernel = Arc::new(build()?);
        self.put(key, Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            capacity: self.cache.cap().get(),
            size: self.cache.len(),
        }
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{KernelMatrix, RankCvError};

    fn kernel(value: f64) -> Arc<PreparedKernel> {
        Arc::new(PreparedKernel::Fixed(KernelMatrix::from_upper(
            vec![vec![value], vec![]],
            1.0,
        )))
    }

    #[test]
    fn test_cache_key_identity() {
        let a = KernelKey::new("kendall", Some(&[0, 1]), 7);
        assert_eq!(a, KernelKey::new("kendall", Some(&[0, 1]), 7));
        assert_ne!(a, KernelKey::new("kendall", Some(&[1, 0]), 7));
        assert_ne!(a, KernelKey::new("kendall", None, 7));
        assert_ne!(a, KernelKey::new("kendall", Some(&[0, 1]), 8));
    }

    #[test]
    fn test_kernel_cache_basic() {
        let mut cache = KernelCache::new(3);
        let key = KernelKey::new("linear", None, 0);

        // Cache miss
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().misses, 1);

        // Put and get
        cache.put(key.clone(), kernel(0.5));
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_kernel_cache_lru_eviction() {
        let mut cache = KernelCache::new(2);
        let keys: Vec<KernelKey> = (0..3).map(|s| KernelKey::new("rbf", None, s)).collect();

        cache.put(keys[0].clone(), kernel(0.1));
        cache.put(keys[1].clone(), kernel(0.2));
        cache.put(keys[2].clone(), kernel(0.3)); // Should evict keys[0]

        assert!(cache.get(&keys[0]).is_none());
        assert!(cache.get(&keys[1]).is_some());
        assert!(cache.get(&keys[2]).is_some());
    }

    #[test]
    fn test_get_or_build_builds_once() {
        let mut cache = KernelCache::new(4);
        let key = KernelKey::new("kendall", Some(&[2, 3]), 1);
        let mut builds = 0;
        for _ in 0..3 {
            let k = cache
                .get_or_build(key.clone(), || {
                    builds += 1;
                    Ok(PreparedKernel::Fixed(KernelMatrix::zeros(2)))
                })
                .unwrap();
            assert_eq!(k.size(), 2);
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_get_or_build_error_is_not_cached() {
        let mut cache = KernelCache::new(4);
        let key = KernelKey::new("kendall", Some(&[]), 1);
        let result = cache.get_or_build(key.clone(), || Err(RankCvError::config("empty")));
        assert!(result.is_err());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = KernelCache::new(10);
        let key = KernelKey::new("linear", None, 0);
        cache.put(key.clone(), kernel(1.0));
        cache.get(&key);

        cache.clear();

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 1);
    }
}
