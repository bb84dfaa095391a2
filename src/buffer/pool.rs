//! # Buffer Pool
//!
//! Tiered pool of byte regions for frequently reallocated I/O buffers,
//! keyed by capacity to keep reuse hits high across mixed packet sizes.
//!
//! Regions live in four tiers relative to the configured default region
//! size `d`: `<= d`, `<= 5d`, `<= 10d`, and everything larger. `get` probes
//! its target tier first and falls through to larger tiers on a miss, so an
//! oversized cached region is reused (truncated to the requested length)
//! rather than triggering a fresh allocation.
//!
//! The pool is dependency-injected (`Arc<BufferPool>`) and owned by whatever
//! component creates sessions; there is no process-wide singleton, which
//! keeps tests hermetic and allows isolated pools per subsystem.
//!
//! ## Usage
//! ```rust
//! use packet_link::buffer::BufferPool;
//!
//! let pool = BufferPool::new(1024);
//! let region = pool.get(64);
//! assert_eq!(region.len(), 64);
//! pool.put(region);
//! ```

use std::sync::Mutex;

/// Default region size when none is configured (1 KiB, matching the
/// original wire buffers).
pub const DEFAULT_REGION_SIZE: usize = 1024;

/// Thread-safe tiered pool of `Vec<u8>` regions.
///
/// `get`/`put` are safe to call concurrently from arbitrary tasks without
/// external locking; each tier holds its own lock and lock scopes never
/// overlap.
pub struct BufferPool {
    default_size: usize,
    default_tier: Mutex<Vec<Vec<u8>>>,
    size5_tier: Mutex<Vec<Vec<u8>>>,
    size10_tier: Mutex<Vec<Vec<u8>>>,
    bigger_tier: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool whose smallest tier caches regions up to
    /// `default_size` bytes of capacity.
    pub fn new(default_size: usize) -> Self {
        Self {
            default_size: default_size.max(1),
            default_tier: Mutex::new(Vec::new()),
            size5_tier: Mutex::new(Vec::new()),
            size10_tier: Mutex::new(Vec::new()),
            bigger_tier: Mutex::new(Vec::new()),
        }
    }

    /// Get a region with `len() == size` and `capacity() >= size`.
    ///
    /// The logical window is zero-filled. Requests smaller than the default
    /// region size are served from the default tier with at least the
    /// default capacity, so a slightly larger follow-up use reuses the same
    /// region without reallocating.
    pub fn get(&self, size: usize) -> Vec<u8> {
        let cap_size = size.max(self.default_size);
        if cap_size <= self.default_size {
            self.get_default(size)
        } else if cap_size <= 5 * self.default_size {
            self.get_tiered(&self.size5_tier, size, Probe::Size10)
        } else if cap_size <= 10 * self.default_size {
            self.get_tiered(&self.size10_tier, size, Probe::Bigger)
        } else {
            self.get_tiered(&self.bigger_tier, size, Probe::Alloc)
        }
    }

    /// Return a region to the tier matching its capacity.
    ///
    /// Zero-capacity regions are dropped rather than cached.
    pub fn put(&self, region: Vec<u8>) {
        let cap = region.capacity();
        if cap == 0 {
            return;
        }
        let tier = if cap <= self.default_size {
            &self.default_tier
        } else if cap <= 5 * self.default_size {
            &self.size5_tier
        } else if cap <= 10 * self.default_size {
            &self.size10_tier
        } else {
            &self.bigger_tier
        };
        if let Ok(mut tier) = tier.lock() {
            tier.push(region);
        }
    }

    /// Number of cached regions across all tiers.
    pub fn available(&self) -> usize {
        [
            &self.default_tier,
            &self.size5_tier,
            &self.size10_tier,
            &self.bigger_tier,
        ]
        .iter()
        .map(|t| t.lock().map(|t| t.len()).unwrap_or(0))
        .sum()
    }

    fn get_default(&self, size: usize) -> Vec<u8> {
        if let Some(region) = self.pop_fitting(&self.default_tier, size) {
            return region;
        }
        // Fresh default-tier regions carry the full default capacity, not
        // merely `size`, so nearby requests hit the cache next time.
        let mut region = Vec::with_capacity(self.default_size);
        region.resize(size, 0);
        region
    }

    fn get_tiered(&self, tier: &Mutex<Vec<Vec<u8>>>, size: usize, next: Probe) -> Vec<u8> {
        if let Some(region) = self.pop_fitting(tier, size) {
            return region;
        }
        match next {
            Probe::Size10 => self.get_tiered(&self.size10_tier, size, Probe::Bigger),
            Probe::Bigger => self.get_tiered(&self.bigger_tier, size, Probe::Alloc),
            Probe::Alloc => vec![0u8; size],
        }
    }

    /// Pop a cached region with enough capacity, resized to `size`.
    ///
    /// A popped region that turns out too small is pushed back into the tier
    /// matching its actual capacity before the miss is reported, so it is
    /// not lost to the probe.
    fn pop_fitting(&self, tier: &Mutex<Vec<Vec<u8>>>, size: usize) -> Option<Vec<u8>> {
        let popped = tier.lock().ok()?.pop()?;
        if popped.capacity() >= size {
            let mut region = popped;
            region.clear();
            region.resize(size, 0);
            return Some(region);
        }
        self.put(popped);
        None
    }
}

enum Probe {
    Size10,
    Bigger,
    Alloc,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_len_and_capacity() {
        let pool = BufferPool::new(4);

        let region = pool.get(3);
        assert_eq!(region.len(), 3);
        assert_eq!(region.capacity(), 4);

        let region = pool.get(5);
        assert_eq!(region.len(), 5);
        assert!(region.capacity() >= 5);

        let region = pool.get(4 * 10 + 1);
        assert_eq!(region.len(), 4 * 10 + 1);
        assert!(region.capacity() >= 4 * 10 + 1);
    }

    #[test]
    fn test_tier_reuse_no_alloc() {
        let pool = BufferPool::new(4);

        let region = pool.get(4 * 5 + 2);
        let cap = region.capacity();
        let ptr = region.as_ptr();
        pool.put(region);

        // Same capacity request must be served by the cached region.
        let region = pool.get(cap);
        assert_eq!(region.len(), cap);
        assert_eq!(region.as_ptr(), ptr);
    }

    #[test]
    fn test_smaller_request_reuses_larger_region() {
        let pool = BufferPool::new(4);

        let region = pool.get(4 * 5 + 2);
        let ptr = region.as_ptr();
        pool.put(region);

        // A slightly smaller request in the same tier reuses it, truncated.
        let region = pool.get(4 * 5 + 1);
        assert_eq!(region.len(), 4 * 5 + 1);
        assert_eq!(region.as_ptr(), ptr);
    }

    #[test]
    fn test_too_small_region_pushed_back() {
        let pool = BufferPool::new(4);

        // Cache a region near the bottom of the 5x tier.
        pool.put(Vec::with_capacity(5));
        assert_eq!(pool.available(), 1);

        // A larger request in the same tier cannot use it; it must survive
        // the probe in the tier matching its capacity.
        let region = pool.get(4 * 5);
        assert_eq!(region.len(), 4 * 5);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_get_zero_filled() {
        let pool = BufferPool::new(8);
        let mut region = pool.get(8);
        region.copy_from_slice(&[0xFF; 8]);
        pool.put(region);

        let region = pool.get(8);
        assert_eq!(&region[..], &[0u8; 8]);
    }

    #[test]
    fn test_put_empty_region_dropped() {
        let pool = BufferPool::new(4);
        pool.put(Vec::new());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_concurrent_get_put() {
        use std::sync::Arc;

        let pool = Arc::new(BufferPool::new(64));
        let mut handles = Vec::new();
        for i in 0..8usize {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for n in 1..200usize {
                    let region = pool.get((i + 1) * n % 700 + 1);
                    pool.put(region);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
