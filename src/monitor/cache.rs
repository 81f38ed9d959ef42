// SPDX-License-Identifier: GPL-3.0-only

//! Weakly held caches the monitor may evict under memory pressure
//!
//! The registry never keeps a cache alive: once its owner drops the last
//! strong reference, the entry disappears on the next sweep.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A cache that can release its memory on demand
pub trait Evictable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop cached data, returning approximately how many bytes were freed
    fn evict(&self) -> u64;
}

/// Weak registry of evictable caches
#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<Vec<Weak<dyn Evictable>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `cache` without keeping it alive
    pub fn register(&self, cache: &Arc<dyn Evictable>) {
        self.caches.lock().push(Arc::downgrade(cache));
    }

    /// Live caches
    pub fn len(&self) -> usize {
        self.caches.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every live cache and forget dead ones
    ///
    /// Returns the total bytes reported freed.
    pub fn evict_all(&self) -> u64 {
        let live: Vec<Arc<dyn Evictable>> = {
            let mut caches = self.caches.lock();
            caches.retain(|w| w.strong_count() > 0);
            caches.iter().filter_map(Weak::upgrade).collect()
        };

        live.iter()
            .map(|cache| {
                let freed = cache.evict();
                debug!(cache = cache.name(), freed, "Evicted cache");
                freed
            })
            .sum()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Buffer {
        bytes: AtomicU64,
    }

    impl Evictable for Buffer {
        fn name(&self) -> &str {
            "buffer"
        }

        fn evict(&self) -> u64 {
            self.bytes.swap(0, Ordering::SeqCst)
        }
    }

    #[test]
    fn test_evicts_live_and_forgets_dropped() {
        let registry = CacheRegistry::new();
        let kept: Arc<dyn Evictable> = Arc::new(Buffer {
            bytes: AtomicU64::new(1024),
        });
        let dropped: Arc<dyn Evictable> = Arc::new(Buffer {
            bytes: AtomicU64::new(4096),
        });
        registry.register(&kept);
        registry.register(&dropped);
        drop(dropped);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.evict_all(), 1024);
        assert_eq!(registry.evict_all(), 0);
    }
}
