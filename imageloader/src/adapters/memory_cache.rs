//! In-memory image cache with LRU eviction.

use crate::key::{KeyEquivalence, KeyTable, RequestKey};
use crate::traits::{CachedImage, ImageCache};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Default size limit: 256 MB of decoded pixels.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug)]
struct CacheEntry {
    value: CachedImage,
    size_bytes: usize,
    /// Access tick for LRU eviction
    last_used: u64,
}

struct CacheState {
    entries: KeyTable<CacheEntry>,
    size_bytes: usize,
    tick: u64,
    stats: MemoryCacheStats,
}

/// Hit, miss, and eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl MemoryCacheStats {
    /// Hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Size-bounded in-memory [`ImageCache`].
///
/// Entries are keyed by cache-equivalence and sized by their pixel buffer.
/// When an insert pushes the total past the limit, least recently used
/// entries are evicted until it fits.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::new(fetcher).with_processor(Arc::new(ResizeProcessor::new()));
/// let cache = Arc::new(MemoryImageCache::new(pipeline.equivalence()));
/// let pipeline = pipeline.with_cache(cache);
/// ```
pub struct MemoryImageCache {
    state: Mutex<CacheState>,
    max_size_bytes: usize,
}

impl MemoryImageCache {
    /// Creates a cache with the default size limit.
    pub fn new(equivalence: Arc<dyn KeyEquivalence>) -> Self {
        Self::with_max_size(equivalence, DEFAULT_MAX_SIZE_BYTES)
    }

    /// Creates a cache holding at most `max_size_bytes` of pixels.
    pub fn with_max_size(equivalence: Arc<dyn KeyEquivalence>, max_size_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: KeyTable::new(equivalence),
                size_bytes: 0,
                tick: 0,
                stats: MemoryCacheStats::default(),
            }),
            max_size_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.state.lock().stats
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.drain();
        state.size_bytes = 0;
    }

    fn evict_to_fit(&self, state: &mut CacheState) {
        while state.size_bytes > self.max_size_bytes && !state.entries.is_empty() {
            let Some(oldest) = state.entries.values().map(|e| e.last_used).min() else {
                break;
            };
            let mut freed = 0;
            state.entries.retain(|_, e| {
                if e.last_used == oldest {
                    freed += e.size_bytes;
                    false
                } else {
                    true
                }
            });
            state.size_bytes -= freed;
            state.stats.evictions += 1;
            trace!(freed, size_bytes = state.size_bytes, "Evicted cached image");
        }
    }
}

impl ImageCache for MemoryImageCache {
    fn get(&self, key: &RequestKey) -> Option<CachedImage> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                let value = entry.value.clone();
                state.stats.hits += 1;
                Some(value)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    fn put(&self, key: RequestKey, value: CachedImage) {
        let size_bytes = value.image.as_bytes().len();
        if size_bytes > self.max_size_bytes {
            trace!(size_bytes, "Image larger than cache, not stored");
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let entry = CacheEntry {
            value,
            size_bytes,
            last_used: state.tick,
        };
        if let Some(old) = state.entries.insert(key, entry) {
            state.size_bytes -= old.size_bytes;
        }
        state.size_bytes += size_bytes;
        self.evict_to_fit(state);
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryImageCache")
            .field("entries", &state.entries.len())
            .field("size_bytes", &state.size_bytes)
            .field("max_size_bytes", &self.max_size_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Request, TargetSize};
    use image::DynamicImage;
    use tokio::time::{Duration, Instant};

    /// Same resource and target size means same entry.
    struct SizeEquivalence;

    impl KeyEquivalence for SizeEquivalence {
        fn cache_equivalent(&self, a: &Request, b: &Request) -> bool {
            a.resource() == b.resource() && a.target_size() == b.target_size()
        }

        fn fetch_equivalent(&self, a: &Request, b: &Request) -> bool {
            a.resource() == b.resource()
        }
    }

    fn key(resource: &str) -> RequestKey {
        RequestKey::cache(Arc::new(Request::new(resource)))
    }

    /// RGBA8 image of `width` x 1: 4 bytes per pixel.
    fn cached(width: u32) -> CachedImage {
        CachedImage::new(
            Arc::new(DynamicImage::new_rgba8(width, 1)),
            Instant::now() + Duration::from_secs(60),
        )
    }

    #[test]
    fn test_get_after_put() {
        let cache = MemoryImageCache::new(Arc::new(SizeEquivalence));
        assert!(cache.get(&key("a")).is_none());

        cache.put(key("a"), cached(2));
        assert_eq!(cache.get(&key("a")).unwrap().image.width(), 2);
        assert_eq!(cache.size_bytes(), 8);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_equivalent_keys_share_entry() {
        let cache = MemoryImageCache::new(Arc::new(SizeEquivalence));
        let sized = |r: &str| {
            RequestKey::cache(Arc::new(
                Request::new(r).with_target_size(TargetSize::new(10, 10)),
            ))
        };

        cache.put(sized("a"), cached(1));
        assert!(cache.get(&sized("a")).is_some());
        assert!(cache.get(&key("a")).is_none());

        cache.put(sized("a"), cached(3));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 12);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = MemoryImageCache::with_max_size(Arc::new(SizeEquivalence), 24);
        cache.put(key("a"), cached(2));
        cache.put(key("b"), cached(2));
        cache.put(key("c"), cached(2));

        // Touch "a" so "b" is the oldest.
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("d"), cached(2));

        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("d")).is_some());
        assert_eq!(cache.size_bytes(), 24);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_oversized_image_not_stored() {
        let cache = MemoryImageCache::with_max_size(Arc::new(SizeEquivalence), 4);
        cache.put(key("a"), cached(2));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MemoryImageCache::new(Arc::new(SizeEquivalence));
        cache.put(key("a"), cached(1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }
}
