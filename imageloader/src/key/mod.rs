//! Request keys and equivalence.
//!
//! Two different [`Request`]s may or may not be "the same" download, and
//! separately may or may not be "the same" cache entry. A [`RequestKey`]
//! wraps a request with a discriminator saying which of the two questions
//! it answers. The answer itself comes from a [`KeyEquivalence`] comparator
//! that is handed to whoever stores keys ([`KeyTable`], caches), so a key
//! never needs to know which table or loader it belongs to.
//!
//! Hashing only looks at the resource identifier: equal keys always share a
//! bucket, and requests for different resources never do.

mod table;

pub use table::KeyTable;

use crate::request::{Request, Resource};
use crate::traits::{Fetcher, Processor};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Equivalence
// =============================================================================

/// Equivalence predicates between requests.
pub trait KeyEquivalence: Send + Sync {
    /// Returns true if both requests address the same cache entry.
    fn cache_equivalent(&self, a: &Request, b: &Request) -> bool;

    /// Returns true if both requests can share one download.
    fn fetch_equivalent(&self, a: &Request, b: &Request) -> bool;
}

/// Equivalence delegated to the loader's fetcher and processor.
///
/// Cache keys are equivalent when the fetcher says the unprocessed images
/// match and, if a processor is configured, the processor says the processed
/// output matches too. Fetch keys are equivalent when the fetcher says one
/// download serves both.
pub struct RequestEquivalence {
    fetcher: Arc<dyn Fetcher>,
    processor: Option<Arc<dyn Processor>>,
}

impl RequestEquivalence {
    pub fn new(fetcher: Arc<dyn Fetcher>, processor: Option<Arc<dyn Processor>>) -> Self {
        Self { fetcher, processor }
    }
}

impl KeyEquivalence for RequestEquivalence {
    fn cache_equivalent(&self, a: &Request, b: &Request) -> bool {
        self.fetcher.is_cache_equivalent(a, b)
            && self
                .processor
                .as_ref()
                .map_or(true, |p| p.is_processing_equivalent(a, b))
    }

    fn fetch_equivalent(&self, a: &Request, b: &Request) -> bool {
        self.fetcher.is_fetch_equivalent(a, b)
    }
}

// =============================================================================
// Request Key
// =============================================================================

/// A request paired with the kind of equivalence it is compared by.
#[derive(Clone)]
pub struct RequestKey {
    request: Arc<Request>,
    is_cache_key: bool,
    hash: u64,
}

impl RequestKey {
    /// Creates a key compared by cache-equivalence.
    pub fn cache(request: Arc<Request>) -> Self {
        Self::new(request, true)
    }

    /// Creates a key compared by fetch-equivalence.
    pub fn fetch(request: Arc<Request>) -> Self {
        Self::new(request, false)
    }

    fn new(request: Arc<Request>, is_cache_key: bool) -> Self {
        let hash = resource_hash(request.resource());
        Self {
            request,
            is_cache_key,
            hash,
        }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn is_cache_key(&self) -> bool {
        self.is_cache_key
    }

    /// Precomputed hash of the resource identifier.
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Returns true if both keys are equivalent under `equivalence`.
    ///
    /// Keys of different kinds are never equal. The same request object is
    /// always equal to itself without consulting the comparator.
    pub fn is_equivalent(&self, other: &RequestKey, equivalence: &dyn KeyEquivalence) -> bool {
        if self.is_cache_key != other.is_cache_key {
            return false;
        }
        if Arc::ptr_eq(&self.request, &other.request) {
            return true;
        }
        if self.is_cache_key {
            equivalence.cache_equivalent(&self.request, &other.request)
        } else {
            equivalence.fetch_equivalent(&self.request, &other.request)
        }
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestKey")
            .field("resource", self.request.resource())
            .field("is_cache_key", &self.is_cache_key)
            .finish()
    }
}

fn resource_hash(resource: &Resource) -> u64 {
    let mut hasher = DefaultHasher::new();
    resource.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TargetSize;

    /// Equivalent when resources and sizes match; fetch additionally
    /// compares network access.
    struct SizeEquivalence;

    impl KeyEquivalence for SizeEquivalence {
        fn cache_equivalent(&self, a: &Request, b: &Request) -> bool {
            a.resource() == b.resource() && a.target_size() == b.target_size()
        }

        fn fetch_equivalent(&self, a: &Request, b: &Request) -> bool {
            self.cache_equivalent(a, b)
                && a.options().allows_network_access == b.options().allows_network_access
        }
    }

    /// Never equivalent; exercises the identity fast path.
    struct NeverEquivalent;

    impl KeyEquivalence for NeverEquivalent {
        fn cache_equivalent(&self, _: &Request, _: &Request) -> bool {
            false
        }

        fn fetch_equivalent(&self, _: &Request, _: &Request) -> bool {
            false
        }
    }

    #[test]
    fn test_same_request_is_equal_without_comparator() {
        let request = Arc::new(Request::new("a"));
        let a = RequestKey::fetch(Arc::clone(&request));
        let b = RequestKey::fetch(request);
        assert!(a.is_equivalent(&b, &NeverEquivalent));
    }

    #[test]
    fn test_discriminators_must_match() {
        let request = Arc::new(Request::new("a"));
        let cache = RequestKey::cache(Arc::clone(&request));
        let fetch = RequestKey::fetch(request);
        assert!(!cache.is_equivalent(&fetch, &SizeEquivalence));
    }

    #[test]
    fn test_fetch_equivalence_is_stricter_than_cache() {
        let online = Arc::new(Request::new("a").with_target_size(TargetSize::new(10, 10)));
        let offline = Arc::new(
            Request::new("a")
                .with_target_size(TargetSize::new(10, 10))
                .with_network_access(false),
        );

        let cache_a = RequestKey::cache(Arc::clone(&online));
        let cache_b = RequestKey::cache(Arc::clone(&offline));
        assert!(cache_a.is_equivalent(&cache_b, &SizeEquivalence));

        let fetch_a = RequestKey::fetch(online);
        let fetch_b = RequestKey::fetch(offline);
        assert!(!fetch_a.is_equivalent(&fetch_b, &SizeEquivalence));
    }

    #[test]
    fn test_hash_depends_only_on_resource() {
        let small = RequestKey::cache(Arc::new(
            Request::new("a").with_target_size(TargetSize::new(1, 1)),
        ));
        let large = RequestKey::fetch(Arc::new(
            Request::new("a").with_target_size(TargetSize::new(100, 100)),
        ));
        let other = RequestKey::cache(Arc::new(Request::new("b")));

        assert_eq!(small.hash_value(), large.hash_value());
        assert_ne!(small.hash_value(), other.hash_value());
    }
}
