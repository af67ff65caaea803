//! Collaborator traits consumed by the load coordinator.
//!
//! The coordinator orchestrates; it does not fetch bytes, decode formats,
//! resize pixels, or store anything. Those jobs belong to collaborators
//! injected through these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LoadCoordinator                          │
//! │                                                              │
//! │  Depends only on these abstractions:                         │
//! │  • Fetcher     - produce bytes, report progress              │
//! │  • Decoder     - bytes → image (final or partial)            │
//! │  • Processor   - image → image for a request                 │
//! │  • ImageCache  - keyed storage of processed images           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Adapter Implementations                    │
//! │  • ImageCrateDecoder → Decoder                               │
//! │  • ResizeProcessor   → Processor                             │
//! │  • MemoryImageCache  → ImageCache                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator callback (fetch progress and completion in particular)
//! is re-marshalled onto the coordinator loop, so implementations may call
//! back from any thread.

use crate::key::RequestKey;
use crate::loader::FetchSink;
use crate::request::{Priority, Request};
use image::DynamicImage;
use std::sync::Arc;
use tokio::time::Instant;

/// A decoded image shared between every task that receives it.
pub type Image = Arc<DynamicImage>;

// ============================================================================
// Fetcher
// ============================================================================

/// Produces the bytes of an image resource.
///
/// Fetch-equivalence must imply cache-equivalence: two requests that would
/// share one download always share one cache entry, but two cache-equivalent
/// requests may still need different fetches (for example when only one of
/// them may use the network).
pub trait Fetcher: Send + Sync + 'static {
    /// Returns true if this fetcher accepts the request.
    fn can_handle(&self, request: &Request) -> bool;

    /// Returns true if both requests can be served by one download.
    fn is_fetch_equivalent(&self, a: &Request, b: &Request) -> bool;

    /// Returns true if both requests produce the same unprocessed image.
    fn is_cache_equivalent(&self, a: &Request, b: &Request) -> bool;

    /// Normalises a request before keys are computed.
    fn canonical_request(&self, request: Request) -> Request {
        request
    }

    /// Starts a download.
    ///
    /// Progress and the final result are reported through `sink`, from any
    /// thread. The returned handle cancels the download and receives
    /// priority updates.
    fn start(&self, request: &Request, sink: FetchSink) -> Box<dyn FetchHandle>;
}

/// Cancellable handle to an in-flight download.
pub trait FetchHandle: Send + Sync {
    /// Cancels the download. Best effort: a completion may still arrive.
    fn cancel(&self);

    /// Updates the download's priority.
    fn set_priority(&self, _priority: Priority) {}
}

// ============================================================================
// Decoder
// ============================================================================

/// Turns fetched bytes into an image.
pub trait Decoder: Send + Sync + 'static {
    /// Decodes `data`. `partial` is true for progressive attempts on an
    /// incomplete buffer. Returns `None` when no image can be produced.
    fn decode(&self, data: &[u8], partial: bool) -> Option<DynamicImage>;
}

// ============================================================================
// Processor
// ============================================================================

/// Post-processes decoded images for a particular request.
pub trait Processor: Send + Sync + 'static {
    /// Returns true if `image` needs processing for `request`.
    fn should_process(&self, image: &DynamicImage, request: &Request, partial: bool) -> bool;

    /// Processes `image` for `request`.
    ///
    /// CPU-bound; the coordinator runs it on the blocking pool.
    fn process(&self, image: &DynamicImage, request: &Request, partial: bool) -> DynamicImage;

    /// Returns true if both requests produce the same processed output.
    fn is_processing_equivalent(&self, a: &Request, b: &Request) -> bool;
}

// ============================================================================
// Cache
// ============================================================================

/// A cached image with its expiration instant.
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub image: Image,
    pub expires_at: Instant,
}

impl CachedImage {
    /// Creates an entry that expires at `expires_at`.
    pub fn new(image: Image, expires_at: Instant) -> Self {
        Self { image, expires_at }
    }

    /// Returns true if the entry has expired at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Keyed storage for processed images.
///
/// Keys are cache keys ([`RequestKey::is_cache_key`] is true); equivalent
/// keys must address the same entry.
pub trait ImageCache: Send + Sync + 'static {
    /// Gets the entry for `key`, if any.
    fn get(&self, key: &RequestKey) -> Option<CachedImage>;

    /// Stores `value` under `key`, replacing an equivalent entry.
    fn put(&self, key: RequestKey, value: CachedImage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cached_image_expiry() {
        let now = Instant::now();
        let entry = CachedImage::new(
            Arc::new(DynamicImage::new_rgba8(1, 1)),
            now + Duration::from_secs(5),
        );

        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::from_secs(5)));
    }
}
