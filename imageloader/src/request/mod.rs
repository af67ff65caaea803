//! Image requests.
//!
//! A [`Request`] is an immutable description of a desired image: which
//! resource, at what size, in what content mode, with which options. Two
//! requests are never compared by value directly; whether they share a fetch
//! or a cache entry is decided by the collaborators through
//! [`KeyEquivalence`](crate::key::KeyEquivalence).
//!
//! # Example
//!
//! ```
//! use imageloader::request::{ContentMode, Priority, Request, TargetSize};
//!
//! let request = Request::new("https://example.com/photo.jpg")
//!     .with_target_size(TargetSize::new(200, 200))
//!     .with_content_mode(ContentMode::AspectFill)
//!     .with_priority(Priority::High);
//!
//! assert_eq!(request.resource().as_str(), "https://example.com/photo.jpg");
//! assert_eq!(request.options().priority, Priority::High);
//! ```

mod priority;

pub use priority::Priority;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default lifetime of a cached image.
pub const DEFAULT_EXPIRATION_AGE: Duration = Duration::from_secs(600);

// =============================================================================
// Resource
// =============================================================================

/// Opaque identifier of an image resource (URL, file path, asset id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource(String);

impl Resource {
    /// Creates a resource identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Resource {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Size, mode, policy
// =============================================================================

/// Desired output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetSize {
    /// Keep the decoded image at its original size.
    #[default]
    Original,
    /// Fit or fill the given box, depending on [`ContentMode`].
    Pixels { width: u32, height: u32 },
}

impl TargetSize {
    /// Creates a pixel target size.
    pub fn new(width: u32, height: u32) -> Self {
        TargetSize::Pixels { width, height }
    }
}

/// How an image is scaled into its [`TargetSize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentMode {
    /// Scale to cover the target box; may crop when clipping is allowed.
    #[default]
    AspectFill,
    /// Scale to fit inside the target box.
    AspectFit,
}

/// Whether the loader may answer a request from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// Look up the cache before fetching and before processing.
    #[default]
    UseCache,
    /// Skip cache lookups. Results are still stored.
    ReloadIgnoringCache,
}

impl CachePolicy {
    /// Returns true if cache lookups are allowed.
    pub fn allows_lookup(self) -> bool {
        matches!(self, CachePolicy::UseCache)
    }
}

// =============================================================================
// Options
// =============================================================================

/// Options bag carried by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Initial priority of tasks created for the request.
    pub priority: Priority,
    /// Cache lookup policy.
    pub cache_policy: CachePolicy,
    /// Whether the fetcher may use the network.
    pub allows_network_access: bool,
    /// Whether aspect-fill processing may crop.
    pub allows_clipping: bool,
    /// Opt-in for partial images while bytes arrive.
    pub allows_progressive_image: bool,
    /// Run the processor on partial images as well as final ones.
    pub process_partial_images: bool,
    /// Lifetime of the cache entry produced by this request.
    pub expiration_age: Duration,
    /// Arbitrary key-value extensions interpreted by collaborators.
    pub user_info: BTreeMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            cache_policy: CachePolicy::UseCache,
            allows_network_access: true,
            allows_clipping: false,
            allows_progressive_image: false,
            process_partial_images: false,
            expiration_age: DEFAULT_EXPIRATION_AGE,
            user_info: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Immutable description of a desired image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    resource: Resource,
    target_size: TargetSize,
    content_mode: ContentMode,
    options: RequestOptions,
}

impl Request {
    /// Creates a request for the original-size image with default options.
    pub fn new(resource: impl Into<Resource>) -> Self {
        Self {
            resource: resource.into(),
            target_size: TargetSize::Original,
            content_mode: ContentMode::AspectFill,
            options: RequestOptions::default(),
        }
    }

    pub fn with_target_size(mut self, size: TargetSize) -> Self {
        self.target_size = size;
        self
    }

    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.options.cache_policy = policy;
        self
    }

    /// Opts the request in to partial images.
    pub fn with_progressive_image(mut self, allowed: bool) -> Self {
        self.options.allows_progressive_image = allowed;
        self
    }

    pub fn with_network_access(mut self, allowed: bool) -> Self {
        self.options.allows_network_access = allowed;
        self
    }

    pub fn with_expiration_age(mut self, age: Duration) -> Self {
        self.options.expiration_age = age;
        self
    }

    pub fn with_user_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.user_info.insert(key.into(), value.into());
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn target_size(&self) -> TargetSize {
        self.target_size
    }

    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = Request::new("file:///tmp/a.png");
        assert_eq!(request.target_size(), TargetSize::Original);
        assert_eq!(request.content_mode(), ContentMode::AspectFill);
        assert_eq!(request.options().priority, Priority::Normal);
        assert!(request.options().allows_network_access);
        assert!(!request.options().allows_progressive_image);
        assert_eq!(request.options().expiration_age, DEFAULT_EXPIRATION_AGE);
    }

    #[test]
    fn test_builder_methods() {
        let request = Request::new("a")
            .with_target_size(TargetSize::new(10, 20))
            .with_content_mode(ContentMode::AspectFit)
            .with_cache_policy(CachePolicy::ReloadIgnoringCache)
            .with_network_access(false)
            .with_user_info("filter", "sepia");

        assert_eq!(request.target_size(), TargetSize::new(10, 20));
        assert_eq!(request.content_mode(), ContentMode::AspectFit);
        assert!(!request.options().cache_policy.allows_lookup());
        assert!(!request.options().allows_network_access);
        assert_eq!(
            request.options().user_info.get("filter").map(String::as_str),
            Some("sepia")
        );
    }

    #[test]
    fn test_resource_display() {
        let resource = Resource::from("https://example.com/x.jpg");
        assert_eq!(resource.to_string(), "https://example.com/x.jpg");
    }
}
