//! imageloader - request-coalescing image loading
//!
//! Many callers asking for the same image, at the same time, get one fetch,
//! one decode, and (per distinct processing) one processing pass. The crate
//! coordinates those loads; fetching bytes, decoding, processing, and
//! caching are pluggable collaborators.
//!
//! # Modules
//!
//! - [`loader`] - the coordinator, its client handle, and per-request tasks
//! - [`composite`] - first-success fallback across several requests
//! - [`command`] - paced start/cancel commands for transport handles
//! - [`key`] - request keys compared by fetch or cache equivalence
//! - [`traits`] - collaborator interfaces
//! - [`adapters`] - collaborators built on the `image` crate
//!
//! # Example
//!
//! ```ignore
//! use imageloader::adapters::{MemoryImageCache, ResizeProcessor};
//! use imageloader::config::LoaderConfig;
//! use imageloader::loader::{LoadCoordinator, Pipeline};
//! use imageloader::request::{Request, TargetSize};
//!
//! let pipeline = Pipeline::new(Arc::new(MyFetcher::new()))
//!     .with_processor(Arc::new(ResizeProcessor::new()));
//! let cache = Arc::new(MemoryImageCache::new(pipeline.equivalence()));
//! let pipeline = pipeline.with_cache(cache);
//!
//! let (coordinator, loader) = LoadCoordinator::new(LoaderConfig::default(), pipeline);
//! tokio::spawn(coordinator.run(shutdown.clone()));
//!
//! let request = Request::new("https://example.com/a.jpg").with_target_size(TargetSize::new(64, 64));
//! let response = loader.load(request).wait().await;
//! ```

pub mod adapters;
pub mod command;
pub mod composite;
pub mod config;
pub mod error;
pub mod key;
pub mod loader;
pub mod logging;
pub mod request;
pub mod telemetry;
pub mod traits;

/// Version of the imageloader library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
