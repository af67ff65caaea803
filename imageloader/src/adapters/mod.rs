//! Concrete collaborators built on the `image` crate.
//!
//! # Adapters
//!
//! - [`ImageCrateDecoder`] - Decodes any format the `image` crate supports
//! - [`ResizeProcessor`] - Scales to the request's target size and content mode
//! - [`MemoryImageCache`] - In-memory, size-bounded LRU image cache

mod image_decoder;
mod memory_cache;
mod resize_processor;

pub use image_decoder::ImageCrateDecoder;
pub use memory_cache::{MemoryCacheStats, MemoryImageCache};
pub use resize_processor::ResizeProcessor;
