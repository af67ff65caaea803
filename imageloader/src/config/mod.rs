//! Configuration for the image loader.
//!
//! Configuration is grouped into small structs, one per concern:
//!
//! - [`LoaderConfig`]: coordinator behaviour (progressive decoding,
//!   processing parallelism, preheating)
//! - [`CommandConfig`]: pacing of transport commands
//!
//! Both use the builder style with sensible defaults, and both can be
//! loaded from an INI file with [`load_config`].
//!
//! # Example
//!
//! ```
//! use imageloader::config::{CommandConfig, LoaderConfig};
//! use std::time::Duration;
//!
//! let config = LoaderConfig::new()
//!     .with_progressive_decoding(true)
//!     .with_progressive_threshold(0.2)
//!     .with_commands(CommandConfig::new().with_interval(Duration::from_millis(5)));
//!
//! assert!(config.progressive_decoding());
//! ```

mod file;
mod loader;

pub use file::{load_config, parse_config, ConfigError};
pub use loader::{
    default_max_concurrent_processing, CommandConfig, LoaderConfig, DEFAULT_COMMAND_INTERVAL,
    DEFAULT_PREHEATING_PRIORITY, DEFAULT_PROGRESSIVE_THRESHOLD,
};
