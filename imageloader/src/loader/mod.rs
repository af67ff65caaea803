//! Request-coalescing load coordinator.
//!
//! The [`LoadCoordinator`] owns every in-flight load. Callers talk to it
//! through a cloneable [`ImageLoader`] and per-request [`ImageTask`]s; the
//! fetcher, the decode worker, and processing jobs report back through the
//! same channel. One run loop consumes that channel and is the only code that
//! touches the task and operation tables, so many tasks can share one fetch
//! without per-object locking.
//!
//! # Architecture
//!
//! ```text
//! ImageTask ──┐
//! ImageTask ──┼─► Message ─► ┌──────────────────────────────────────┐
//! ImageTask ──┘              │          LoadCoordinator             │
//!                            │                                      │
//! FetchSink ────► Message ─► │  executing: TaskId → TaskEntry       │
//! DecodeWorker ─► Message ─► │  operations: fetch key → OperationId │
//! Processing ───► Message ─► │  arena: OperationId → LoadOperation  │
//!                            └──────────────────────────────────────┘
//!                                       │
//!                     TaskEvent ◄───────┘  (progress, partial, completed)
//! ```
//!
//! # Lifecycle of a task
//!
//! 1. **Start**: the task is registered; a fresh cache hit completes it
//!    immediately. Otherwise its fetch key is looked up: an equivalent
//!    in-flight operation is joined, or a new one is started.
//! 2. **Progress**: fetcher progress fans out to every attached task and may
//!    drive progressive decoding.
//! 3. **Completion**: the bytes are decoded once; each task then re-checks
//!    the cache under its cache key, is processed if needed, stores the
//!    result, and receives exactly one `Completed` event.
//! 4. **Cancellation**: the task detaches; the fetch is cancelled only when
//!    no task is left on it.
//!
//! # Example
//!
//! ```ignore
//! use imageloader::loader::{LoadCoordinator, Pipeline};
//! use imageloader::config::LoaderConfig;
//! use imageloader::request::Request;
//!
//! let pipeline = Pipeline::new(Arc::new(HttpFetcher::new()));
//! let (coordinator, loader) = LoadCoordinator::new(LoaderConfig::default(), pipeline);
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(coordinator.run(shutdown.clone()));
//!
//! let mut task = loader.load(Request::new("https://example.com/a.jpg"));
//! if let Some(response) = task.wait().await {
//!     println!("image: {:?}", response.image.map(|i| (i.width(), i.height())));
//! }
//! ```

mod client;
mod completion;
mod core;
mod lifecycle;
mod message;
mod operation;
mod pipeline;
mod progress;
mod progressive;
mod queues;
mod task;

pub use client::{ImageLoader, LoaderSnapshot};
pub use core::LoadCoordinator;
pub use message::FetchSink;
pub use operation::OperationId;
pub use pipeline::Pipeline;
pub use task::{ImageTask, LoadResponse, TaskControl, TaskEvent, TaskId, TaskState};
