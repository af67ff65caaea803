//! Telemetry for load coordination.
//!
//! The coordinator emits structured [`LoaderEvent`]s through a
//! [`TelemetrySink`] and keeps a running [`LoaderStats`] tally. It does not
//! decide how events are presented: a sink may log them, aggregate them, or
//! drop them.
//!
//! # Example
//!
//! ```ignore
//! use imageloader::telemetry::{LoaderEvent, TelemetrySink};
//!
//! struct CountingSink(AtomicUsize);
//!
//! impl TelemetrySink for CountingSink {
//!     fn emit(&self, _event: LoaderEvent) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//! ```

use crate::loader::{OperationId, TaskId};
use crate::request::Resource;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Events
// =============================================================================

/// Where a cache hit was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStage {
    /// Before any fetch was started.
    Start,
    /// After the fetch, before processing.
    Processing,
}

/// Events emitted by the load coordinator.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// A task was registered.
    TaskStarted { task: TaskId, resource: Resource },

    /// A task attached to an operation that was already in flight.
    TaskCoalesced { task: TaskId, operation: OperationId },

    /// A new fetch was started.
    FetchStarted {
        operation: OperationId,
        resource: Resource,
    },

    /// A fetch lost its last interested task and was cancelled.
    FetchCancelled { operation: OperationId },

    /// A fetch reported its final result.
    FetchCompleted {
        operation: OperationId,
        tasks: usize,
        success: bool,
        duration: Duration,
    },

    /// A task was answered from the cache.
    CacheHit { task: TaskId, stage: CacheStage },

    /// A partial image was decoded for an operation.
    PartialImage { operation: OperationId, tasks: usize },

    /// A task received its completion.
    TaskCompleted {
        task: TaskId,
        success: bool,
        duration: Duration,
    },

    /// A task was cancelled by its owner.
    TaskCancelled { task: TaskId },
}

impl LoaderEvent {
    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCoalesced { .. } => "task_coalesced",
            Self::FetchStarted { .. } => "fetch_started",
            Self::FetchCancelled { .. } => "fetch_cancelled",
            Self::FetchCompleted { .. } => "fetch_completed",
            Self::CacheHit { .. } => "cache_hit",
            Self::PartialImage { .. } => "partial_image",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskCancelled { .. } => "task_cancelled",
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Sink for telemetry events.
///
/// Called on the coordinator loop: implementations must be fast and
/// non-blocking.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: LoaderEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: LoaderEvent) {}
}

/// Sink that writes every event as a `tracing` debug record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: LoaderEvent) {
        tracing::debug!(event_type = event.event_type(), ?event, "Loader event");
    }
}

/// Sink that forwards every event to several sinks.
#[derive(Default, Clone)]
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: LoaderEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Running counters kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Tasks registered
    pub tasks_started: u64,
    /// Tasks that joined an in-flight fetch
    pub tasks_coalesced: u64,
    /// Tasks answered from cache (before fetch or before processing)
    pub cache_hits: u64,
    /// Fetches started
    pub fetches_started: u64,
    /// Fetches cancelled for lack of interest
    pub fetches_cancelled: u64,
    /// Partial images delivered (per task)
    pub partial_images: u64,
    /// Tasks completed
    pub tasks_completed: u64,
    /// Tasks cancelled
    pub tasks_cancelled: u64,
}

impl LoaderStats {
    /// Fraction of fetch-bound tasks that were coalesced (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        let fetch_bound = self.tasks_coalesced + self.fetches_started;
        if fetch_bound == 0 {
            0.0
        } else {
            self.tasks_coalesced as f64 / fetch_bound as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl TelemetrySink for CountingSink {
        fn emit(&self, _event: LoaderEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_multiplex_forwards_to_all() {
        let a = Arc::new(CountingSink(AtomicUsize::new(0)));
        let b = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sink = MultiplexTelemetrySink::new()
            .with_sink(a.clone())
            .with_sink(b.clone());

        sink.emit(LoaderEvent::TaskCancelled { task: TaskId(1) });

        assert_eq!(a.0.load(Ordering::Relaxed), 1);
        assert_eq!(b.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_type_names() {
        let event = LoaderEvent::FetchCancelled {
            operation: OperationId(3),
        };
        assert_eq!(event.event_type(), "fetch_cancelled");
    }

    #[test]
    fn test_coalescing_ratio() {
        let stats = LoaderStats {
            tasks_coalesced: 3,
            fetches_started: 1,
            ..Default::default()
        };
        assert!((stats.coalescing_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(LoaderStats::default().coalescing_ratio(), 0.0);
    }
}
