//! Load coordinator core - main struct and run loop.
//!
//! This module contains the [`LoadCoordinator`] struct and its event loop.
//! Handler methods are implemented in separate modules:
//! - `lifecycle`: task start, cancellation, priority, preheating
//! - `progress`: fetch progress and progressive decoding
//! - `completion`: fetch completion, decode, processing, cache

use super::client::{ImageLoader, LoaderSnapshot};
use super::message::Message;
use super::operation::{LoadOperation, OperationId};
use super::pipeline::Pipeline;
use super::queues::{DecodeJob, DecodeWorker, ProcessingQueue};
use super::task::{TaskEvent, TaskId, TaskSeed};
use crate::command::CommandExecutor;
use crate::config::LoaderConfig;
use crate::key::{KeyEquivalence, KeyTable, RequestKey};
use crate::request::{Priority, Request};
use crate::telemetry::{LoaderEvent, LoaderStats, NullTelemetrySink, TelemetrySink};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Number of messages handled between yield points (scheduler fairness).
pub(crate) const YIELD_EVERY_N_MESSAGES: u64 = 64;

// =============================================================================
// Task Entry
// =============================================================================

/// Coordinator-side state of a registered task.
pub(crate) struct TaskEntry {
    pub request: Arc<Request>,
    pub priority: Priority,
    /// The caller asked for partial images.
    pub partial_images: bool,
    pub events: mpsc::UnboundedSender<TaskEvent>,
    /// Operation the task is attached to. Not owning: the arena owns it.
    pub operation: Option<OperationId>,
    /// Cancels the task's processing jobs.
    pub processing: CancellationToken,
    pub preheat: bool,
    /// Next partial-image sequence number to hand out.
    pub next_partial: u64,
    /// Sequence number of the last partial image delivered.
    pub delivered_partial: Option<u64>,
    /// Processing group waiting on the final image, if any.
    pub group: Option<u64>,
    pub started: Instant,
}

impl TaskEntry {
    pub fn new(seed: &TaskSeed, request: Arc<Request>) -> Self {
        Self {
            request,
            priority: seed.priority,
            partial_images: seed.partial_images,
            events: seed.events.clone(),
            operation: None,
            processing: CancellationToken::new(),
            preheat: seed.preheat,
            next_partial: 0,
            delivered_partial: None,
            group: None,
            started: Instant::now(),
        }
    }

    /// Returns true if partial images should be produced for this task.
    pub fn wants_partial_images(&self) -> bool {
        self.partial_images && self.request.options().allows_progressive_image
    }

    pub fn send(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}

// =============================================================================
// Processing Group
// =============================================================================

/// Tasks with cache-equivalent requests sharing one processing job.
pub(crate) struct ProcessingGroup {
    pub key: RequestKey,
    /// Request the result is stored under.
    pub request: Arc<Request>,
    pub tasks: Vec<TaskId>,
    /// Fired once no task in the group is left.
    pub cancellation: CancellationToken,
}

// =============================================================================
// Load Coordinator
// =============================================================================

/// The single-writer owner of all load state.
///
/// Every table below is touched only from [`run`](Self::run); collaborators
/// and callers reach it by message.
pub struct LoadCoordinator {
    /// Configuration.
    pub(crate) config: LoaderConfig,

    /// Fetcher, decoder, processor, cache.
    pub(crate) pipeline: Pipeline,

    /// Registered tasks by id.
    pub(crate) executing: HashMap<TaskId, TaskEntry>,

    /// Fetch key to in-flight operation.
    pub(crate) operations: KeyTable<OperationId>,

    /// In-flight operations by id.
    pub(crate) arena: HashMap<OperationId, LoadOperation>,

    /// Cache key to preheating task.
    pub(crate) preheating: KeyTable<TaskId>,

    /// Final-image processing in flight by group id.
    pub(crate) groups: HashMap<u64, ProcessingGroup>,

    /// Cache key to in-flight processing group.
    pub(crate) processing_keys: KeyTable<u64>,

    /// Sender handed to collaborators and workers.
    pub(crate) messages_tx: mpsc::UnboundedSender<Message>,

    /// Receiver for every message.
    pub(crate) messages_rx: mpsc::UnboundedReceiver<Message>,

    /// Serial decode queue.
    pub(crate) decode_tx: mpsc::UnboundedSender<DecodeJob>,

    /// Taken by `run` to start the decode worker.
    decode_rx: Option<mpsc::UnboundedReceiver<DecodeJob>>,

    /// Processing pool; absent without a processor.
    pub(crate) processing: Option<ProcessingQueue>,

    /// Paces transport commands for fetchers that opt in.
    pub(crate) commands: CommandExecutor,

    /// Telemetry sink for emitting events.
    pub(crate) telemetry: Arc<dyn TelemetrySink>,

    /// Running counters.
    pub(crate) stats: LoaderStats,

    /// Task id source shared with [`ImageLoader`].
    pub(crate) next_task: Arc<AtomicU64>,

    pub(crate) next_operation: u64,
    pub(crate) next_decoder: u64,
    pub(crate) next_group: u64,

    /// Set by invalidation; later starts are dropped.
    pub(crate) invalidated: bool,

    /// Messages handled, for periodic yield.
    message_count: u64,
}

impl LoadCoordinator {
    /// Creates a new coordinator and the loader handle that feeds it.
    pub fn new(config: LoaderConfig, pipeline: Pipeline) -> (Self, ImageLoader) {
        Self::with_telemetry(config, pipeline, Arc::new(NullTelemetrySink))
    }

    /// Creates a new coordinator with a telemetry sink.
    pub fn with_telemetry(
        config: LoaderConfig,
        pipeline: Pipeline,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> (Self, ImageLoader) {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (decode_tx, decode_rx) = mpsc::unbounded_channel();
        let equivalence: Arc<dyn KeyEquivalence> = pipeline.equivalence();
        let next_task = Arc::new(AtomicU64::new(1));

        let processing = pipeline.processor().map(|processor| {
            ProcessingQueue::new(
                Arc::clone(processor),
                config.max_concurrent_processing(),
                messages_tx.clone(),
            )
        });

        let commands = CommandExecutor::new(config.commands());

        let loader = ImageLoader::new(messages_tx.clone(), Arc::clone(&next_task));
        let coordinator = Self {
            config,
            pipeline,
            executing: HashMap::new(),
            operations: KeyTable::new(Arc::clone(&equivalence)),
            arena: HashMap::new(),
            preheating: KeyTable::new(Arc::clone(&equivalence)),
            groups: HashMap::new(),
            processing_keys: KeyTable::new(equivalence),
            messages_tx,
            messages_rx,
            decode_tx,
            decode_rx: Some(decode_rx),
            processing,
            commands,
            telemetry,
            stats: LoaderStats::default(),
            next_task,
            next_operation: 1,
            next_decoder: 1,
            next_group: 1,
            invalidated: false,
            message_count: 0,
        };
        (coordinator, loader)
    }

    /// Runs the coordinator until shutdown is signalled.
    ///
    /// On shutdown every task is cancelled and every fetch handle is
    /// cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Some(jobs) = self.decode_rx.take() {
            let worker = DecodeWorker::new(
                jobs,
                Arc::clone(self.pipeline.decoder()),
                self.messages_tx.clone(),
            );
            tokio::spawn(worker.run());
        }

        info!(
            progressive_decoding = self.config.progressive_decoding(),
            max_concurrent_processing = self.config.max_concurrent_processing(),
            "Load coordinator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.shutdown();
                    break;
                }

                Some(message) = self.messages_rx.recv() => {
                    self.handle_message(message);
                }
            }

            self.maybe_yield().await;
        }
    }

    /// Handles one message. All state changes funnel through here.
    pub(crate) fn handle_message(&mut self, message: Message) {
        match message {
            Message::Start(seed) => self.start_task(seed),
            Message::Cancel(task) => self.cancel_task(task),
            Message::SetPriority { task, priority } => self.set_task_priority(task, priority),
            Message::StartPreheating(requests) => self.start_preheating(requests),
            Message::StopPreheating(requests) => self.stop_preheating(requests),
            Message::StopPreheatingAll => self.stop_preheating_all(),
            Message::InvalidateAndCancel => self.invalidate_and_cancel(),
            Message::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Message::FetchProgress {
                operation,
                data,
                completed,
                total,
            } => self.handle_fetch_progress(operation, data, completed, total),
            Message::FetchCompleted { operation, result } => {
                self.handle_fetch_completed(operation, result)
            }
            Message::Decoded { operation, image } => self.handle_decoded(operation, image),
            Message::PartialDecoded {
                operation,
                decoder,
                image,
            } => self.handle_partial_decoded(operation, decoder, image),
            Message::Processed { group, image } => self.handle_processed(group, image),
            Message::PartialProcessed {
                task,
                sequence,
                image,
            } => self.handle_partial_processed(task, sequence, image),
        }
    }

    /// Returns the current table sizes and counters.
    pub(crate) fn snapshot(&self) -> LoaderSnapshot {
        LoaderSnapshot {
            executing_tasks: self.executing.len(),
            load_operations: self.arena.len(),
            preheating_tasks: self.preheating.len(),
            stats: self.stats,
        }
    }

    pub(crate) fn emit(&self, event: LoaderEvent) {
        self.telemetry.emit(event);
    }

    /// Cancels everything in flight.
    fn shutdown(&mut self) {
        let tasks = self.executing.len();
        let operations = self.arena.len();
        self.cancel_all();
        info!(tasks, operations, "Load coordinator shut down");
    }

    async fn maybe_yield(&mut self) {
        self.message_count = self.message_count.wrapping_add(1);
        if self.message_count % YIELD_EVERY_N_MESSAGES == 0 {
            trace!(messages = self.message_count, "Coordinator yielding");
            tokio::task::yield_now().await;
        }
    }
}

impl std::fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("config", &self.config)
            .field("executing", &self.executing.len())
            .field("operations", &self.arena.len())
            .field("preheating", &self.preheating.len())
            .field("processing_groups", &self.groups.len())
            .field("invalidated", &self.invalidated)
            .finish()
    }
}
