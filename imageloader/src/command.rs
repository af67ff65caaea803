//! Paced execution of transport commands.
//!
//! Transport handles (network session tasks and the like) are expensive to
//! resume and cancel. During fast scrolling a UI can start and cancel
//! hundreds of loads per second, and that churn can destabilise the
//! transport layer. The [`CommandExecutor`] sits between fetchers and their
//! handles:
//!
//! - every command runs on one serial worker, in submission order
//! - after each command the worker pauses for a fixed interval
//! - a cancel for a handle whose earlier command has not run yet removes
//!   that command instead of queueing, as if it was never requested
//!
//! The worker exits when the queue is empty after a pause and is respawned
//! on the next submission.
//!
//! # Example
//!
//! ```ignore
//! use imageloader::command::{CommandExecutor, PacedHandle};
//!
//! let executor = CommandExecutor::new(CommandConfig::default());
//!
//! // In Fetcher::start
//! let transport: Arc<dyn TransportHandle> = Arc::new(session.task(url));
//! Box::new(PacedHandle::start(executor.clone(), transport))
//! ```

use crate::config::CommandConfig;
use crate::request::Priority;
use crate::traits::FetchHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// =============================================================================
// Commands
// =============================================================================

/// An underlying transport operation that can be resumed and cancelled.
pub trait TransportHandle: Send + Sync + 'static {
    fn resume(&self);

    fn cancel(&self);

    /// Forwarded directly, not paced.
    fn set_priority(&self, _priority: Priority) {}
}

/// Kind of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Resume,
    Cancel,
}

/// A command against a transport handle.
///
/// Handles are identified by their `Arc` allocation.
#[derive(Clone)]
pub enum Command {
    Resume(Arc<dyn TransportHandle>),
    Cancel(Arc<dyn TransportHandle>),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Resume(_) => CommandKind::Resume,
            Command::Cancel(_) => CommandKind::Cancel,
        }
    }

    pub fn handle(&self) -> &Arc<dyn TransportHandle> {
        match self {
            Command::Resume(h) | Command::Cancel(h) => h,
        }
    }

    fn targets(&self, handle: &Arc<dyn TransportHandle>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(self.handle()), Arc::as_ptr(handle))
    }

    fn execute(&self) {
        match self {
            Command::Resume(h) => h.resume(),
            Command::Cancel(h) => h.cancel(),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command")
            .field(&self.kind())
            .field(&Arc::as_ptr(self.handle()).cast::<()>())
            .finish()
    }
}

// =============================================================================
// Command Executor
// =============================================================================

/// Serial, rate-limited dispatcher for transport commands.
///
/// Cloneable; all clones share one queue and one worker.
#[derive(Clone)]
pub struct CommandExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    state: Mutex<QueueState>,
    interval: Duration,
    executed: AtomicU64,
    absorbed: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Command>,
    running: bool,
}

impl CommandExecutor {
    /// Creates an executor with the configured pacing interval.
    pub fn new(config: CommandConfig) -> Self {
        Self::with_interval(config.interval())
    }

    /// Creates an executor that pauses `interval` between commands.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                state: Mutex::new(QueueState::default()),
                interval,
                executed: AtomicU64::new(0),
                absorbed: AtomicU64::new(0),
            }),
        }
    }

    /// Submits a command.
    ///
    /// A cancel for a handle with a pending resume removes the resume and is
    /// itself dropped. A cancel for a handle that already has a cancel
    /// pending is dropped.
    ///
    /// Must be called from within a Tokio runtime: the worker is spawned
    /// lazily on the current runtime.
    pub fn submit(&self, command: Command) {
        let mut state = self.inner.state.lock();

        if command.kind() == CommandKind::Cancel {
            let handle = command.handle();
            if state
                .pending
                .iter()
                .any(|p| p.kind() == CommandKind::Cancel && p.targets(handle))
            {
                trace!("Cancel already pending, duplicate dropped");
                return;
            }
            let before = state.pending.len();
            state
                .pending
                .retain(|p| !(p.kind() == CommandKind::Resume && p.targets(handle)));
            let removed = before - state.pending.len();
            if removed > 0 {
                self.inner
                    .absorbed
                    .fetch_add(removed as u64, Ordering::Relaxed);
                debug!(
                    removed,
                    pending = state.pending.len(),
                    "Cancel absorbed pending resume"
                );
                return;
            }
        }

        state.pending.push_back(command);
        trace!(pending = state.pending.len(), "Command queued");

        if !state.running {
            state.running = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }

    /// Number of commands waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of commands executed so far.
    pub fn executed_count(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    /// Number of pending resumes removed by a later cancel.
    pub fn absorbed_count(&self) -> u64 {
        self.inner.absorbed.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(CommandConfig::default())
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("interval", &self.inner.interval)
            .field("pending", &self.pending())
            .field("executed", &self.executed_count())
            .finish()
    }
}

/// Worker loop: run one command, pause, repeat until the queue is empty.
async fn drain(inner: Arc<ExecutorInner>) {
    loop {
        let command = {
            let mut state = inner.state.lock();
            match state.pending.pop_front() {
                Some(command) => command,
                None => {
                    state.running = false;
                    return;
                }
            }
        };

        command.execute();
        inner.executed.fetch_add(1, Ordering::Relaxed);
        trace!(kind = ?command.kind(), "Command executed");

        tokio::time::sleep(inner.interval).await;
    }
}

// =============================================================================
// Paced Handle
// =============================================================================

/// [`FetchHandle`] whose resume and cancel go through a [`CommandExecutor`].
pub struct PacedHandle {
    executor: CommandExecutor,
    transport: Arc<dyn TransportHandle>,
}

impl PacedHandle {
    /// Submits a resume for `transport` and returns the handle.
    pub fn start(executor: CommandExecutor, transport: Arc<dyn TransportHandle>) -> Self {
        executor.submit(Command::Resume(Arc::clone(&transport)));
        Self {
            executor,
            transport,
        }
    }
}

impl FetchHandle for PacedHandle {
    fn cancel(&self) {
        self.executor
            .submit(Command::Cancel(Arc::clone(&self.transport)));
    }

    fn set_priority(&self, priority: Priority) {
        self.transport.set_priority(priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    /// Records every command it receives with a timestamp.
    #[derive(Default)]
    struct RecordingTransport {
        log: Mutex<Vec<(CommandKind, Instant)>>,
    }

    impl RecordingTransport {
        fn kinds(&self) -> Vec<CommandKind> {
            self.log.lock().iter().map(|(k, _)| *k).collect()
        }
    }

    impl TransportHandle for RecordingTransport {
        fn resume(&self) {
            self.log.lock().push((CommandKind::Resume, Instant::now()));
        }

        fn cancel(&self) {
            self.log.lock().push((CommandKind::Cancel, Instant::now()));
        }
    }

    fn transport() -> (Arc<RecordingTransport>, Arc<dyn TransportHandle>) {
        let concrete = Arc::new(RecordingTransport::default());
        let handle: Arc<dyn TransportHandle> = concrete.clone();
        (concrete, handle)
    }

    async fn settle(executor: &CommandExecutor) {
        // Enough virtual time for every queued command to run.
        for _ in 0..20 {
            tokio::time::sleep(executor.interval() * 2).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_then_cancel_executes_nothing() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (recorder, handle) = transport();

        executor.submit(Command::Resume(Arc::clone(&handle)));
        executor.submit(Command::Cancel(handle));
        settle(&executor).await;

        assert!(recorder.kinds().is_empty());
        assert_eq!(executor.executed_count(), 0);
        assert_eq!(executor.absorbed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_resume_ran_is_executed() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (recorder, handle) = transport();

        executor.submit(Command::Resume(Arc::clone(&handle)));
        settle(&executor).await;
        executor.submit(Command::Cancel(handle));
        settle(&executor).await;

        assert_eq!(
            recorder.kinds(),
            vec![CommandKind::Resume, CommandKind::Cancel]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_cancel_keeps_queued_cancel() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (recorder, handle) = transport();
        let (other, other_handle) = transport();

        executor.submit(Command::Resume(Arc::clone(&handle)));
        settle(&executor).await;

        executor.submit(Command::Resume(other_handle));
        executor.submit(Command::Cancel(Arc::clone(&handle)));
        executor.submit(Command::Cancel(handle));
        assert_eq!(executor.pending(), 2);
        settle(&executor).await;

        assert_eq!(
            recorder.kinds(),
            vec![CommandKind::Resume, CommandKind::Cancel]
        );
        assert_eq!(other.kinds(), vec![CommandKind::Resume]);
        assert_eq!(executor.absorbed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_absorbs_same_handle() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (first, first_handle) = transport();
        let (second, second_handle) = transport();

        executor.submit(Command::Resume(Arc::clone(&first_handle)));
        executor.submit(Command::Resume(Arc::clone(&second_handle)));
        executor.submit(Command::Cancel(second_handle));
        settle(&executor).await;

        assert_eq!(first.kinds(), vec![CommandKind::Resume]);
        assert!(second.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_spaced_by_interval() {
        let interval = Duration::from_millis(5);
        let executor = CommandExecutor::with_interval(interval);
        let (recorder, handle) = transport();

        for _ in 0..3 {
            executor.submit(Command::Resume(Arc::clone(&handle)));
        }
        settle(&executor).await;

        let times: Vec<Instant> = recorder.log.lock().iter().map(|(_, t)| *t).collect();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_restarts_after_idle() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (recorder, handle) = transport();

        executor.submit(Command::Resume(Arc::clone(&handle)));
        settle(&executor).await;
        assert_eq!(executor.pending(), 0);

        executor.submit(Command::Resume(handle));
        settle(&executor).await;

        assert_eq!(recorder.kinds().len(), 2);
        assert_eq!(executor.executed_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_handle_routes_through_executor() {
        let executor = CommandExecutor::with_interval(Duration::from_millis(3));
        let (recorder, handle) = transport();

        let paced = PacedHandle::start(executor.clone(), handle);
        paced.cancel();
        settle(&executor).await;

        assert!(recorder.kinds().is_empty());
    }
}
