//! Caller-side loader handle.

use super::message::Message;
use super::task::{ImageTask, TaskId};
use crate::request::Request;
use crate::telemetry::LoaderStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle for creating tasks and steering the coordinator.
///
/// Every method is non-blocking and only queues a message; once the
/// coordinator has stopped, messages are dropped.
#[derive(Clone)]
pub struct ImageLoader {
    messages: mpsc::UnboundedSender<Message>,
    next_task: Arc<AtomicU64>,
}

impl ImageLoader {
    pub(crate) fn new(messages: mpsc::UnboundedSender<Message>, next_task: Arc<AtomicU64>) -> Self {
        Self {
            messages,
            next_task,
        }
    }

    /// Creates a loader that is not connected to a coordinator, returning
    /// the receiving end of its channel.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, Arc::new(AtomicU64::new(1))), rx)
    }

    pub(crate) fn send(&self, message: Message) {
        let _ = self.messages.send(message);
    }

    /// Creates a suspended task for `request`.
    pub fn task(&self, request: Request) -> ImageTask {
        let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        ImageTask::new(id, request, self.clone())
    }

    /// Creates a task for `request` and resumes it.
    pub fn load(&self, request: Request) -> ImageTask {
        let mut task = self.task(request);
        task.resume();
        task
    }

    /// Starts low-priority loads that warm the cache.
    ///
    /// Requests already being preheated (by cache key) are skipped.
    pub fn start_preheating(&self, requests: Vec<Request>) {
        self.send(Message::StartPreheating(requests));
    }

    /// Cancels the preheating tasks matching `requests` by cache key.
    pub fn stop_preheating(&self, requests: Vec<Request>) {
        self.send(Message::StopPreheating(requests));
    }

    pub fn stop_preheating_all(&self) {
        self.send(Message::StopPreheatingAll);
    }

    /// Cancels every task and rejects all later starts.
    ///
    /// Affected tasks see their event channel close without completion.
    pub fn invalidate_and_cancel(&self) {
        self.send(Message::InvalidateAndCancel);
    }

    /// Returns the coordinator's current state, or `None` if it has stopped.
    pub async fn snapshot(&self) -> Option<LoaderSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Snapshot(tx));
        rx.await.ok()
    }

    /// Returns true once the coordinator has stopped.
    pub fn is_closed(&self) -> bool {
        self.messages.is_closed()
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Point-in-time view of the coordinator's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSnapshot {
    /// Registered tasks, preheating included
    pub executing_tasks: usize,
    /// Fetches in flight
    pub load_operations: usize,
    /// Preheating tasks in flight
    pub preheating_tasks: usize,
    pub stats: LoaderStats,
}

impl LoaderSnapshot {
    /// Returns true if nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.executing_tasks == 0 && self.load_operations == 0
    }
}
