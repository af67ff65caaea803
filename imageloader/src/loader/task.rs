//! Caller-side task handles.
//!
//! An [`ImageTask`] is one caller's interest in one request. It starts
//! suspended; [`ImageTask::resume`] registers it with the coordinator, after
//! which events arrive on the task's own channel:
//!
//! ```text
//! Progress* ─► PartialImage* ─► Completed      (interleaved, Completed last)
//! ```
//!
//! `Completed` is delivered at most once. A cancelled task receives nothing
//! further: its channel simply closes.

use super::client::ImageLoader;
use super::message::Message;
use crate::error::LoadError;
use crate::request::{Priority, Request};
use crate::traits::Image;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier of a task within one loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Final outcome of a task.
///
/// `image` and `error` are independent: an empty payload or an undecodable
/// one completes with neither.
#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub image: Option<Image>,
    pub error: Option<LoadError>,
    /// True when the image came from the cache rather than a fetch.
    pub from_cache: bool,
}

impl LoadResponse {
    pub(crate) fn new(image: Option<Image>, error: Option<LoadError>, from_cache: bool) -> Self {
        Self {
            image,
            error,
            from_cache,
        }
    }

    pub(crate) fn loaded(image: Image) -> Self {
        Self::new(Some(image), None, false)
    }

    pub(crate) fn cached(image: Image) -> Self {
        Self::new(Some(image), None, true)
    }

    pub(crate) fn failed(error: LoadError) -> Self {
        Self::new(None, Some(error), false)
    }

    /// Returns true if an image was produced.
    pub fn is_success(&self) -> bool {
        self.image.is_some()
    }
}

/// Event delivered to a task.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Unit counts of the shared fetch. Never decreasing for one task.
    Progress { completed: u64, total: u64 },
    /// A partial image decoded from an incomplete download.
    PartialImage(Image),
    /// The final response. Always the last event.
    Completed(LoadResponse),
}

/// Caller-visible task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Created but not yet resumed.
    #[default]
    Suspended,
    /// Registered with the coordinator.
    Running,
    /// Cancelled by the caller.
    Cancelled,
    /// The `Completed` event was received.
    Completed,
}

impl TaskState {
    /// Returns true if the task will not change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed)
    }
}

// =============================================================================
// Task Seed
// =============================================================================

/// Everything the coordinator needs to register a task.
pub(crate) struct TaskSeed {
    pub id: TaskId,
    pub request: Request,
    pub priority: Priority,
    pub partial_images: bool,
    pub events: mpsc::UnboundedSender<TaskEvent>,
    pub preheat: bool,
}

// =============================================================================
// Image Task
// =============================================================================

/// One caller's interest in loading a request.
pub struct ImageTask {
    id: TaskId,
    request: Arc<Request>,
    priority: Priority,
    partial_images: bool,
    state: TaskState,
    loader: ImageLoader,
    /// Taken when the task is resumed.
    events_tx: Option<mpsc::UnboundedSender<TaskEvent>>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
}

impl ImageTask {
    pub(crate) fn new(id: TaskId, request: Request, loader: ImageLoader) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let priority = request.options().priority;
        Self {
            id,
            request: Arc::new(request),
            priority,
            partial_images: false,
            state: TaskState::Suspended,
            loader,
            events_tx: Some(events_tx),
            events_rx,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Opts in to partial images.
    ///
    /// Only honoured when the request also allows progressive images and the
    /// loader has progressive decoding enabled. Must be set before
    /// [`resume`](Self::resume).
    pub fn with_partial_images(mut self, enabled: bool) -> Self {
        self.partial_images = enabled;
        self
    }

    /// Registers the task with the coordinator. No-op unless suspended.
    pub fn resume(&mut self) {
        if self.state != TaskState::Suspended {
            return;
        }
        let Some(events) = self.events_tx.take() else {
            return;
        };
        self.state = TaskState::Running;
        self.loader.send(Message::Start(TaskSeed {
            id: self.id,
            request: (*self.request).clone(),
            priority: self.priority,
            partial_images: self.partial_images,
            events,
            preheat: false,
        }));
    }

    /// Cancels the task.
    ///
    /// No further events are delivered; a completion already queued in the
    /// channel is discarded. No-op once completed.
    pub fn cancel(&mut self) {
        match self.state {
            TaskState::Suspended => {
                self.events_tx = None;
            }
            TaskState::Running => {
                self.loader.send(Message::Cancel(self.id));
            }
            TaskState::Cancelled | TaskState::Completed => return,
        }
        self.state = TaskState::Cancelled;
        self.events_rx.close();
    }

    /// Changes the task's priority.
    pub fn set_priority(&mut self, priority: Priority) {
        if self.priority == priority {
            return;
        }
        self.priority = priority;
        if self.state == TaskState::Running {
            self.loader.send(Message::SetPriority {
                task: self.id,
                priority,
            });
        }
    }

    /// Returns a cloneable control handle for this task.
    pub fn control(&self) -> TaskControl {
        TaskControl {
            id: self.id,
            loader: self.loader.clone(),
        }
    }

    /// Receives the next event.
    ///
    /// Returns `None` once the task has completed or been cancelled.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        if self.state.is_terminal() {
            return None;
        }
        let event = self.events_rx.recv().await;
        match &event {
            Some(TaskEvent::Completed(_)) => self.state = TaskState::Completed,
            Some(_) => {}
            // Channel closed without completion: the loader dropped the task
            // (invalidation or shutdown).
            None => self.state = TaskState::Cancelled,
        }
        event
    }

    /// Receives the next event without waiting.
    pub fn try_next_event(&mut self) -> Option<TaskEvent> {
        if self.state.is_terminal() {
            return None;
        }
        let event = self.events_rx.try_recv().ok();
        if matches!(event, Some(TaskEvent::Completed(_))) {
            self.state = TaskState::Completed;
        }
        event
    }

    /// Resumes the task if needed and waits for its response, skipping
    /// progress and partial images.
    ///
    /// Returns `None` if the task was cancelled.
    pub async fn wait(&mut self) -> Option<LoadResponse> {
        self.resume();
        while let Some(event) = self.next_event().await {
            if let TaskEvent::Completed(response) = event {
                return Some(response);
            }
        }
        None
    }
}

/// Dropping a running task cancels it.
impl Drop for ImageTask {
    fn drop(&mut self) {
        if self.state == TaskState::Running {
            self.loader.send(Message::Cancel(self.id));
        }
    }
}

impl fmt::Debug for ImageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTask")
            .field("id", &self.id)
            .field("resource", self.request.resource())
            .field("priority", &self.priority)
            .field("state", &self.state)
            .finish()
    }
}

// =============================================================================
// Task Control
// =============================================================================

/// Cloneable handle that can cancel or reprioritise a running task from
/// elsewhere.
#[derive(Clone)]
pub struct TaskControl {
    id: TaskId,
    loader: ImageLoader,
}

impl TaskControl {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Cancels the task. The owning [`ImageTask`] sees its channel close.
    pub fn cancel(&self) {
        self.loader.send(Message::Cancel(self.id));
    }

    pub fn set_priority(&self, priority: Priority) {
        self.loader.send(Message::SetPriority {
            task: self.id,
            priority,
        });
    }
}

impl fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControl").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_task(request: Request) -> (ImageTask, mpsc::UnboundedReceiver<Message>) {
        let (loader, messages) = ImageLoader::detached();
        (loader.task(request), messages)
    }

    #[test]
    fn test_task_starts_suspended() {
        let (task, mut messages) = detached_task(Request::new("a"));
        assert_eq!(task.state(), TaskState::Suspended);
        assert_eq!(task.priority(), Priority::Normal);
        assert!(messages.try_recv().is_err());
    }

    #[test]
    fn test_resume_sends_start_once() {
        let (mut task, mut messages) = detached_task(Request::new("a"));
        task.resume();
        task.resume();

        assert!(matches!(messages.try_recv(), Ok(Message::Start(_))));
        assert!(messages.try_recv().is_err());
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn test_cancel_before_resume_sends_nothing() {
        let (mut task, mut messages) = detached_task(Request::new("a"));
        task.cancel();
        task.resume();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(messages.try_recv().is_err());
    }

    #[test]
    fn test_priority_change_before_resume_is_carried_by_seed() {
        let (mut task, mut messages) = detached_task(Request::new("a"));
        task.set_priority(Priority::High);
        assert!(messages.try_recv().is_err());

        task.resume();
        match messages.try_recv() {
            Ok(Message::Start(seed)) => assert_eq!(seed.priority, Priority::High),
            _ => panic!("expected start message"),
        }
    }

    #[test]
    fn test_partial_images_flag_is_carried_by_seed() {
        let (task, mut messages) = detached_task(Request::new("a"));
        let mut task = task.with_partial_images(true);
        task.resume();
        match messages.try_recv() {
            Ok(Message::Start(seed)) => assert!(seed.partial_images),
            _ => panic!("expected start message"),
        }
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let (mut task, mut messages) = detached_task(Request::new("a"));
        task.resume();
        let seed = match messages.try_recv() {
            Ok(Message::Start(seed)) => seed,
            _ => panic!("expected start message"),
        };

        seed.events
            .send(TaskEvent::Progress {
                completed: 1,
                total: 2,
            })
            .unwrap();
        seed.events
            .send(TaskEvent::Completed(LoadResponse::new(None, None, false)))
            .unwrap();

        assert!(matches!(
            task.next_event().await,
            Some(TaskEvent::Progress { .. })
        ));
        assert!(matches!(
            task.next_event().await,
            Some(TaskEvent::Completed(_))
        ));
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_events() {
        let (mut task, mut messages) = detached_task(Request::new("a"));
        task.resume();
        let seed = match messages.try_recv() {
            Ok(Message::Start(seed)) => seed,
            _ => panic!("expected start message"),
        };
        let _ = seed
            .events
            .send(TaskEvent::Completed(LoadResponse::new(None, None, false)));

        task.cancel();
        assert!(matches!(messages.try_recv(), Ok(Message::Cancel(_))));
        assert!(task.wait().await.is_none());
    }
}
