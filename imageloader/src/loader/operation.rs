//! In-flight fetch shared by coalesced tasks.

use super::progressive::ProgressiveDecoder;
use super::task::TaskId;
use crate::key::RequestKey;
use crate::request::Priority;
use crate::traits::FetchHandle;
use std::fmt;
use tokio::time::Instant;

/// Unique identifier of a load operation within one loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u64);

impl OperationId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// One fetch and the tasks waiting on it.
///
/// Tasks are kept in attach order, which is also the order completions are
/// fanned out in.
pub(crate) struct LoadOperation {
    pub id: OperationId,
    /// Fetch key the operation is registered under.
    pub key: RequestKey,
    pub handle: Box<dyn FetchHandle>,
    pub tasks: Vec<TaskId>,
    pub completed: u64,
    pub total: u64,
    pub progressive: Option<ProgressiveDecoder>,
    /// Last priority pushed to the handle.
    priority: Option<Priority>,
    /// Set once the fetch reported its final result.
    pub finishing: bool,
    pub started: Instant,
}

impl LoadOperation {
    pub fn new(id: OperationId, key: RequestKey, handle: Box<dyn FetchHandle>) -> Self {
        Self {
            id,
            key,
            handle,
            tasks: Vec::new(),
            completed: 0,
            total: 0,
            progressive: None,
            priority: None,
            finishing: false,
            started: Instant::now(),
        }
    }

    /// Adds a task. Returns false if it was already attached.
    pub fn attach(&mut self, task: TaskId) -> bool {
        if self.tasks.contains(&task) {
            return false;
        }
        self.tasks.push(task);
        true
    }

    /// Removes a task. Returns false if it was not attached.
    pub fn detach(&mut self, task: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| *t != task);
        self.tasks.len() != before
    }

    pub fn has_progress(&self) -> bool {
        self.completed > 0 || self.total > 0
    }

    /// Records fetcher progress.
    ///
    /// Counts never move backwards, so every attached task observes a
    /// non-decreasing sequence. Returns the counts to broadcast.
    pub fn update_progress(&mut self, completed: u64, total: u64) -> (u64, u64) {
        self.completed = self.completed.max(completed);
        self.total = self.total.max(total);
        (self.completed, self.total)
    }

    /// Pushes `priority` to the fetch handle if it changed.
    pub fn push_priority(&mut self, priority: Priority) -> bool {
        if self.priority == Some(priority) {
            return false;
        }
        self.priority = Some(priority);
        self.handle.set_priority(priority);
        true
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }
}

impl fmt::Debug for LoadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOperation")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("tasks", &self.tasks)
            .field("completed", &self.completed)
            .field("total", &self.total)
            .field("priority", &self.priority)
            .field("finishing", &self.finishing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingHandle {
        priorities: Arc<Mutex<Vec<Priority>>>,
    }

    impl FetchHandle for RecordingHandle {
        fn cancel(&self) {}

        fn set_priority(&self, priority: Priority) {
            self.priorities.lock().push(priority);
        }
    }

    fn operation() -> (LoadOperation, Arc<Mutex<Vec<Priority>>>) {
        let handle = RecordingHandle::default();
        let priorities = Arc::clone(&handle.priorities);
        let key = RequestKey::fetch(Arc::new(Request::new("a")));
        (
            LoadOperation::new(OperationId(1), key, Box::new(handle)),
            priorities,
        )
    }

    #[test]
    fn test_attach_is_idempotent_and_ordered() {
        let (mut op, _) = operation();
        assert!(op.attach(TaskId(2)));
        assert!(op.attach(TaskId(1)));
        assert!(!op.attach(TaskId(2)));
        assert_eq!(op.tasks, vec![TaskId(2), TaskId(1)]);

        assert!(op.detach(TaskId(2)));
        assert!(!op.detach(TaskId(2)));
        assert_eq!(op.tasks, vec![TaskId(1)]);
    }

    #[test]
    fn test_progress_never_decreases() {
        let (mut op, _) = operation();
        assert!(!op.has_progress());
        assert_eq!(op.update_progress(5, 10), (5, 10));
        assert_eq!(op.update_progress(3, 10), (5, 10));
        assert_eq!(op.update_progress(8, 10), (8, 10));
        assert!(op.has_progress());
    }

    #[test]
    fn test_priority_pushed_only_on_change() {
        let (mut op, priorities) = operation();
        assert!(op.push_priority(Priority::Low));
        assert!(!op.push_priority(Priority::Low));
        assert!(op.push_priority(Priority::High));

        assert_eq!(*priorities.lock(), vec![Priority::Low, Priority::High]);
        assert_eq!(op.priority(), Some(Priority::High));
    }
}
