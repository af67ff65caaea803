//! Task lifecycle: start, attach, cancel, priority, preheating.

use super::core::{LoadCoordinator, TaskEntry};
use super::message::FetchSink;
use super::operation::{LoadOperation, OperationId};
use super::task::{LoadResponse, TaskEvent, TaskId, TaskSeed};
use crate::error::LoadError;
use crate::key::RequestKey;
use crate::request::{Priority, Request};
use crate::telemetry::{CacheStage, LoaderEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

impl LoadCoordinator {
    // =========================================================================
    // Start
    // =========================================================================

    /// Registers a task and routes it to the cache or a fetch.
    pub(crate) fn start_task(&mut self, seed: TaskSeed) {
        let id = seed.id;
        if self.invalidated {
            debug!(task = %id, "Loader invalidated, dropping start");
            return;
        }
        if self.executing.contains_key(&id) {
            trace!(task = %id, "Task already registered");
            return;
        }

        let fetcher = Arc::clone(self.pipeline.fetcher());
        let request = Arc::new(fetcher.canonical_request(seed.request.clone()));
        self.executing
            .insert(id, TaskEntry::new(&seed, Arc::clone(&request)));
        self.stats.tasks_started += 1;
        self.emit(LoaderEvent::TaskStarted {
            task: id,
            resource: request.resource().clone(),
        });

        if !fetcher.can_handle(&request) {
            debug!(task = %id, resource = %request.resource(), "No fetcher for request");
            let error = LoadError::Unsupported {
                resource: request.resource().to_string(),
            };
            self.finish_task(id, LoadResponse::failed(error));
            return;
        }

        if request.options().cache_policy.allows_lookup() {
            if let Some(image) = self.cached_image(&request) {
                debug!(task = %id, resource = %request.resource(), "Served from cache");
                self.stats.cache_hits += 1;
                self.emit(LoaderEvent::CacheHit {
                    task: id,
                    stage: CacheStage::Start,
                });
                self.finish_task(id, LoadResponse::cached(image));
                return;
            }
        }

        let key = RequestKey::fetch(request);
        match self.operations.get(&key).copied() {
            Some(operation) => {
                debug!(task = %id, operation = %operation, "Joining in-flight fetch");
                self.stats.tasks_coalesced += 1;
                self.emit(LoaderEvent::TaskCoalesced {
                    task: id,
                    operation,
                });
                self.attach(id, operation);
            }
            None => {
                let operation = self.start_operation(key);
                self.attach(id, operation);
            }
        }
    }

    /// Starts a fetch for `key` and registers the operation.
    fn start_operation(&mut self, key: RequestKey) -> OperationId {
        let id = OperationId(self.next_operation);
        self.next_operation += 1;

        let sink = FetchSink::new(id, self.messages_tx.clone(), self.commands.clone());
        let handle = self.pipeline.fetcher().start(key.request(), sink);

        debug!(operation = %id, resource = %key.request().resource(), "Fetch started");
        self.stats.fetches_started += 1;
        self.emit(LoaderEvent::FetchStarted {
            operation: id,
            resource: key.request().resource().clone(),
        });

        self.operations.insert(key.clone(), id);
        self.arena.insert(id, LoadOperation::new(id, key, handle));
        id
    }

    /// Attaches a task to an operation.
    ///
    /// A newcomer to an operation that already reported progress gets the
    /// current counts immediately, and resumes progressive decoding if it
    /// wants partial images.
    fn attach(&mut self, task: TaskId, operation: OperationId) {
        let Some(op) = self.arena.get_mut(&operation) else {
            return;
        };
        let Some(entry) = self.executing.get_mut(&task) else {
            return;
        };
        if !op.attach(task) {
            return;
        }
        entry.operation = Some(operation);

        if op.has_progress() {
            entry.send(TaskEvent::Progress {
                completed: op.completed,
                total: op.total,
            });
        }
        let wants_partial = entry.wants_partial_images();

        let resumed = match op.progressive.as_mut() {
            Some(decoder) if wants_partial && !decoder.is_resumed() => {
                decoder.resume();
                true
            }
            _ => false,
        };
        if resumed {
            self.schedule_partial_decode(operation);
        }
        self.refresh_priority(operation);
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Removes a task; cancels its fetch if nobody else is waiting on it,
    /// and its processing job if no other task in the group wants it.
    pub(crate) fn cancel_task(&mut self, task: TaskId) {
        let Some(entry) = self.executing.remove(&task) else {
            trace!(task = %task, "Cancel for unknown task");
            return;
        };
        debug!(task = %task, "Task cancelled");
        self.stats.tasks_cancelled += 1;
        self.emit(LoaderEvent::TaskCancelled { task });

        entry.processing.cancel();
        if let Some(group) = entry.group {
            self.leave_group(task, group);
        }
        if entry.preheat {
            self.preheating.retain(|_, t| *t != task);
        }
        if let Some(operation) = entry.operation {
            self.detach(task, operation);
        }
    }

    fn detach(&mut self, task: TaskId, operation: OperationId) {
        let Some(op) = self.arena.get_mut(&operation) else {
            return;
        };
        op.detach(task);
        if !op.tasks.is_empty() {
            self.refresh_priority(operation);
            return;
        }

        op.handle.cancel();
        self.remove_operation(operation);
        debug!(operation = %operation, "Fetch cancelled, no tasks left");
        self.stats.fetches_cancelled += 1;
        self.emit(LoaderEvent::FetchCancelled { operation });
    }

    /// Removes an operation from the arena and the key table.
    pub(crate) fn remove_operation(&mut self, operation: OperationId) -> Option<LoadOperation> {
        let op = self.arena.remove(&operation)?;
        if self.operations.get(&op.key) == Some(&operation) {
            self.operations.remove(&op.key);
        }
        Some(op)
    }

    /// Cancels every task. Fetches are cancelled as they empty.
    pub(crate) fn cancel_all(&mut self) {
        let tasks: Vec<TaskId> = self.executing.keys().copied().collect();
        for task in tasks {
            self.cancel_task(task);
        }
        // Nothing should remain here, but no fetch may outlive the loop.
        for (_, op) in self.arena.drain() {
            op.handle.cancel();
        }
        self.operations.drain();
        self.preheating.drain();
        for (_, group) in self.groups.drain() {
            group.cancellation.cancel();
        }
        self.processing_keys.drain();
    }

    // =========================================================================
    // Priority
    // =========================================================================

    pub(crate) fn set_task_priority(&mut self, task: TaskId, priority: Priority) {
        let Some(entry) = self.executing.get_mut(&task) else {
            return;
        };
        entry.priority = priority;
        if let Some(operation) = entry.operation {
            self.refresh_priority(operation);
        }
    }

    /// Pushes the highest attached task priority to the fetch handle.
    pub(crate) fn refresh_priority(&mut self, operation: OperationId) {
        let Some(op) = self.arena.get_mut(&operation) else {
            return;
        };
        let priority = Priority::max_of(
            op.tasks
                .iter()
                .filter_map(|task| self.executing.get(task))
                .map(|entry| entry.priority),
        );
        if op.push_priority(priority) {
            trace!(operation = %operation, priority = %priority, "Fetch priority updated");
        }
    }

    // =========================================================================
    // Preheating
    // =========================================================================

    /// Starts one preheating task per request not already preheating.
    pub(crate) fn start_preheating(&mut self, requests: Vec<Request>) {
        if self.invalidated {
            debug!("Loader invalidated, ignoring preheat");
            return;
        }
        let priority = self.config.preheating_priority();
        for request in requests {
            let canonical = Arc::new(self.pipeline.fetcher().canonical_request(request.clone()));
            let key = RequestKey::cache(canonical);
            if self.preheating.get(&key).is_some() {
                continue;
            }

            let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
            let (events, _) = mpsc::unbounded_channel();
            self.preheating.insert(key, id);
            debug!(task = %id, resource = %request.resource(), "Preheating");
            self.start_task(TaskSeed {
                id,
                request,
                priority,
                partial_images: false,
                events,
                preheat: true,
            });
        }
    }

    pub(crate) fn stop_preheating(&mut self, requests: Vec<Request>) {
        for request in requests {
            let canonical = Arc::new(self.pipeline.fetcher().canonical_request(request));
            if let Some(task) = self.preheating.remove(&RequestKey::cache(canonical)) {
                self.cancel_task(task);
            }
        }
    }

    pub(crate) fn stop_preheating_all(&mut self) {
        for task in self.preheating.drain() {
            self.cancel_task(task);
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Cancels every task and rejects later starts.
    pub(crate) fn invalidate_and_cancel(&mut self) {
        debug!(tasks = self.executing.len(), "Invalidating loader");
        self.invalidated = true;
        self.cancel_all();
    }
}
