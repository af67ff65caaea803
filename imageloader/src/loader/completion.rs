//! Fetch completion: decode, grouped processing, cache, delivery.
//!
//! ```text
//! FetchCompleted ──► empty? ──yes──► complete(None, None)
//!       │              │
//!       │ error        no
//!       ▼              ▼
//! complete(None, e)  decode queue ──► Decoded ──► complete(image)
//!                                                     │
//!                             for each task, in attach order
//!                                                     ▼
//!                      should process? ──no──► store raw, deliver
//!                             │ yes
//!                             ▼
//!           equivalent group in flight? ──yes──► join group
//!                             │ no
//!                             ▼
//!                   cache hit? ──yes──► deliver cached
//!                             │ no
//!                             ▼
//!          new group ──► processing queue ──► Processed ──► store once,
//!                                                   deliver to the group
//! ```

use super::core::{LoadCoordinator, ProcessingGroup};
use super::operation::OperationId;
use super::queues::{DecodeJob, ProcessingJob, ProcessingTarget};
use super::task::{LoadResponse, TaskEvent, TaskId};
use crate::error::{FetchError, LoadError};
use crate::key::RequestKey;
use crate::request::Request;
use crate::telemetry::{CacheStage, LoaderEvent};
use crate::traits::{CachedImage, Image};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

impl LoadCoordinator {
    /// Handles the fetcher's final result. Only the first one counts.
    pub(crate) fn handle_fetch_completed(
        &mut self,
        operation: OperationId,
        result: Result<Bytes, FetchError>,
    ) {
        let Some(op) = self.arena.get_mut(&operation) else {
            trace!(operation = %operation, "Completion for finished operation");
            return;
        };
        if op.finishing {
            trace!(operation = %operation, "Duplicate completion ignored");
            return;
        }
        op.finishing = true;
        op.progressive = None;

        match result {
            Ok(data) if !data.is_empty() => {
                trace!(operation = %operation, bytes = data.len(), "Fetch finished, decoding");
                if self
                    .decode_tx
                    .send(DecodeJob::final_image(operation, data))
                    .is_err()
                {
                    warn!(operation = %operation, "Decode queue closed");
                    self.complete_operation(operation, None, None);
                }
            }
            Ok(_) => self.complete_operation(operation, None, None),
            Err(error) => {
                debug!(operation = %operation, error = %error, "Fetch failed");
                self.complete_operation(operation, None, Some(LoadError::FetchFailed(error)));
            }
        }
    }

    pub(crate) fn handle_decoded(&mut self, operation: OperationId, image: Option<Image>) {
        if image.is_none() {
            debug!(operation = %operation, "Decoder produced no image");
        }
        self.complete_operation(operation, image, None);
    }

    /// Removes the operation and completes its tasks in attach order.
    fn complete_operation(
        &mut self,
        operation: OperationId,
        image: Option<Image>,
        error: Option<LoadError>,
    ) {
        let Some(op) = self.remove_operation(operation) else {
            return;
        };
        debug!(
            operation = %operation,
            tasks = op.tasks.len(),
            success = image.is_some(),
            "Fetch completed"
        );
        self.emit(LoaderEvent::FetchCompleted {
            operation,
            tasks: op.tasks.len(),
            success: image.is_some(),
            duration: op.started.elapsed(),
        });

        for task in op.tasks {
            match self.executing.get_mut(&task) {
                Some(entry) => entry.operation = None,
                None => continue,
            }
            match &image {
                Some(image) => self.complete_with_image(task, Arc::clone(image)),
                None => self.finish_task(task, LoadResponse::new(None, error.clone(), false)),
            }
        }
    }

    /// Processes the image for one task, or delivers it as is.
    ///
    /// Tasks whose requests are cache-equivalent share one processing job:
    /// the first starts it, later ones join its group.
    fn complete_with_image(&mut self, task: TaskId, image: Image) {
        let Some(entry) = self.executing.get(&task) else {
            return;
        };
        let request = Arc::clone(&entry.request);

        let Some(queue) = self
            .processing
            .as_ref()
            .filter(|queue| queue.should_process(&image, &request, false))
        else {
            self.store(&request, Arc::clone(&image));
            self.finish_task(task, LoadResponse::loaded(image));
            return;
        };

        let key = RequestKey::cache(Arc::clone(&request));
        if let Some(group) = self.processing_keys.get(&key).copied() {
            if let Some(members) = self.groups.get_mut(&group) {
                trace!(task = %task, group, "Joining in-flight processing");
                members.tasks.push(task);
                if let Some(entry) = self.executing.get_mut(&task) {
                    entry.group = Some(group);
                }
                return;
            }
        }

        // An equivalent request may have been processed and cached while
        // this fetch ran.
        if request.options().cache_policy.allows_lookup() {
            if let Some(cached) = self.cached_image(&request) {
                trace!(task = %task, "Processed image found in cache");
                self.stats.cache_hits += 1;
                self.emit(LoaderEvent::CacheHit {
                    task,
                    stage: CacheStage::Processing,
                });
                self.finish_task(task, LoadResponse::cached(cached));
                return;
            }
        }

        let group = self.next_group;
        self.next_group += 1;
        let cancellation = CancellationToken::new();
        queue.submit(
            ProcessingJob {
                target: ProcessingTarget::Final { group },
                image,
                request: Arc::clone(&request),
            },
            cancellation.clone(),
        );
        trace!(task = %task, group, "Processing started");

        self.processing_keys.insert(key.clone(), group);
        self.groups.insert(
            group,
            ProcessingGroup {
                key,
                request,
                tasks: vec![task],
                cancellation,
            },
        );
        if let Some(entry) = self.executing.get_mut(&task) {
            entry.group = Some(group);
        }
    }

    /// Stores a processed image once and completes its whole group.
    pub(crate) fn handle_processed(&mut self, group: u64, image: Image) {
        let Some(members) = self.remove_group(group) else {
            trace!(group, "Processed image for abandoned group");
            return;
        };
        debug!(group, tasks = members.tasks.len(), "Processing finished");
        self.store(&members.request, Arc::clone(&image));
        for task in members.tasks {
            if let Some(entry) = self.executing.get_mut(&task) {
                entry.group = None;
            }
            self.finish_task(task, LoadResponse::loaded(Arc::clone(&image)));
        }
    }

    /// Removes `task` from its processing group. The job is cancelled once
    /// the group is empty.
    pub(crate) fn leave_group(&mut self, task: TaskId, group: u64) {
        let Some(members) = self.groups.get_mut(&group) else {
            return;
        };
        members.tasks.retain(|t| *t != task);
        if !members.tasks.is_empty() {
            return;
        }
        if let Some(members) = self.remove_group(group) {
            members.cancellation.cancel();
            trace!(group, "Processing abandoned, no tasks left");
        }
    }

    fn remove_group(&mut self, group: u64) -> Option<ProcessingGroup> {
        let members = self.groups.remove(&group)?;
        if self.processing_keys.get(&members.key) == Some(&group) {
            self.processing_keys.remove(&members.key);
        }
        Some(members)
    }

    /// Removes the task and sends its one `Completed` event.
    pub(crate) fn finish_task(&mut self, task: TaskId, response: LoadResponse) {
        let Some(entry) = self.executing.remove(&task) else {
            return;
        };
        if let Some(group) = entry.group {
            self.leave_group(task, group);
        }
        if entry.preheat {
            self.preheating.retain(|_, t| *t != task);
        }

        let success = response.is_success();
        debug!(
            task = %task,
            success,
            from_cache = response.from_cache,
            error = ?response.error,
            "Task completed"
        );
        self.stats.tasks_completed += 1;
        self.emit(LoaderEvent::TaskCompleted {
            task,
            success,
            duration: entry.started.elapsed(),
        });
        entry.send(TaskEvent::Completed(response));
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Returns an unexpired cached image for `request`.
    pub(crate) fn cached_image(&self, request: &Arc<Request>) -> Option<Image> {
        let cache = self.pipeline.cache()?;
        let cached = cache.get(&RequestKey::cache(Arc::clone(request)))?;
        if cached.is_expired(Instant::now()) {
            trace!(resource = %request.resource(), "Cached image expired");
            return None;
        }
        Some(cached.image)
    }

    fn store(&self, request: &Arc<Request>, image: Image) {
        let Some(cache) = self.pipeline.cache() else {
            return;
        };
        let expires_at = Instant::now() + request.options().expiration_age;
        cache.put(
            RequestKey::cache(Arc::clone(request)),
            CachedImage::new(image, expires_at),
        );
    }
}
