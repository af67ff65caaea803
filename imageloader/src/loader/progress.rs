//! Fetch progress and progressive decoding.

use super::core::LoadCoordinator;
use super::operation::OperationId;
use super::progressive::ProgressiveDecoder;
use super::queues::{DecodeJob, ProcessingJob, ProcessingTarget};
use super::task::{TaskEvent, TaskId};
use crate::telemetry::LoaderEvent;
use crate::traits::Image;
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

impl LoadCoordinator {
    /// Fans progress out and feeds the progressive decoder.
    pub(crate) fn handle_fetch_progress(
        &mut self,
        operation: OperationId,
        data: Bytes,
        completed: u64,
        total: u64,
    ) {
        let Some(op) = self.arena.get_mut(&operation) else {
            trace!(operation = %operation, "Progress for finished operation");
            return;
        };
        if op.finishing {
            return;
        }

        let (completed, total) = op.update_progress(completed, total);
        for task in &op.tasks {
            if let Some(entry) = self.executing.get(task) {
                entry.send(TaskEvent::Progress { completed, total });
            }
        }

        if !self.config.progressive_decoding() || completed >= total {
            if op.progressive.take().is_some() {
                trace!(operation = %operation, "Progressive decoder dropped");
            }
            return;
        }

        let wants_partial = op.tasks.iter().any(|task| {
            self.executing
                .get(task)
                .is_some_and(|entry| entry.wants_partial_images())
        });

        if op.progressive.is_none() {
            op.progressive = Some(ProgressiveDecoder::new(
                self.next_decoder,
                self.config.progressive_threshold(),
                total,
            ));
            self.next_decoder += 1;
        }
        if let Some(decoder) = op.progressive.as_mut() {
            decoder.append(&data);
            if wants_partial {
                decoder.resume();
            }
        }

        self.schedule_partial_decode(operation);
    }

    /// Submits a partial decode if the operation's decoder has one due.
    pub(crate) fn schedule_partial_decode(&mut self, operation: OperationId) {
        let Some(decoder) = self
            .arena
            .get_mut(&operation)
            .and_then(|op| op.progressive.as_mut())
        else {
            return;
        };
        if let Some(data) = decoder.next_attempt() {
            trace!(operation = %operation, bytes = data.len(), "Partial decode scheduled");
            let job = DecodeJob::partial(operation, decoder.id(), data);
            if self.decode_tx.send(job).is_err() {
                decoder.finish_attempt();
            }
        }
    }

    /// Dispatches a partial image and schedules the next attempt.
    pub(crate) fn handle_partial_decoded(
        &mut self,
        operation: OperationId,
        decoder_id: u64,
        image: Option<Image>,
    ) {
        let Some(op) = self.arena.get_mut(&operation) else {
            return;
        };
        // A result from a dropped or replaced decoder is stale.
        let Some(decoder) = op
            .progressive
            .as_mut()
            .filter(|decoder| decoder.id() == decoder_id)
        else {
            return;
        };
        decoder.finish_attempt();

        if let Some(image) = image {
            let tasks = op.tasks.clone();
            self.emit(LoaderEvent::PartialImage {
                operation,
                tasks: tasks.len(),
            });
            for task in tasks {
                self.dispatch_partial(task, Arc::clone(&image));
            }
        }

        self.schedule_partial_decode(operation);
    }

    /// Delivers a partial image to one task, processing it first if the
    /// request asks for that.
    fn dispatch_partial(&mut self, task: TaskId, image: Image) {
        let Some(entry) = self.executing.get_mut(&task) else {
            return;
        };
        if !entry.wants_partial_images() {
            return;
        }

        let sequence = entry.next_partial;
        entry.next_partial += 1;

        if let Some(queue) = &self.processing {
            let request = &entry.request;
            if request.options().process_partial_images
                && queue.should_process(&image, request, true)
            {
                let job = ProcessingJob {
                    target: ProcessingTarget::Partial { task, sequence },
                    image,
                    request: Arc::clone(request),
                };
                queue.submit(job, entry.processing.clone());
                return;
            }
        }

        entry.delivered_partial = Some(sequence);
        entry.send(TaskEvent::PartialImage(image));
        self.stats.partial_images += 1;
    }

    /// Delivers a processed partial image unless a newer one already went out.
    pub(crate) fn handle_partial_processed(&mut self, task: TaskId, sequence: u64, image: Image) {
        let Some(entry) = self.executing.get_mut(&task) else {
            trace!(task = %task, "Processed partial for finished task");
            return;
        };
        if entry.delivered_partial.is_some_and(|last| last >= sequence) {
            trace!(task = %task, sequence, "Stale processed partial dropped");
            return;
        }
        entry.delivered_partial = Some(sequence);
        entry.send(TaskEvent::PartialImage(image));
        self.stats.partial_images += 1;
    }
}
