//! Decode and processing workers.
//!
//! Decoding runs on one serial worker so progressive frames are never
//! reordered. Processing jobs are independent of each other, so they run with
//! bounded parallelism behind a semaphore. Both do the CPU work on the
//! blocking pool and report back to the coordinator loop as messages.

use super::message::Message;
use super::operation::OperationId;
use super::task::TaskId;
use crate::request::Request;
use crate::traits::{Decoder, Image, Processor};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

// =============================================================================
// Decode Queue
// =============================================================================

/// What a decode result is for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DecodeTarget {
    Final {
        operation: OperationId,
    },
    Partial {
        operation: OperationId,
        decoder: u64,
    },
}

pub(crate) struct DecodeJob {
    pub target: DecodeTarget,
    pub data: Bytes,
}

impl DecodeJob {
    pub fn final_image(operation: OperationId, data: Bytes) -> Self {
        Self {
            target: DecodeTarget::Final { operation },
            data,
        }
    }

    pub fn partial(operation: OperationId, decoder: u64, data: Bytes) -> Self {
        Self {
            target: DecodeTarget::Partial { operation, decoder },
            data,
        }
    }
}

/// Serial decode worker: one job at a time, in submission order.
pub(crate) struct DecodeWorker {
    jobs: mpsc::UnboundedReceiver<DecodeJob>,
    decoder: Arc<dyn Decoder>,
    messages: mpsc::UnboundedSender<Message>,
}

impl DecodeWorker {
    pub fn new(
        jobs: mpsc::UnboundedReceiver<DecodeJob>,
        decoder: Arc<dyn Decoder>,
        messages: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            jobs,
            decoder,
            messages,
        }
    }

    /// Runs until the job channel closes or the coordinator goes away.
    pub async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            let partial = matches!(job.target, DecodeTarget::Partial { .. });
            let decoder = Arc::clone(&self.decoder);
            let data = job.data;

            let image =
                match tokio::task::spawn_blocking(move || decoder.decode(&data, partial)).await {
                    Ok(image) => image.map(Arc::new),
                    Err(e) => {
                        warn!(target = ?job.target, error = %e, "Decode task failed");
                        None
                    }
                };

            let message = match job.target {
                DecodeTarget::Final { operation } => Message::Decoded { operation, image },
                DecodeTarget::Partial { operation, decoder } => Message::PartialDecoded {
                    operation,
                    decoder,
                    image,
                },
            };
            if self.messages.send(message).is_err() {
                break;
            }
        }
        trace!("Decode worker stopped");
    }
}

// =============================================================================
// Processing Queue
// =============================================================================

/// Who a processing result is for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ProcessingTarget {
    /// The final image for every task in a processing group.
    Final { group: u64 },
    /// One partial image for one task.
    Partial { task: TaskId, sequence: u64 },
}

pub(crate) struct ProcessingJob {
    pub target: ProcessingTarget,
    pub image: Image,
    pub request: Arc<Request>,
}

/// Bounded-parallelism processing pool.
pub(crate) struct ProcessingQueue {
    processor: Arc<dyn Processor>,
    permits: Arc<Semaphore>,
    messages: mpsc::UnboundedSender<Message>,
}

impl ProcessingQueue {
    pub fn new(
        processor: Arc<dyn Processor>,
        max_concurrent: usize,
        messages: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            processor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            messages,
        }
    }

    pub fn should_process(&self, image: &Image, request: &Request, partial: bool) -> bool {
        self.processor.should_process(image, request, partial)
    }

    /// Runs `job` once a permit is free.
    ///
    /// The job is abandoned if `cancellation` fires before or during the
    /// work. If processing panics the unprocessed image is delivered.
    pub fn submit(&self, job: ProcessingJob, cancellation: CancellationToken) {
        let processor = Arc::clone(&self.processor);
        let permits = Arc::clone(&self.permits);
        let messages = self.messages.clone();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancellation.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let ProcessingJob {
                target,
                image,
                request,
            } = job;
            let input = Arc::clone(&image);
            let is_partial = matches!(target, ProcessingTarget::Partial { .. });

            let output = match tokio::task::spawn_blocking(move || {
                processor.process(&input, &request, is_partial)
            })
            .await
            {
                Ok(processed) => Arc::new(processed),
                Err(e) => {
                    warn!(target = ?target, error = %e, "Processing failed, delivering unprocessed image");
                    image
                }
            };

            if cancellation.is_cancelled() {
                trace!(target = ?target, "Processing result discarded after cancellation");
                return;
            }

            let message = match target {
                ProcessingTarget::Partial { task, sequence } => Message::PartialProcessed {
                    task,
                    sequence,
                    image: output,
                },
                ProcessingTarget::Final { group } => Message::Processed {
                    group,
                    image: output,
                },
            };
            let _ = messages.send(message);
        });
    }
}
