//! Messages consumed by the coordinator loop.
//!
//! Client requests and collaborator callbacks share one channel so that the
//! loop sees them in a single order.

use super::client::LoaderSnapshot;
use super::operation::OperationId;
use super::task::{TaskId, TaskSeed};
use crate::command::{CommandExecutor, PacedHandle, TransportHandle};
use crate::error::FetchError;
use crate::request::{Priority, Request};
use crate::traits::Image;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) enum Message {
    // -------------------------------------------------------------------------
    // From clients
    // -------------------------------------------------------------------------
    Start(TaskSeed),
    Cancel(TaskId),
    SetPriority {
        task: TaskId,
        priority: Priority,
    },
    StartPreheating(Vec<Request>),
    StopPreheating(Vec<Request>),
    StopPreheatingAll,
    InvalidateAndCancel,
    Snapshot(oneshot::Sender<LoaderSnapshot>),

    // -------------------------------------------------------------------------
    // From collaborators and workers
    // -------------------------------------------------------------------------
    FetchProgress {
        operation: OperationId,
        data: Bytes,
        completed: u64,
        total: u64,
    },
    FetchCompleted {
        operation: OperationId,
        result: Result<Bytes, FetchError>,
    },
    Decoded {
        operation: OperationId,
        image: Option<Image>,
    },
    PartialDecoded {
        operation: OperationId,
        decoder: u64,
        image: Option<Image>,
    },
    /// Final image processed for a group of cache-equivalent tasks.
    Processed {
        group: u64,
        image: Image,
    },
    PartialProcessed {
        task: TaskId,
        sequence: u64,
        image: Image,
    },
}

/// Reporting channel handed to [`Fetcher::start`](crate::traits::Fetcher::start).
///
/// Cloneable and callable from any thread. Everything reported is queued for
/// the coordinator loop; reports for an operation that has already finished
/// or been cancelled are dropped there.
///
/// The sink also carries the loader's [`CommandExecutor`], so fetchers can
/// pace transport start and cancel with [`paced`](Self::paced).
#[derive(Clone)]
pub struct FetchSink {
    operation: OperationId,
    messages: mpsc::UnboundedSender<Message>,
    commands: CommandExecutor,
}

impl FetchSink {
    pub(crate) fn new(
        operation: OperationId,
        messages: mpsc::UnboundedSender<Message>,
        commands: CommandExecutor,
    ) -> Self {
        Self {
            operation,
            messages,
            commands,
        }
    }

    /// The operation this sink reports for.
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// The loader's shared transport command executor.
    pub fn executor(&self) -> &CommandExecutor {
        &self.commands
    }

    /// Resumes `transport` through the loader's executor and returns a
    /// handle whose cancel goes the same way.
    pub fn paced(&self, transport: Arc<dyn TransportHandle>) -> PacedHandle {
        PacedHandle::start(self.commands.clone(), transport)
    }

    /// Reports newly arrived bytes and the running unit counts.
    pub fn progress(&self, data: Bytes, completed: u64, total: u64) {
        let _ = self.messages.send(Message::FetchProgress {
            operation: self.operation,
            data,
            completed,
            total,
        });
    }

    /// Reports the final result: the complete data, or an error.
    pub fn complete(&self, result: Result<Bytes, FetchError>) {
        let _ = self.messages.send(Message::FetchCompleted {
            operation: self.operation,
            result,
        });
    }
}

impl std::fmt::Debug for FetchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSink")
            .field("operation", &self.operation)
            .finish()
    }
}
