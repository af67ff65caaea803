//! First-success composite task.
//!
//! A [`CompositeTask`] loads an ordered list of fallback requests at once
//! (index 0 is the most preferred) and reports them as one unit:
//!
//! - each successful result that is not obsolete goes to the image handler
//! - a success cancels every less-preferred task still outstanding
//! - the completion handler fires exactly once, when nothing is outstanding
//!
//! A result is obsolete when a more-preferred request already succeeded. A
//! less-preferred success that arrives first is still delivered; a more
//! preferred success arriving later is delivered after it.
//!
//! Progress and partial images of outstanding tasks can be observed with
//! [`CompositeTask::with_progress_handler`] and
//! [`CompositeTask::with_partial_image_handler`]. Partial images of obsolete
//! tasks are dropped.
//!
//! # Example
//!
//! ```ignore
//! let mut composite = CompositeTask::new(
//!     &loader,
//!     vec![Request::new("thumb://a"), Request::new("https://example.com/a.jpg")],
//! )?
//! .with_image_handler(|response, request| {
//!     println!("{} -> {:?}", request.resource(), response.image.is_some());
//! })
//! .with_completion_handler(|| println!("done"));
//!
//! composite.resume();
//! composite.wait().await;
//! ```

mod policy;

pub use policy::{FallbackPolicy, Resolution};

use crate::error::CompositeError;
use crate::loader::{ImageLoader, ImageTask, LoadResponse, TaskControl, TaskEvent};
use crate::request::{Priority, Request};
use crate::traits::Image;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Called with each delivered response and the request that produced it.
pub type ImageHandler = Box<dyn FnMut(&LoadResponse, &Request) + Send>;

/// Called once when every underlying task is resolved.
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

/// Called with an underlying task's request and its `(completed, total)`.
pub type ProgressHandler = Box<dyn FnMut(&Request, u64, u64) + Send>;

/// Called with each partial image and the request that produced it.
pub type PartialImageHandler = Box<dyn FnMut(&Image, &Request) + Send>;

struct CompositeState {
    policy: FallbackPolicy,
    image_handler: Option<ImageHandler>,
    completion_handler: Option<CompletionHandler>,
    progress_handler: Option<ProgressHandler>,
    partial_handler: Option<PartialImageHandler>,
    cancelled: bool,
    finished: bool,
}

/// State shared between the composite, its controls, and its driver.
struct Shared {
    state: Mutex<CompositeState>,
    controls: Vec<TaskControl>,
}

impl Shared {
    fn cancel(&self) {
        let remaining = {
            let mut state = self.state.lock();
            if state.finished || state.cancelled {
                return;
            }
            state.cancelled = true;
            state.image_handler = None;
            state.completion_handler = None;
            state.progress_handler = None;
            state.partial_handler = None;
            state.policy.cancel_remaining()
        };
        debug!(remaining = remaining.len(), "Composite task cancelled");
        for index in remaining {
            self.controls[index].cancel();
        }
    }

    /// Calls the handler in `slot` for an event of task `index`, outside the
    /// lock. Events of resolved tasks are dropped, as are partial images of
    /// obsolete ones.
    fn forward<H>(
        &self,
        index: usize,
        partial: bool,
        slot: fn(&mut CompositeState) -> &mut Option<H>,
        call: impl FnOnce(&mut H),
    ) {
        let mut handler = {
            let mut state = self.state.lock();
            if state.cancelled
                || !state.policy.is_remaining(index)
                || (partial && state.policy.is_obsolete(index))
            {
                return;
            }
            match slot(&mut *state).take() {
                Some(handler) => handler,
                None => return,
            }
        };

        call(&mut handler);

        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }
        let slot = slot(&mut *state);
        if slot.is_none() {
            *slot = Some(handler);
        }
    }

    fn progress(&self, index: usize, request: &Request, completed: u64, total: u64) {
        self.forward(
            index,
            false,
            |state| &mut state.progress_handler,
            |handler| handler(request, completed, total),
        );
    }

    fn partial(&self, index: usize, request: &Request, image: &Image) {
        self.forward(
            index,
            true,
            |state| &mut state.partial_handler,
            |handler| handler(image, request),
        );
    }

    /// Applies one underlying completion. Handlers run without the lock held
    /// so they may cancel the composite.
    fn resolve(&self, index: usize, response: Option<LoadResponse>, request: &Request) {
        let success = response.as_ref().is_some_and(|r| r.error.is_none());
        let (resolution, mut handler) = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            let Some(resolution) = state.policy.complete(index, success) else {
                trace!(index, "Late completion ignored");
                return;
            };
            let handler = if resolution.deliver {
                state.image_handler.take()
            } else {
                None
            };
            (resolution, handler)
        };

        for cancelled in &resolution.cancel {
            trace!(index = *cancelled, "Cancelling obsolete fallback");
            self.controls[*cancelled].cancel();
        }

        if let (Some(handler), Some(response)) = (handler.as_mut(), response.as_ref()) {
            handler(response, request);
        }

        let completion = {
            let mut state = self.state.lock();
            if let Some(handler) = handler {
                if !state.cancelled && state.image_handler.is_none() {
                    state.image_handler = Some(handler);
                }
            }
            if resolution.finished && !state.cancelled {
                state.finished = true;
                state.completion_handler.take()
            } else {
                None
            }
        };
        if let Some(completion) = completion {
            completion();
        }
    }
}

// =============================================================================
// Composite Task
// =============================================================================

/// Loads several fallback requests and reports the preferred successes.
pub struct CompositeTask {
    requests: Arc<Vec<Request>>,
    shared: Arc<Shared>,
    /// Underlying tasks until `resume` hands them to the driver.
    tasks: Option<Vec<ImageTask>>,
    driver: Option<JoinHandle<()>>,
}

impl CompositeTask {
    /// Creates a suspended composite over `requests`.
    ///
    /// Fails with [`CompositeError::NoRequests`] when `requests` is empty.
    pub fn new(loader: &ImageLoader, requests: Vec<Request>) -> Result<Self, CompositeError> {
        let tasks: Vec<ImageTask> = requests.iter().cloned().map(|r| loader.task(r)).collect();
        Self::with_tasks(requests, tasks)
    }

    /// Creates a composite over already-created, suspended tasks.
    pub fn from_tasks(tasks: Vec<ImageTask>) -> Result<Self, CompositeError> {
        let requests = tasks.iter().map(|t| t.request().clone()).collect();
        Self::with_tasks(requests, tasks)
    }

    fn with_tasks(requests: Vec<Request>, tasks: Vec<ImageTask>) -> Result<Self, CompositeError> {
        if tasks.is_empty() {
            return Err(CompositeError::NoRequests);
        }
        let controls = tasks.iter().map(ImageTask::control).collect();
        let shared = Shared {
            state: Mutex::new(CompositeState {
                policy: FallbackPolicy::new(tasks.len()),
                image_handler: None,
                completion_handler: None,
                progress_handler: None,
                partial_handler: None,
                cancelled: false,
                finished: false,
            }),
            controls,
        };
        Ok(Self {
            requests: Arc::new(requests),
            shared: Arc::new(shared),
            tasks: Some(tasks),
            driver: None,
        })
    }

    /// Sets the handler for delivered responses.
    pub fn with_image_handler(
        self,
        handler: impl FnMut(&LoadResponse, &Request) + Send + 'static,
    ) -> Self {
        self.shared.state.lock().image_handler = Some(Box::new(handler));
        self
    }

    /// Sets the handler fired once every task is resolved.
    pub fn with_completion_handler(self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.shared.state.lock().completion_handler = Some(Box::new(handler));
        self
    }

    /// Sets the handler for progress of outstanding tasks.
    pub fn with_progress_handler(
        self,
        handler: impl FnMut(&Request, u64, u64) + Send + 'static,
    ) -> Self {
        self.shared.state.lock().progress_handler = Some(Box::new(handler));
        self
    }

    /// Sets the handler for partial images and opts every underlying task
    /// in to them. Must be called before [`resume`](Self::resume).
    pub fn with_partial_image_handler(
        mut self,
        handler: impl FnMut(&Image, &Request) + Send + 'static,
    ) -> Self {
        self.shared.state.lock().partial_handler = Some(Box::new(handler));
        self.tasks = self.tasks.take().map(|tasks| {
            tasks
                .into_iter()
                .map(|task| task.with_partial_images(true))
                .collect()
        });
        self
    }

    /// Enable or disable obsolescence tracking. Default: enabled.
    pub fn with_tracks_obsolete(self, enabled: bool) -> Self {
        self.set_tracks_obsolete(enabled);
        self
    }

    pub fn set_tracks_obsolete(&self, enabled: bool) {
        self.shared.state.lock().policy.set_tracks_obsolete(enabled);
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Starts every underlying task. Only the first call has an effect.
    ///
    /// Must be called within a Tokio runtime.
    pub fn resume(&mut self) {
        if self.shared.state.lock().cancelled {
            return;
        }
        let Some(mut tasks) = self.tasks.take() else {
            return;
        };
        for task in &mut tasks {
            task.resume();
        }
        debug!(tasks = tasks.len(), "Composite task resumed");

        let shared = Arc::clone(&self.shared);
        let requests = Arc::clone(&self.requests);
        self.driver = Some(tokio::spawn(async move {
            let mut pending: FuturesUnordered<_> = tasks
                .into_iter()
                .enumerate()
                .map(|(index, mut task)| {
                    let shared = Arc::clone(&shared);
                    let requests = Arc::clone(&requests);
                    async move {
                        let request = &requests[index];
                        loop {
                            match task.next_event().await {
                                Some(TaskEvent::Progress { completed, total }) => {
                                    shared.progress(index, request, completed, total)
                                }
                                Some(TaskEvent::PartialImage(image)) => {
                                    shared.partial(index, request, &image)
                                }
                                Some(TaskEvent::Completed(response)) => {
                                    return (index, Some(response))
                                }
                                None => return (index, None),
                            }
                        }
                    }
                })
                .collect();

            while let Some((index, response)) = pending.next().await {
                shared.resolve(index, response, &requests[index]);
                let done = {
                    let state = shared.state.lock();
                    state.cancelled || state.finished
                };
                if done {
                    break;
                }
            }
        }));
    }

    /// Clears both handlers and cancels every outstanding task.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Forwards `priority` to every underlying task.
    pub fn set_priority(&mut self, priority: Priority) {
        match self.tasks.as_mut() {
            Some(tasks) => tasks.iter_mut().for_each(|t| t.set_priority(priority)),
            None => self
                .shared
                .controls
                .iter()
                .for_each(|c| c.set_priority(priority)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    /// Returns a cloneable handle that can cancel the composite, for example
    /// from inside its image handler.
    pub fn control(&self) -> CompositeControl {
        CompositeControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Waits until the composite finishes or is cancelled.
    ///
    /// Returns immediately if it was never resumed.
    pub async fn wait(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl std::fmt::Debug for CompositeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CompositeTask")
            .field("requests", &self.requests.len())
            .field("resumed", &self.tasks.is_none())
            .field("cancelled", &state.cancelled)
            .field("finished", &state.finished)
            .finish()
    }
}

/// Cloneable cancel handle for a [`CompositeTask`].
#[derive(Clone)]
pub struct CompositeControl {
    shared: Arc<Shared>,
}

impl CompositeControl {
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }
}

impl std::fmt::Debug for CompositeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeControl")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
