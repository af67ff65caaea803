//! Shared fixtures for the loader integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use imageloader::adapters::ImageCrateDecoder;
use imageloader::command::TransportHandle;
use imageloader::config::LoaderConfig;
use imageloader::loader::{FetchSink, ImageLoader, LoadCoordinator, LoaderSnapshot, Pipeline};
use imageloader::request::{Priority, Request};
use imageloader::traits::{Decoder, FetchHandle, Fetcher, Processor};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Images
// =============================================================================

/// PNG-encoded RGBA image of the given size.
pub fn png(width: u32, height: u32) -> Bytes {
    let mut bytes = Vec::new();
    DynamicImage::new_rgba8(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    Bytes::from(bytes)
}

// =============================================================================
// Fetcher
// =============================================================================

/// Observable state of one fetch handle.
#[derive(Default)]
pub struct HandleState {
    pub cancelled: AtomicBool,
    pub priorities: Mutex<Vec<Priority>>,
}

impl HandleState {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn last_priority(&self) -> Option<Priority> {
        self.priorities.lock().last().copied()
    }
}

struct MockHandle(Arc<HandleState>);

impl FetchHandle for MockHandle {
    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    fn set_priority(&self, priority: Priority) {
        self.0.priorities.lock().push(priority);
    }
}

/// Transport that counts the resumes and cancels it receives.
#[derive(Default)]
pub struct RecordingTransport {
    pub resumes: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl RecordingTransport {
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl TransportHandle for RecordingTransport {
    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// One started fetch, driven by the test.
#[derive(Clone)]
pub struct Fetch {
    pub resource: String,
    pub sink: FetchSink,
    pub handle: Arc<HandleState>,
    /// Set when the fetcher routes its transport through the executor.
    pub transport: Option<Arc<RecordingTransport>>,
}

impl Fetch {
    pub fn progress(&self, data: &[u8], completed: u64, total: u64) {
        self.sink
            .progress(Bytes::copy_from_slice(data), completed, total);
    }

    pub fn succeed(&self, data: Bytes) {
        self.sink.complete(Ok(data));
    }

    pub fn fail(&self, message: &str) {
        self.sink
            .complete(Err(imageloader::error::FetchError::retryable(message)));
    }
}

/// Fetcher that records every start and lets the test complete it.
///
/// Requests are fetch-equivalent when resource and network access match,
/// and cache-equivalent when the resource matches. Resources starting with
/// `unsupported:` are rejected.
#[derive(Default)]
pub struct MockFetcher {
    fetches: Mutex<Vec<Fetch>>,
    paced: bool,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fetcher whose handles resume and cancel a [`RecordingTransport`]
    /// through the loader's command executor.
    pub fn paced() -> Arc<Self> {
        Arc::new(Self {
            paced: true,
            ..Self::default()
        })
    }

    pub fn start_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn fetch(&self, index: usize) -> Fetch {
        self.fetches.lock()[index].clone()
    }

    /// The most recent fetch for `resource`.
    pub fn fetch_for(&self, resource: &str) -> Fetch {
        self.fetches
            .lock()
            .iter()
            .rev()
            .find(|f| f.resource == resource)
            .cloned()
            .unwrap_or_else(|| panic!("no fetch started for {resource}"))
    }
}

impl Fetcher for MockFetcher {
    fn can_handle(&self, request: &Request) -> bool {
        !request.resource().as_str().starts_with("unsupported:")
    }

    fn is_fetch_equivalent(&self, a: &Request, b: &Request) -> bool {
        a.resource() == b.resource()
            && a.options().allows_network_access == b.options().allows_network_access
    }

    fn is_cache_equivalent(&self, a: &Request, b: &Request) -> bool {
        a.resource() == b.resource()
    }

    fn start(&self, request: &Request, sink: FetchSink) -> Box<dyn FetchHandle> {
        let handle = Arc::new(HandleState::default());
        let transport = self.paced.then(|| Arc::new(RecordingTransport::default()));
        let boxed: Box<dyn FetchHandle> = match &transport {
            Some(transport) => {
                let transport: Arc<dyn TransportHandle> = transport.clone();
                Box::new(sink.paced(transport))
            }
            None => Box::new(MockHandle(Arc::clone(&handle))),
        };
        self.fetches.lock().push(Fetch {
            resource: request.resource().to_string(),
            sink,
            handle,
            transport,
        });
        boxed
    }
}

// =============================================================================
// Decoder and Processor
// =============================================================================

/// Decoder that counts calls. Partial attempts decode to a 1x1 image.
#[derive(Default)]
pub struct CountingDecoder {
    pub full: AtomicUsize,
    pub partial: AtomicUsize,
}

impl CountingDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn partial_calls(&self) -> usize {
        self.partial.load(Ordering::SeqCst)
    }

    pub fn full_calls(&self) -> usize {
        self.full.load(Ordering::SeqCst)
    }
}

impl Decoder for CountingDecoder {
    fn decode(&self, data: &[u8], partial: bool) -> Option<DynamicImage> {
        if partial {
            self.partial.fetch_add(1, Ordering::SeqCst);
            return Some(DynamicImage::new_rgba8(1, 1));
        }
        self.full.fetch_add(1, Ordering::SeqCst);
        ImageCrateDecoder::new().decode(data, false)
    }
}

/// Wraps a processor and counts `process` calls.
pub struct CountingProcessor<P> {
    inner: P,
    pub calls: AtomicUsize,
}

impl<P: Processor> CountingProcessor<P> {
    pub fn new(inner: P) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: Processor> Processor for CountingProcessor<P> {
    fn should_process(&self, image: &DynamicImage, request: &Request, partial: bool) -> bool {
        self.inner.should_process(image, request, partial)
    }

    fn process(&self, image: &DynamicImage, request: &Request, partial: bool) -> DynamicImage {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.process(image, request, partial)
    }

    fn is_processing_equivalent(&self, a: &Request, b: &Request) -> bool {
        self.inner.is_processing_equivalent(a, b)
    }
}

/// Processor that holds every `process` call until [`open`](Self::open).
pub struct GatedProcessor<P> {
    inner: P,
    open: AtomicBool,
    pub entered: AtomicUsize,
}

impl<P: Processor> GatedProcessor<P> {
    pub fn new(inner: P) -> Arc<Self> {
        Arc::new(Self {
            inner,
            open: AtomicBool::new(false),
            entered: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl<P: Processor> Processor for GatedProcessor<P> {
    fn should_process(&self, image: &DynamicImage, request: &Request, partial: bool) -> bool {
        self.inner.should_process(image, request, partial)
    }

    fn process(&self, image: &DynamicImage, request: &Request, partial: bool) -> DynamicImage {
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.process(image, request, partial)
    }

    fn is_processing_equivalent(&self, a: &Request, b: &Request) -> bool {
        self.inner.is_processing_equivalent(a, b)
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Spawns a coordinator and returns its loader and shutdown token.
pub fn spawn_loader(config: LoaderConfig, pipeline: Pipeline) -> (ImageLoader, CancellationToken) {
    let (coordinator, loader) = LoadCoordinator::new(config, pipeline);
    let shutdown = CancellationToken::new();
    tokio::spawn(coordinator.run(shutdown.clone()));
    (loader, shutdown)
}

/// Waits until every message sent so far has been handled.
pub async fn settle(loader: &ImageLoader) -> LoaderSnapshot {
    loader
        .snapshot()
        .await
        .expect("coordinator stopped unexpectedly")
}

/// Polls snapshots until `done` holds, failing after a few seconds.
pub async fn wait_until(
    loader: &ImageLoader,
    mut done: impl FnMut(&LoaderSnapshot) -> bool,
) -> LoaderSnapshot {
    for _ in 0..500 {
        let snapshot = settle(loader).await;
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
