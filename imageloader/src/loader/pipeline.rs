//! Collaborators injected into the coordinator.

use crate::adapters::ImageCrateDecoder;
use crate::key::{KeyEquivalence, RequestEquivalence};
use crate::traits::{Decoder, Fetcher, ImageCache, Processor};
use std::sync::Arc;

/// The fetcher, decoder, processor, and cache a coordinator works with.
///
/// Only the fetcher is required. The decoder defaults to
/// [`ImageCrateDecoder`]; without a processor images are delivered as
/// decoded, and without a cache nothing is looked up or stored.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    processor: Option<Arc<dyn Processor>>,
    cache: Option<Arc<dyn ImageCache>>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            decoder: Arc::new(ImageCrateDecoder::new()),
            processor: None,
            cache: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Sets the cache.
    ///
    /// Build it with [`equivalence`](Self::equivalence) so it keys entries
    /// the same way the coordinator does.
    pub fn with_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn decoder(&self) -> &Arc<dyn Decoder> {
        &self.decoder
    }

    pub fn processor(&self) -> Option<&Arc<dyn Processor>> {
        self.processor.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<dyn ImageCache>> {
        self.cache.as_ref()
    }

    /// Key equivalence derived from the fetcher and processor.
    pub fn equivalence(&self) -> Arc<dyn KeyEquivalence> {
        Arc::new(RequestEquivalence::new(
            Arc::clone(&self.fetcher),
            self.processor.clone(),
        ))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("processor", &self.processor.is_some())
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}
