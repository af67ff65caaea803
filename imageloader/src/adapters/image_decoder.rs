//! Decoder backed by `image::load_from_memory`.

use crate::traits::Decoder;
use image::DynamicImage;
use tracing::trace;

/// Decodes any format the `image` crate recognises.
///
/// Partial attempts on truncated data usually fail for formats without
/// progressive support; that simply yields no partial image.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ImageCrateDecoder {
    fn decode(&self, data: &[u8], partial: bool) -> Option<DynamicImage> {
        match image::load_from_memory(data) {
            Ok(image) => Some(image),
            Err(e) => {
                trace!(bytes = data.len(), partial, error = %e, "Decode failed");
                None
            }
        }
    }
}
