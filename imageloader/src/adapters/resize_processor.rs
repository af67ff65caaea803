//! Processor that scales images to the request's target size.

use crate::request::{ContentMode, Request, TargetSize};
use crate::traits::Processor;
use image::imageops::FilterType;
use image::DynamicImage;

/// Scales images to a request's [`TargetSize`].
///
/// - `AspectFit` scales down to fit inside the target, keeping the aspect
///   ratio.
/// - `AspectFill` scales to cover the target, keeping the aspect ratio. With
///   `allows_clipping` the overflow is cropped from the centre.
///
/// Images are never scaled up. Partial images are only processed when the
/// request sets `process_partial_images`.
#[derive(Debug, Clone, Copy)]
pub struct ResizeProcessor {
    filter: FilterType,
}

impl ResizeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resampling filter. Default: `Triangle`.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Scale factor that maps `(width, height)` onto the target.
    fn scale(width: u32, height: u32, target: (u32, u32), mode: ContentMode) -> f64 {
        let sx = target.0 as f64 / width.max(1) as f64;
        let sy = target.1 as f64 / height.max(1) as f64;
        match mode {
            ContentMode::AspectFit => sx.min(sy),
            ContentMode::AspectFill => sx.max(sy),
        }
    }
}

impl Default for ResizeProcessor {
    fn default() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }
}

impl Processor for ResizeProcessor {
    fn should_process(&self, image: &DynamicImage, request: &Request, partial: bool) -> bool {
        if partial && !request.options().process_partial_images {
            return false;
        }
        match request.target_size() {
            TargetSize::Original => false,
            TargetSize::Pixels { width, height } => {
                let scale = Self::scale(
                    image.width(),
                    image.height(),
                    (width, height),
                    request.content_mode(),
                );
                let clips = request.content_mode() == ContentMode::AspectFill
                    && request.options().allows_clipping
                    && (image.width() > width || image.height() > height);
                scale < 1.0 || clips
            }
        }
    }

    fn process(&self, image: &DynamicImage, request: &Request, _partial: bool) -> DynamicImage {
        let TargetSize::Pixels { width, height } = request.target_size() else {
            return image.clone();
        };
        let mode = request.content_mode();
        let scale = Self::scale(image.width(), image.height(), (width, height), mode).min(1.0);

        let scaled_w = ((image.width() as f64 * scale).round() as u32).max(1);
        let scaled_h = ((image.height() as f64 * scale).round() as u32).max(1);
        let scaled = if scale < 1.0 {
            image.resize_exact(scaled_w, scaled_h, self.filter)
        } else {
            image.clone()
        };

        if mode == ContentMode::AspectFill && request.options().allows_clipping {
            let crop_w = scaled.width().min(width);
            let crop_h = scaled.height().min(height);
            let x = (scaled.width() - crop_w) / 2;
            let y = (scaled.height() - crop_h) / 2;
            return scaled.crop_imm(x, y, crop_w, crop_h);
        }
        scaled
    }

    fn is_processing_equivalent(&self, a: &Request, b: &Request) -> bool {
        a.target_size() == b.target_size()
            && a.content_mode() == b.content_mode()
            && a.options().allows_clipping == b.options().allows_clipping
    }
}
