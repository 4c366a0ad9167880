//! High-level image operations.
//!
//! These functions combine the dimension math from
//! [`calculations`](super::calculations) with pixel work on decoded images.
//! Bitmaps are shared as `Arc<DynamicImage>`: an operation that does not need
//! to resample hands back the same `Arc` instead of a copy.
//!
//! ## Chained downscaling
//!
//! [`resize_series`] produces one image per target size. Instead of scaling
//! every target from the full original, each output is scaled from the
//! smallest already-produced larger output that is still at least
//! [`DEFAULT_CHAIN_FACTOR`] times its size:
//!
//! ```text
//! original 6000x4000 ──▶ 2048x1365
//!                    ──▶ 1280x853 ──▶ 640x427 ──▶ 320x213 ──▶ 160x107
//! ```
//!
//! 1280x853 comes from the original because 2048x1365 is less than twice
//! its size. Scaling from a 2× source loses very little sharpness and is far
//! cheaper than scaling from a 24 megapixel original.

use super::calculations::fit_within;
use super::params::ResizeStrategy;
use crate::types::Size;
use image::DynamicImage;
use image::imageops::FilterType;
use std::sync::Arc;

/// A derivative is reused as a source only if it is at least this many
/// times the output size in both dimensions.
pub const DEFAULT_CHAIN_FACTOR: u32 = 2;

/// Dimensions of a decoded image.
pub fn dimensions(image: &DynamicImage) -> Size {
    Size::new(image.width(), image.height())
}

/// Scale `image` to fit `target` following `strategy`.
///
/// Returns `image` itself when it already has the fitted dimensions or the
/// target is the original marker.
pub fn resize_with(
    image: &Arc<DynamicImage>,
    target: Size,
    strategy: ResizeStrategy,
) -> Arc<DynamicImage> {
    let source = dimensions(image);
    let fitted = fit_within(source, target);
    if target.is_original() || fitted == source {
        return Arc::clone(image);
    }

    let exceeds = source.width > strategy.trigger * target.width
        || source.height > strategy.trigger * target.height;
    let preshrunk = exceeds.then(|| {
        image.resize(
            strategy.preshrink * target.width,
            strategy.preshrink * target.height,
            FilterType::Nearest,
        )
    });
    let base = preshrunk.as_ref().unwrap_or(image.as_ref());
    Arc::new(base.resize_exact(fitted.width, fitted.height, strategy.filter))
}

/// Fast scale used for interactive requests and cache intermediates.
pub fn quick_resize(image: &Arc<DynamicImage>, target: Size) -> Arc<DynamicImage> {
    resize_with(image, target, ResizeStrategy::QUICK)
}

/// High-quality scale used for deployed slides.
pub fn smart_resize(image: &Arc<DynamicImage>, target: Size) -> Arc<DynamicImage> {
    resize_with(image, target, ResizeStrategy::SMART)
}

/// Produce one image per entry of `sizes` (ascending, at most a trailing
/// original marker), ordered smallest to largest.
///
/// - An empty `sizes` yields just the original.
/// - A trailing original marker yields the original in that slot.
/// - Targets the original already fits into reuse the original unscaled.
/// - Every other target is scaled with [`smart_resize`] from the smallest
///   produced output that is at least `chain_factor` times the fitted
///   target size in both dimensions, or from the original if none is.
pub fn resize_series(
    original: &Arc<DynamicImage>,
    sizes: &[Size],
    chain_factor: u32,
) -> Vec<Arc<DynamicImage>> {
    if sizes.is_empty() {
        return vec![Arc::clone(original)];
    }
    let full = dimensions(original);
    let count = sizes.len();
    // Filled from the largest target down; reversed at the end.
    let mut produced: Vec<Arc<DynamicImage>> = Vec::with_capacity(count);
    let mut remaining = count;

    if sizes[count - 1].is_original() {
        produced.push(Arc::clone(original));
        remaining -= 1;
    }
    while remaining > 0 && full.fits_within(sizes[remaining - 1]) {
        produced.push(Arc::clone(original));
        remaining -= 1;
    }
    while remaining > 0 {
        let target = sizes[remaining - 1];
        let fitted = fit_within(full, target);
        let factor = chain_factor.max(1);
        let source = produced
            .iter()
            .rev()
            .find(|candidate| {
                let dims = dimensions(candidate);
                dims.width >= factor * fitted.width && dims.height >= factor * fitted.height
            })
            .cloned()
            .unwrap_or_else(|| Arc::clone(original));
        produced.push(smart_resize(&source, target));
        remaining -= 1;
    }

    produced.reverse();
    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn image(width: u32, height: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        })))
    }

    // =========================================================================
    // resize_with
    // =========================================================================

    #[test]
    fn resize_fits_target_preserving_aspect() {
        let out = quick_resize(&image(400, 200), Size::new(100, 100));
        assert_eq!(dimensions(&out), Size::new(100, 50));
    }

    #[test]
    fn resize_with_large_ratio_preshrinks() {
        let out = smart_resize(&image(1000, 500), Size::new(50, 50));
        assert_eq!(dimensions(&out), Size::new(50, 25));
    }

    #[test]
    fn already_fitted_image_is_shared() {
        let src = image(100, 50);
        let out = quick_resize(&src, Size::new(100, 80));
        assert!(Arc::ptr_eq(&src, &out));
        let out = quick_resize(&src, Size::ORIGINAL);
        assert!(Arc::ptr_eq(&src, &out));
    }

    // =========================================================================
    // resize_series
    // =========================================================================

    #[test]
    fn empty_sizes_return_the_original() {
        let src = image(300, 200);
        let out = resize_series(&src, &[], DEFAULT_CHAIN_FACTOR);
        assert_eq!(out.len(), 1);
        assert!(Arc::ptr_eq(&out[0], &src));
    }

    #[test]
    fn series_is_ascending_and_fits_targets() {
        let src = image(1200, 900);
        let sizes = [
            Size::new(80, 80),
            Size::new(160, 120),
            Size::new(320, 240),
            Size::new(800, 600),
        ];
        let out = resize_series(&src, &sizes, DEFAULT_CHAIN_FACTOR);
        assert_eq!(out.len(), sizes.len());
        for (img, target) in out.iter().zip(sizes) {
            let dims = dimensions(img);
            assert!(dims.fits_within(target), "{dims} not within {target}");
            assert_eq!(dims, fit_within(Size::new(1200, 900), target));
        }
        for pair in out.windows(2) {
            assert!(dimensions(&pair[0]).pixels() <= dimensions(&pair[1]).pixels());
        }
    }

    #[test]
    fn trailing_original_marker_and_small_source() {
        let src = image(500, 400);
        let sizes = [Size::new(100, 100), Size::new(640, 480), Size::ORIGINAL];
        let out = resize_series(&src, &sizes, DEFAULT_CHAIN_FACTOR);
        assert_eq!(out.len(), 3);
        // 500x400 fits into 640x480: reused, never upscaled.
        assert!(Arc::ptr_eq(&out[1], &src));
        assert!(Arc::ptr_eq(&out[2], &src));
        assert_eq!(dimensions(&out[0]), Size::new(100, 80));
    }

    #[test]
    fn huge_chain_factor_scales_everything_from_original() {
        let src = image(800, 800);
        let sizes = [Size::new(50, 50), Size::new(400, 400)];
        let out = resize_series(&src, &sizes, 1000);
        assert_eq!(dimensions(&out[0]), Size::new(50, 50));
        assert_eq!(dimensions(&out[1]), Size::new(400, 400));
    }
}
