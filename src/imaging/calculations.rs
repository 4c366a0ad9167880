//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::types::Size;

/// Scale `source` to fit inside `target`, preserving the aspect ratio.
///
/// Rounds the same way `image::DynamicImage::resize` does, so the result is
/// exactly the size a resize to `target` produces. An original-marker target
/// returns `source` unchanged.
///
/// ```
/// # use photo_album::imaging::fit_within;
/// # use photo_album::types::Size;
/// assert_eq!(fit_within(Size::new(4000, 3000), Size::new(640, 640)), Size::new(640, 480));
/// assert_eq!(fit_within(Size::new(3000, 4000), Size::new(640, 480)), Size::new(360, 480));
/// ```
pub fn fit_within(source: Size, target: Size) -> Size {
    if target.is_original() || source.is_original() {
        return source;
    }
    let w_ratio = target.width as f64 / source.width as f64;
    let h_ratio = target.height as f64 / source.height as f64;
    let ratio = w_ratio.min(h_ratio);
    let width = ((source.width as f64 * ratio).round() as u32).max(1);
    let height = ((source.height as f64 * ratio).round() as u32).max(1);
    Size::new(width, height)
}

/// Size whose area is closest to `reference`'s. Original markers are skipped.
pub fn closest_area(sizes: &[Size], reference: Size) -> Option<Size> {
    let target = reference.pixels() as i64;
    sizes
        .iter()
        .copied()
        .filter(|s| !s.is_original())
        .min_by_key(|s| (s.pixels() as i64 - target).abs())
}

/// File-system-safe short name: at most 32 characters, anything other than
/// ASCII alphanumerics and `-` replaced by `_`.
pub fn derive_file_name(text: &str) -> String {
    text.chars()
        .take(32)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
