//! Shared test utilities.
//!
//! Synthetic images for codec, dispatcher and builder tests. Pixel content
//! is a deterministic gradient so encoders have something non-trivial to
//! compress.

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::path::Path;

// =========================================================================
// In-memory images
// =========================================================================

pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    }))
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// JPEG bytes of a `width`x`height` gradient.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Jpeg)
}

/// PNG bytes of a half-transparent `width`x`height` RGBA image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let rgba = RgbaImage::from_fn(width, height, |x, _| image::Rgba([(x % 256) as u8, 40, 200, 128]));
    encode(&DynamicImage::ImageRgba8(rgba), ImageFormat::Png)
}

// =========================================================================
// Files
// =========================================================================

/// Write a gradient JPEG to `path`.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).unwrap();
}
