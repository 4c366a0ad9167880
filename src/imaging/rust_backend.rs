//! Pure Rust codec and local-filesystem storage.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` at the requested quality |
//! | Encode → PNG/TIFF/WebP | `DynamicImage::write_to` (lossless) |
//! | Storage | `std::fs` |

use super::backend::{BackendError, ImageCodec, Storage};
use super::params::Quality;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Codec backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for RustCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
        image::load_from_memory(bytes)
            .map_err(|e| BackendError::ProcessingFailed(format!("decode failed: {}", e)))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut out, quality.value() as u8);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))?;
            }
            other => {
                image
                    .write_to(&mut Cursor::new(&mut out), other)
                    .map_err(|e| {
                        BackendError::ProcessingFailed(format!("{:?} encode failed: {}", other, e))
                    })?;
            }
        }
        Ok(out)
    }
}

/// Storage on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        std::fs::write(path, data)
    }

    fn create_dir(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        if path.is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, png_bytes};
    use image::GenericImageView;
    use tempfile::TempDir;

    #[test]
    fn supported_extensions_match_decodable_formats() {
        let exts = supported_input_extensions();
        for expected in &["jpg", "jpeg", "png", "tif", "tiff", "webp"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    #[test]
    fn decode_synthetic_jpeg() {
        let img = RustCodec.decode(&jpeg_bytes(64, 48)).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn decode_garbage_errors() {
        assert!(matches!(
            RustCodec.decode(b"not an image"),
            Err(BackendError::ProcessingFailed(_))
        ));
    }

    #[test]
    fn encode_jpeg_flattens_alpha() {
        let rgba = RustCodec.decode(&png_bytes(20, 10)).unwrap().to_rgba8();
        let bytes = RustCodec
            .encode(&DynamicImage::ImageRgba8(rgba), ImageFormat::Jpeg, Quality::new(80))
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(RustCodec.decode(&bytes).unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn lower_quality_produces_smaller_jpeg() {
        let img = RustCodec.decode(&jpeg_bytes(200, 150)).unwrap();
        let high = RustCodec.encode(&img, ImageFormat::Jpeg, Quality::new(98)).unwrap();
        let low = RustCodec.encode(&img, ImageFormat::Jpeg, Quality::new(50)).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn encode_png() {
        let img = RustCodec.decode(&jpeg_bytes(8, 8)).unwrap();
        let bytes = RustCodec.encode(&img, ImageFormat::Png, Quality::default()).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn local_storage_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sub");
        LocalStorage.create_dir(&dir).unwrap();
        assert!(LocalStorage.exists(&dir));
        let file = dir.join("f.bin");
        LocalStorage.write(&file, b"abc").unwrap();
        assert_eq!(LocalStorage.read(&file).unwrap(), b"abc");
        assert!(LocalStorage.create_dir(&tmp.path().join("a/b")).is_err());
    }
}
