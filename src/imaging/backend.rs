//! Codec and storage traits plus shared error type.
//!
//! The dispatcher and album builder never touch pixels or files directly.
//! They go through two collaborators:
//!
//! | Trait | Operations |
//! |---|---|
//! | [`ImageCodec`] | decode bytes → bitmap, encode bitmap → bytes at a quality |
//! | [`Storage`] | read, write, create_dir, exists, is_dir, remove |
//!
//! The production implementations are
//! [`RustCodec`](super::rust_backend::RustCodec) and
//! [`LocalStorage`](super::rust_backend::LocalStorage). Tests swap in the
//! recording mocks from this module's `tests` submodule.

use super::params::Quality;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Turns encoded bytes into bitmaps and back.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError>;

    fn encode(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError>;
}

/// The filesystem as seen by the dispatcher and the album builder.
pub trait Storage: Send + Sync {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()>;

    /// Create a single directory; the parent must exist.
    fn create_dir(&self, path: &Path) -> std::io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Output format implied by a file name's extension.
pub fn format_for_path(path: &Path) -> Result<ImageFormat, BackendError> {
    ImageFormat::from_path(path).map_err(|_| {
        BackendError::ProcessingFailed(format!(
            "Unsupported output format: {}",
            path.display()
        ))
    })
}
