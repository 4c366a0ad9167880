//! Image processing in pure Rust, on top of the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory` |
//! | **Encode** | `JpegEncoder` with quality, `write_to` for lossless formats |
//! | **Quick resize** | nearest pre-shrink + Triangle |
//! | **Smart resize** | nearest pre-shrink + Lanczos3 |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageCodec`] and [`Storage`] traits + [`RustCodec`] and [`LocalStorage`]
//! - **Operations**: Resizing decoded images, including chained series

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageCodec, Storage, format_for_path};
pub use calculations::{closest_area, derive_file_name, fit_within};
pub use operations::{
    DEFAULT_CHAIN_FACTOR, dimensions, quick_resize, resize_series, smart_resize,
};
pub use params::{Quality, ResizeStrategy};
pub use rust_backend::{LocalStorage, RustCodec, supported_input_extensions};
