//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. The
//! [`operations`](super::operations) module applies them to decoded images,
//! and the [`backend`](super::backend) codec consumes [`Quality`] when
//! encoding.
//!
//! ## Types
//!
//! - [`Quality`] - Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`ResizeStrategy`] - When to pre-shrink with a fast filter before the smooth scale.

use image::imageops::FilterType;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Two-stage downscale parameters.
///
/// When the source is larger than `trigger` times the target in either
/// dimension, it is first shrunk with nearest-neighbour sampling to
/// `preshrink` times the target, then smoothly scaled with `filter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeStrategy {
    pub trigger: u32,
    pub preshrink: u32,
    pub filter: FilterType,
}

impl ResizeStrategy {
    /// Cheap scaling for interactive requests.
    pub const QUICK: ResizeStrategy = ResizeStrategy {
        trigger: 2,
        preshrink: 2,
        filter: FilterType::Triangle,
    };

    /// Higher quality scaling for deployed slides.
    pub const SMART: ResizeStrategy = ResizeStrategy {
        trigger: 4,
        preshrink: 2,
        filter: FilterType::Lanczos3,
    };
}
