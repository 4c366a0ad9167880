//! Shared types used across the cache, dispatcher, items, and album builder.
//!
//! [`Size`] doubles as the "original size" marker: a zero-area size means
//! "give me the unscaled original" wherever a target size is expected. It is
//! written `WxH` in configs and directory names, `original_size` for the marker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width and height in pixels.
///
/// `Size::ORIGINAL` (0x0) is the marker for the unscaled original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Marker for "the original, unscaled image".
    pub const ORIGINAL: Size = Size {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True for the original marker (any zero dimension).
    pub fn is_original(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if `self` fits inside `other` in both dimensions.
    pub fn fits_within(self, other: Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Directory label: `WxH`, or `original_size` for the marker.
    pub fn label(self) -> String {
        if self.is_original() {
            "original_size".to_string()
        } else {
            format!("{}x{}", self.width, self.height)
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_original() {
            write!(f, "original")
        } else {
            write!(f, "{}x{}", self.width, self.height)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid size '{0}': expected WxH or 'original'")]
pub struct ParseSizeError(pub String);

impl FromStr for Size {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("original") || trimmed == "original_size" {
            return Ok(Size::ORIGINAL);
        }
        let (w, h) = trimmed
            .split_once(['x', 'X'])
            .ok_or_else(|| ParseSizeError(s.to_string()))?;
        let width = w.trim().parse().map_err(|_| ParseSizeError(s.to_string()))?;
        let height = h.trim().parse().map_err(|_| ParseSizeError(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ParseSizeError(s.to_string()));
        }
        Ok(Size { width, height })
    }
}

impl TryFrom<String> for Size {
    type Error = ParseSizeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Size> for String {
    fn from(size: Size) -> Self {
        size.to_string()
    }
}

/// The three independently requested renditions of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageClass {
    /// The full, unscaled original.
    Original,
    Preview,
    Thumbnail,
}

impl ImageClass {
    pub const ALL: [ImageClass; 3] = [
        ImageClass::Thumbnail,
        ImageClass::Preview,
        ImageClass::Original,
    ];

    fn bit(self) -> u8 {
        match self {
            ImageClass::Original => 1,
            ImageClass::Preview => 2,
            ImageClass::Thumbnail => 4,
        }
    }
}

/// Bitmask of image classes with an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassSet(u8);

impl ClassSet {
    pub fn contains(self, class: ImageClass) -> bool {
        self.0 & class.bit() != 0
    }

    pub fn insert(&mut self, class: ImageClass) {
        self.0 |= class.bit();
    }

    pub fn remove(&mut self, class: ImageClass) {
        self.0 &= !class.bit();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
