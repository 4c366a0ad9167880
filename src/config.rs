//! Album configuration.
//!
//! Loaded from a TOML file whose every key is optional; anything left out
//! keeps its stock default. Unknown keys are rejected to catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! [album]
//! title = ""
//! subtitle = ""
//! bottom_line = ""
//!
//! [presentation]
//! presentation = "gallery"      # "gallery" or "slideshow"
//! layout = "fullscreen"         # "fullscreen" or "tiled"
//! layout_data = "IOF"
//! panel_position = "bottom"
//! caption_position = "bottom"
//! display_duration = 5000       # ms per slide
//! image_fading = -750           # ms; negative fades out before fading in
//! gallery_horizontal_padding = 80
//! gallery_vertical_padding = 30
//! disable_scrolling = true
//!
//! [pages]
//! noscript = true               # noscript_gallery.html + noscript_image<N>.html
//! offline = true                # index_offline.html + inlined manifests
//! lowres_layout = true
//!
//! [images]
//! sizes = ["160x160", "320x240", "640x480", "1280x800", "2048x1200"]
//! thumbnail = "160x160"
//! preview = "1280x960"
//! quality = 90                  # JPEG quality, 50-98
//!
//! [archive]
//! name = ""                     # empty: no archive
//! size = "3000x2250"            # or "original" for the untouched files
//!
//! [processing]
//! # max_threads = 4             # omit for auto = CPU cores
//! chain_factor = 2
//! batch_size = 16
//!
//! [cache]
//! big_kb = 65536
//! medium_kb = 65536
//! small_kb = 32768
//! big = "1600x1200"
//! small = "320x240"
//! intermediates = true
//! max_resident_images = 20
//! max_resident_previews = 50
//! ```
//!
//! Sizes are strings: `"WxH"`, or `"original"` for the unscaled image. Only
//! the last entry of `images.sizes` may be `"original"`.

use crate::cache::{CacheBudgets, CacheMetrics};
use crate::dispatcher::DispatcherSettings;
use crate::item::ClassSizes;
use crate::types::Size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Everything that shapes an album build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlbumConfig {
    /// Texts shown on every page.
    pub album: AlbumText,
    /// Viewer behavior, written to `info.json`.
    pub presentation: PresentationConfig,
    /// Which static pages to generate.
    pub pages: PagesConfig,
    /// Output sizes and encoding.
    pub images: ImagesConfig,
    /// Optional downloadable archive.
    pub archive: ArchiveConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Image cache tuning.
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlbumText {
    pub title: String,
    pub subtitle: String,
    pub bottom_line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresentationConfig {
    /// `"gallery"` starts on a thumbnail overview, `"slideshow"` on the first image.
    pub presentation: String,
    /// `"fullscreen"` or `"tiled"`.
    pub layout: String,
    /// Layout letters: `I` image, `C` caption, `O` overlay panel, `F` filmstrip.
    pub layout_data: String,
    pub panel_position: String,
    pub caption_position: String,
    /// Milliseconds each slide is shown during a slideshow.
    pub display_duration: u32,
    /// Fade time in milliseconds; negative values fade out before fading in.
    pub image_fading: i32,
    pub gallery_horizontal_padding: u32,
    pub gallery_vertical_padding: u32,
    pub disable_scrolling: bool,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            presentation: "gallery".to_string(),
            layout: "fullscreen".to_string(),
            layout_data: "IOF".to_string(),
            panel_position: "bottom".to_string(),
            caption_position: "bottom".to_string(),
            display_duration: 5000,
            image_fading: -750,
            gallery_horizontal_padding: 80,
            gallery_vertical_padding: 30,
            disable_scrolling: true,
        }
    }
}

impl PresentationConfig {
    /// True if the chosen presentation shows thumbnails, so the thumbnail
    /// size must be among the generated sizes.
    pub fn needs_thumbnails(&self) -> bool {
        self.presentation == "gallery" || self.layout_data.contains('F')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagesConfig {
    /// Generate `noscript_gallery.html` and one `noscript_image<N>.html` per image.
    pub noscript: bool,
    /// Generate the offline page with inlined manifests and `index_offline.html`.
    pub offline: bool,
    /// Ask the viewer to add a low-resolution layout for small screens.
    pub lowres_layout: bool,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            noscript: true,
            offline: true,
            lowres_layout: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Output sizes, strictly increasing, optionally ending with `"original"`.
    pub sizes: Vec<Size>,
    pub thumbnail: Size,
    pub preview: Size,
    /// JPEG encoding quality (50-98).
    pub quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sizes: vec![
                Size::new(160, 160),
                Size::new(320, 240),
                Size::new(640, 480),
                Size::new(1280, 800),
                Size::new(2048, 1200),
            ],
            thumbnail: Size::new(160, 160),
            preview: Size::new(1280, 960),
            quality: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    /// File name of the archive inside the album; empty disables it.
    pub name: String,
    pub size: Size,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: Size::new(3000, 2250),
        }
    }
}

impl ArchiveConfig {
    pub fn enabled(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of resize workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
    /// A produced size is reused as the source of a smaller one only if it
    /// is at least this many times larger in both dimensions.
    pub chain_factor: u32,
    /// Images resized concurrently during a build.
    pub batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            chain_factor: crate::imaging::DEFAULT_CHAIN_FACTOR,
            batch_size: 16,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub big_kb: usize,
    pub medium_kb: usize,
    pub small_kb: usize,
    /// Images larger than this in either dimension go to the big tier.
    pub big: Size,
    /// Images smaller than this in both dimensions go to the small tier.
    pub small: Size,
    /// Cache a small-threshold copy when a big image serves a small request.
    pub intermediates: bool,
    /// Items allowed to hold a decoded original at once.
    pub max_resident_images: usize,
    /// Items allowed to hold a decoded preview at once.
    pub max_resident_previews: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let metrics = CacheMetrics::default();
        let budgets = CacheBudgets::default();
        Self {
            big_kb: budgets.big / 1024,
            medium_kb: budgets.medium / 1024,
            small_kb: budgets.small / 1024,
            big: metrics.big,
            small: metrics.small,
            intermediates: metrics.intermediates,
            max_resident_images: 20,
            max_resident_previews: 50,
        }
    }
}

impl AlbumConfig {
    /// Validate config values are within acceptable ranges.
    ///
    /// The ordering rules of `images.sizes` are checked by the album builder
    /// before it touches the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=98).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 50-98".into(),
            ));
        }
        if self.images.sizes.is_empty() {
            return Err(ConfigError::Validation(
                "images.sizes must not be empty".into(),
            ));
        }
        if self.images.thumbnail.is_original() || self.images.preview.is_original() {
            return Err(ConfigError::Validation(
                "images.thumbnail and images.preview must be concrete sizes".into(),
            ));
        }
        if !matches!(self.presentation.presentation.as_str(), "gallery" | "slideshow") {
            return Err(ConfigError::Validation(format!(
                "presentation.presentation must be \"gallery\" or \"slideshow\", not {:?}",
                self.presentation.presentation
            )));
        }
        if !matches!(self.presentation.layout.as_str(), "fullscreen" | "tiled") {
            return Err(ConfigError::Validation(format!(
                "presentation.layout must be \"fullscreen\" or \"tiled\", not {:?}",
                self.presentation.layout
            )));
        }
        if self.processing.chain_factor == 0 {
            return Err(ConfigError::Validation(
                "processing.chain_factor must be at least 1".into(),
            ));
        }
        if self.processing.batch_size == 0 {
            return Err(ConfigError::Validation(
                "processing.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn class_sizes(&self) -> ClassSizes {
        ClassSizes {
            thumbnail: self.images.thumbnail,
            preview: self.images.preview,
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        let cache = &self.cache;
        DispatcherSettings {
            threads: effective_threads(&self.processing),
            metrics: CacheMetrics {
                big: cache.big,
                small: cache.small,
                intermediates: cache.intermediates,
            },
            budgets: CacheBudgets {
                big: cache.big_kb * 1024,
                medium: cache.medium_kb * 1024,
                small: cache.small_kb * 1024,
            },
        }
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(text: &str) -> Result<AlbumConfig, ConfigError> {
    let config: AlbumConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Load a config file, or the stock defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<AlbumConfig, ConfigError> {
    match path {
        Some(path) => parse_config(&fs::read_to_string(path)?),
        None => Ok(AlbumConfig::default()),
    }
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Photo Album Configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Texts shown on every page
# ---------------------------------------------------------------------------
[album]
title = ""
subtitle = ""
bottom_line = ""

# ---------------------------------------------------------------------------
# Viewer behavior
# ---------------------------------------------------------------------------
[presentation]
# "gallery" opens on a thumbnail overview, "slideshow" on the first image.
presentation = "gallery"

# "fullscreen" or "tiled".
layout = "fullscreen"

# Layout letters: I = image, C = caption, O = overlay panel, F = filmstrip.
# A filmstrip needs the thumbnail size among images.sizes.
layout_data = "IOF"

panel_position = "bottom"
caption_position = "bottom"

# Milliseconds per slide in slideshow mode.
display_duration = 5000

# Fade time in milliseconds. Negative: fade out before fading in.
image_fading = -750

gallery_horizontal_padding = 80
gallery_vertical_padding = 30
disable_scrolling = true

# ---------------------------------------------------------------------------
# Generated pages
# ---------------------------------------------------------------------------
[pages]
# Static pages for browsers without JavaScript.
noscript = true

# Single-file page with all manifests inlined, plus index_offline.html.
offline = true

lowres_layout = true

# ---------------------------------------------------------------------------
# Output images
# ---------------------------------------------------------------------------
[images]
# Strictly increasing in both dimensions. May end with "original" to
# publish the untouched source files as well.
sizes = ["160x160", "320x240", "640x480", "1280x800", "2048x1200"]

thumbnail = "160x160"
preview = "1280x960"

# JPEG quality, 50-98.
quality = 90

# ---------------------------------------------------------------------------
# Downloadable archive
# ---------------------------------------------------------------------------
[archive]
# File name of the ZIP archive inside the album. Empty: no archive.
name = ""

# Image size inside the archive, or "original" for the source files.
size = "3000x2250"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel resize workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4

# Reuse a produced size as source for a smaller one when it is at least
# this many times larger.
chain_factor = 2

# Images resized concurrently; bounds peak memory.
batch_size = 16

# ---------------------------------------------------------------------------
# Image cache
# ---------------------------------------------------------------------------
[cache]
# Budget per tier in KiB.
big_kb = 65536
medium_kb = 65536
small_kb = 32768

# Tier thresholds.
big = "1600x1200"
small = "320x240"

# Keep a small copy when a big image serves a small request.
intermediates = true

# Items allowed to hold decoded originals / previews at the same time.
max_resident_images = 20
max_resident_previews = 50
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = AlbumConfig::default();
        assert_eq!(config.presentation.presentation, "gallery");
        assert_eq!(config.presentation.image_fading, -750);
        assert_eq!(config.images.sizes.len(), 5);
        assert_eq!(config.images.quality, 90);
        assert_eq!(config.archive.size, Size::new(3000, 2250));
        assert!(!config.archive.enabled());
        assert_eq!(config.processing.chain_factor, 2);
        assert_eq!(config.processing.batch_size, 16);
        assert_eq!(config.cache.big_kb, 65536);
        assert_eq!(config.cache.small_kb, 32768);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[album]
title = "Holidays"

[images]
sizes = ["160x160", "640x480", "original"]
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.album.title, "Holidays");
        assert_eq!(
            config.images.sizes,
            vec![Size::new(160, 160), Size::new(640, 480), Size::ORIGINAL]
        );
        // Default values preserved
        assert_eq!(config.images.quality, 90);
        assert_eq!(config.presentation.layout, "fullscreen");
    }

    #[test]
    fn malformed_size_is_parse_error() {
        let toml = "[images]\nthumbnail = \"160by160\"\n";
        assert!(matches!(parse_config(toml), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn needs_thumbnails_for_gallery_or_filmstrip() {
        let mut p = PresentationConfig::default();
        assert!(p.needs_thumbnails());
        p.presentation = "slideshow".into();
        assert!(p.needs_thumbnails(), "layout data IOF has a filmstrip");
        p.layout_data = "IC".into();
        assert!(!p.needs_thumbnails());
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    #[test]
    fn dispatcher_settings_convert_kib() {
        let mut config = AlbumConfig::default();
        config.cache.small_kb = 1;
        config.cache.intermediates = false;
        let settings = config.dispatcher_settings();
        assert_eq!(settings.budgets.small, 1024);
        assert_eq!(settings.budgets.big, 64 * 1024 * 1024);
        assert!(!settings.metrics.intermediates);
        assert!(settings.threads >= 1);
    }

    #[test]
    fn class_sizes_from_images_section() {
        let config = AlbumConfig::default();
        let sizes = config.class_sizes();
        assert_eq!(sizes.thumbnail, Size::new(160, 160));
        assert_eq!(sizes.preview, Size::new(1280, 960));
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_threads: Some(1),
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_threads(&config), 1);
        let config = ProcessingConfig {
            max_threads: Some(99999),
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_threads(&config), cores);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn load_config_without_path_is_default() {
        assert_eq!(load_config(None).unwrap(), AlbumConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("album.toml");
        fs::write(&path, "[archive]\nname = \"all.zip\"\nsize = \"original\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.archive.name, "all.zip");
        assert!(config.archive.size.is_original());
        assert!(config.archive.enabled());
    }

    #[test]
    fn load_config_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(Some(&tmp.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    // =========================================================================
    // Unknown keys
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        assert!(parse_config("[images]\nqualty = 80\n").is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(parse_config("[colors]\nbackground = \"#fff\"\n").is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_quality_bounds() {
        for (quality, ok) in [(49, false), (50, true), (98, true), (99, false)] {
            let mut config = AlbumConfig::default();
            config.images.quality = quality;
            assert_eq!(config.validate().is_ok(), ok, "quality {quality}");
        }
    }

    #[test]
    fn validate_rejects_unknown_presentation() {
        let result = parse_config("[presentation]\npresentation = \"carousel\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_empty_sizes_and_zero_batch() {
        let mut config = AlbumConfig::default();
        config.images.sizes.clear();
        assert!(config.validate().is_err());

        let mut config = AlbumConfig::default();
        config.processing.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(AlbumConfig::default().validate().is_ok());
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let parsed = parse_config(stock_config_toml()).unwrap();
        assert_eq!(parsed, AlbumConfig::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let text = stock_config_toml();
        for section in ["[album]", "[presentation]", "[pages]", "[images]", "[archive]", "[processing]", "[cache]"] {
            assert!(text.contains(section), "missing {section}");
        }
    }

    #[test]
    fn default_config_serializes_to_toml() {
        let text = toml::to_string(&AlbumConfig::default()).unwrap();
        let back: AlbumConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, AlbumConfig::default());
    }
}
