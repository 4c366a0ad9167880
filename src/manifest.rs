//! The album's manifest files.
//!
//! The viewer learns everything about an album from five small JSON files
//! below `slides/` (also inlined into the offline page):
//!
//! | File | Shape |
//! |---|---|
//! | `info.json` | flat string map: texts, presentation settings, numbers and booleans as strings |
//! | `directories.json` | list of size directories, `"WxH"` or `"original_size"` |
//! | `filenames.json` | list of destination file names of the valid images |
//! | `captions.json` | map destination name → caption |
//! | `resolutions.json` | `[{group: [[w, h], ...]}, {destination name: group}]` |
//!
//! `resolutions.json` records the actual pixel size of every image in every
//! directory. Images that end up with identical size lists share a group
//! (`res1`, `res2`, ...) so the file stays small for uniform albums.
//!
//! Everything is written with the [`json`](crate::json) micro-codec and read
//! back with its cursor parser.

use crate::config::AlbumConfig;
use crate::imaging::fit_within;
use crate::json::{self, Value};
use crate::types::Size;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const INFO: &str = "info.json";
pub const DIRECTORIES: &str = "directories.json";
pub const FILENAMES: &str = "filenames.json";
pub const CAPTIONS: &str = "captions.json";
pub const RESOLUTIONS: &str = "resolutions.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Malformed(String),
}

/// Contents of `info.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumInfo {
    pub title: String,
    pub subtitle: String,
    pub bottom_line: String,
    pub presentation: String,
    pub layout: String,
    pub layout_data: String,
    pub panel_position: String,
    pub caption_position: String,
    pub display_duration: i64,
    pub image_fading: i64,
    pub thumbnail: Size,
    pub gallery_horizontal_padding: i64,
    pub gallery_vertical_padding: i64,
    pub disable_scrolling: bool,
    pub lowres_layout: bool,
}

fn parse_flag(value: Option<&String>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "on" | "1"))
}

fn parse_number(value: Option<&String>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

impl AlbumInfo {
    pub fn from_config(config: &AlbumConfig) -> Self {
        let p = &config.presentation;
        Self {
            title: config.album.title.clone(),
            subtitle: config.album.subtitle.clone(),
            bottom_line: config.album.bottom_line.clone(),
            presentation: p.presentation.clone(),
            layout: p.layout.clone(),
            layout_data: p.layout_data.clone(),
            panel_position: p.panel_position.clone(),
            caption_position: p.caption_position.clone(),
            display_duration: p.display_duration.into(),
            image_fading: p.image_fading.into(),
            thumbnail: config.images.thumbnail,
            gallery_horizontal_padding: p.gallery_horizontal_padding.into(),
            gallery_vertical_padding: p.gallery_vertical_padding.into(),
            disable_scrolling: p.disable_scrolling,
            lowres_layout: config.pages.lowres_layout,
        }
    }

    pub fn to_json(&self) -> String {
        let text = |s: &String| Value::from(s.as_str());
        let number = |n: i64| Value::from(n.to_string());
        let map: BTreeMap<String, Value> = [
            ("title", text(&self.title)),
            ("subtitle", text(&self.subtitle)),
            ("bottom line", text(&self.bottom_line)),
            ("presentation type", text(&self.presentation)),
            ("layout type", text(&self.layout)),
            ("layout data", text(&self.layout_data)),
            ("panel position", text(&self.panel_position)),
            ("caption position", text(&self.caption_position)),
            ("display duration", number(self.display_duration)),
            ("image fading", number(self.image_fading)),
            ("thumbnail width", number(self.thumbnail.width.into())),
            ("thumbnail height", number(self.thumbnail.height.into())),
            ("gallery horizontal padding", number(self.gallery_horizontal_padding)),
            ("gallery vertical padding", number(self.gallery_vertical_padding)),
            ("disable scrolling", Value::from(self.disable_scrolling)),
            ("add lowres layout", Value::from(self.lowres_layout)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        format!("{}\n", json::write(&Value::Map(map)))
    }

    /// Parse `info.json`. Missing keys read as empty, zero or false.
    pub fn from_info_json(text: &str) -> Result<Self, ManifestError> {
        let map = json::parse_string_map(text)
            .ok_or_else(|| ManifestError::Malformed(INFO.to_string()))?;
        let text = |key: &str| map.get(key).cloned().unwrap_or_default();
        let number = |key: &str| parse_number(map.get(key));
        let dimension = |key: &str| u32::try_from(number(key)).unwrap_or(0);
        Ok(Self {
            title: text("title"),
            subtitle: text("subtitle"),
            bottom_line: text("bottom line"),
            presentation: text("presentation type"),
            layout: text("layout type"),
            layout_data: text("layout data"),
            panel_position: text("panel position"),
            caption_position: text("caption position"),
            display_duration: number("display duration"),
            image_fading: number("image fading"),
            thumbnail: Size::new(dimension("thumbnail width"), dimension("thumbnail height")),
            gallery_horizontal_padding: number("gallery horizontal padding"),
            gallery_vertical_padding: number("gallery vertical padding"),
            disable_scrolling: parse_flag(map.get("disable scrolling")),
            lowres_layout: parse_flag(map.get("add lowres layout")),
        })
    }
}

pub fn directories_json(sizes: &[Size]) -> String {
    json::write(&Value::StrList(sizes.iter().map(|s| s.label()).collect()))
}

pub fn filenames_json<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    json::write(&Value::StrList(names.into_iter().map(str::to_string).collect()))
}

pub fn captions_json<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let map = entries
        .into_iter()
        .map(|(name, caption)| (name.to_string(), Value::from(caption)))
        .collect();
    format!("{}\n", json::write(&Value::Map(map)))
}

/// Pixel size an image of `source` dimensions has in the `target` directory.
/// Never larger than the source: small images are not upscaled.
pub fn output_size(source: Size, target: Size) -> Size {
    if target.is_original() || source.fits_within(target) {
        source
    } else {
        fit_within(source, target)
    }
}

/// `resolutions.json` for images given as (destination name, original size).
pub fn resolutions_json<'a>(sizes: &[Size], images: impl IntoIterator<Item = (&'a str, Size)>) -> String {
    let mut groups: BTreeMap<String, Value> = BTreeMap::new();
    let mut by_signature: HashMap<Vec<Size>, String> = HashMap::new();
    let mut assignment: BTreeMap<String, Value> = BTreeMap::new();

    for (name, original) in images {
        let actual: Vec<Size> = sizes.iter().map(|&s| output_size(original, s)).collect();
        let group = match by_signature.get(&actual) {
            Some(group) => group.clone(),
            None => {
                let group = format!("res{}", by_signature.len() + 1);
                let pairs = actual.iter().map(|&s| Value::Size(s)).collect();
                groups.insert(group.clone(), Value::List(pairs));
                by_signature.insert(actual, group.clone());
                group
            }
        };
        assignment.insert(name.to_string(), Value::Str(group));
    }

    let tree = Value::List(vec![Value::Map(groups), Value::Map(assignment)]);
    format!("{}\n", json::write(&tree))
}

/// The five manifest texts of one album.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifests {
    pub info: String,
    pub directories: String,
    pub filenames: String,
    pub captions: String,
    pub resolutions: String,
}

impl Manifests {
    /// (file name, content) pairs in the order the viewer loads them.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            (INFO, &self.info),
            (DIRECTORIES, &self.directories),
            (FILENAMES, &self.filenames),
            (RESOLUTIONS, &self.resolutions),
            (CAPTIONS, &self.captions),
        ]
    }
}

/// An album's manifests read back from `<album>/slides/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumManifest {
    pub info: AlbumInfo,
    pub directories: Vec<String>,
    pub filenames: Vec<String>,
    pub captions: BTreeMap<String, String>,
}

impl AlbumManifest {
    pub fn read(album: &Path) -> Result<Self, ManifestError> {
        let slides = album.join("slides");
        let read = |name: &str| fs::read_to_string(slides.join(name));
        let malformed = |name: &str| ManifestError::Malformed(name.to_string());

        let info = AlbumInfo::from_info_json(&read(INFO)?)?;
        let directories = json::parse_string_list(&read(DIRECTORIES)?).ok_or_else(|| malformed(DIRECTORIES))?;
        let filenames = json::parse_string_list(&read(FILENAMES)?).ok_or_else(|| malformed(FILENAMES))?;
        let captions = json::parse_string_map(&read(CAPTIONS)?).ok_or_else(|| malformed(CAPTIONS))?;
        Ok(Self {
            info,
            directories,
            filenames,
            captions,
        })
    }
}
