//! Source discovery: which photos go into an album, in which order.
//!
//! ## Directory Layout
//!
//! ```text
//! holiday/                    # Source directory
//! ├── 01-arrival.jpg          # Numbered files sort by number
//! ├── 01-arrival.txt          # Caption sidecar for 01-arrival.jpg
//! ├── 02-beach.png
//! ├── 10-sunset.jpg           # 10 sorts after 02, not after 01
//! ├── harbour.jpg             # Unnumbered files follow, by name
//! ├── .thumbs/                # Hidden entries are skipped
//! └── day2/                   # Only visited with --recursive
//!     └── 01-hike.jpg
//! ```
//!
//! A caption sidecar is a text file with the photo's stem and a `.txt`
//! extension. Its whitespace is collapsed to single spaces.
//!
//! ## Image Lists
//!
//! Instead of a directory, photos can be named in a list file (GQView
//! collections and similar): names separated by line feeds or commas,
//! each optionally enclosed in double quotes. Relative names resolve
//! against the list file's directory.

use crate::imaging::supported_input_extensions;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// A photo found in the source, with its sidecar caption if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub caption: Option<String>,
}

/// Photos below `root`, in album order. Only `root` itself is read unless
/// `recursive` is set; subdirectories then follow the files of their parent.
pub fn scan(root: &Path, recursive: bool) -> Result<Vec<SourceImage>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by(|a, b| {
            // Files before directories, then number prefix, then name.
            let key = |e: &walkdir::DirEntry| {
                let name = e.file_name().to_string_lossy().to_string();
                (e.file_type().is_dir(), parse_number_prefix(&name).unwrap_or(u32::MAX), name)
            };
            key(a).cmp(&key(b))
        });

    let mut images = Vec::new();
    let visible = |e: &walkdir::DirEntry| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy());
    for entry in walker.into_iter().filter_entry(visible) {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, supported_input_extensions()) {
            continue;
        }
        images.push(SourceImage {
            path: path.to_path_buf(),
            caption: read_caption(path)?,
        });
    }
    Ok(images)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Parse just the number prefix from a name
fn parse_number_prefix(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    prefix.parse().ok()
}

/// True if `path` ends in one of `extensions`, ignoring case.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// The caption sidecar of `image`, whitespace collapsed. `None` if there
/// is no sidecar or it holds only whitespace.
pub fn read_caption(image: &Path) -> Result<Option<String>, ScanError> {
    let sidecar = image.with_extension("txt");
    if !sidecar.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&sidecar)?;
    let caption = collapse_whitespace(&text);
    Ok((!caption.is_empty()).then_some(caption))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Paths named in an image list, in order. Nothing is checked for
/// existence here.
pub fn parse_image_list(text: &str, base: &Path) -> Vec<PathBuf> {
    text.lines()
        .flat_map(|line| line.split(','))
        .filter_map(|part| {
            let part = part.trim();
            let name = match (part.find('"'), part.rfind('"')) {
                (Some(first), Some(last)) if last > first + 1 => &part[first + 1..last],
                (Some(_), _) => return None,
                _ => part,
            };
            (!name.is_empty()).then(|| base.join(name))
        })
        .collect()
}
