//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Photos (3)
//! 001 01-arrival.jpg
//!     Caption: Sunset over the bay
//! 002 02-beach.png
//! 003 harbour.jpg
//! ```
//!
//! ## Build
//!
//! ```text
//! [1/3] 01-arrival.jpg
//! [2/3] 02-beach.png
//! warning: could not resize image 02-beach.png: ...
//! [3/3] harbour.jpg
//! Album complete, 1 warning
//! ```
//!
//! ## Inspect
//!
//! ```text
//! Holiday
//!     Subtitle: Summer 2024
//!     Presentation: gallery, fullscreen (IOF)
//!     Sizes: 160x160, 320x240, 640x480
//! Photos (3)
//! 001 01-arrival.jpg
//!     Caption: Sunset over the bay
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for testability
//! and, where the CLI prints it in one go, a `print_*` wrapper that writes to
//! stdout. Format functions are pure: no I/O, no side effects.

use crate::album::BuildEvent;
use crate::manifest::AlbumManifest;
use crate::scan::SourceImage;
use std::path::Path;

/// Captions longer than this are cut in listings.
const CAPTION_WIDTH: usize = 60;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// One numbered photo line with an optional indented caption.
///
/// ```text
/// 001 01-arrival.jpg
///     Caption: Sunset over the bay
/// ```
fn photo_lines(index: usize, name: &str, caption: Option<&str>) -> Vec<String> {
    let mut lines = vec![format!("{} {}", format_index(index), name)];
    if let Some(caption) = caption.filter(|c| !c.is_empty()) {
        lines.push(format!("{}Caption: {}", indent(1), truncate_desc(caption, CAPTION_WIDTH)));
    }
    lines
}

// ============================================================================
// Check: discovered photos
// ============================================================================

/// Format the photos found in a source directory, paths relative to `root`.
pub fn format_scan_output(images: &[SourceImage], root: &Path) -> Vec<String> {
    let mut lines = vec![format!("Photos ({})", images.len())];
    for (i, image) in images.iter().enumerate() {
        let shown = image.path.strip_prefix(root).unwrap_or(&image.path);
        lines.extend(photo_lines(i + 1, &shown.to_string_lossy(), image.caption.as_deref()));
    }
    lines
}

pub fn print_scan_output(images: &[SourceImage], root: &Path) {
    for line in format_scan_output(images, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Build: progress events
// ============================================================================

/// Format one build event for the terminal.
pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Progress {
            current,
            total,
            name,
        } => vec![format!("[{current}/{total}] {name}")],
        BuildEvent::Warning(message) => vec![format!("warning: {message}")],
        BuildEvent::Finished { completed, message } => {
            let problems: Vec<&str> = message.lines().filter(|l| !l.is_empty()).collect();
            match (completed, problems.is_empty()) {
                (true, true) => vec!["Album complete".to_string()],
                (true, false) => vec![format!("Album complete, {}", plural(problems.len(), "warning"))],
                (false, true) => vec!["Build stopped".to_string()],
                (false, false) => {
                    let mut lines = vec!["Build failed".to_string()];
                    lines.extend(problems.iter().map(|p| format!("{}{}", indent(1), p)));
                    lines
                }
            }
        }
    }
}

// ============================================================================
// Inspect: an existing album
// ============================================================================

/// Format the manifests of a built album.
pub fn format_inspect_output(manifest: &AlbumManifest) -> Vec<String> {
    let info = &manifest.info;
    let mut lines = Vec::new();
    lines.push(if info.title.is_empty() {
        "(untitled album)".to_string()
    } else {
        info.title.clone()
    });
    if !info.subtitle.is_empty() {
        lines.push(format!("{}Subtitle: {}", indent(1), info.subtitle));
    }
    lines.push(format!(
        "{}Presentation: {}, {} ({})",
        indent(1),
        info.presentation,
        info.layout,
        info.layout_data
    ));
    lines.push(format!("{}Sizes: {}", indent(1), manifest.directories.join(", ")));

    lines.push(format!("Photos ({})", manifest.filenames.len()));
    for (i, name) in manifest.filenames.iter().enumerate() {
        let caption = manifest.captions.get(name).map(String::as_str);
        lines.extend(photo_lines(i + 1, name, caption));
    }
    lines
}

pub fn print_inspect_output(manifest: &AlbumManifest) {
    for line in format_inspect_output(manifest) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlbumConfig;
    use crate::manifest::AlbumInfo;
    use std::path::PathBuf;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn truncate_desc_short() {
        assert_eq!(truncate_desc("Short text", 40), "Short text");
    }

    #[test]
    fn truncate_desc_exact() {
        let text = "a".repeat(40);
        assert_eq!(truncate_desc(&text, 40), text);
    }

    #[test]
    fn truncate_desc_long() {
        let text = "a".repeat(50);
        assert_eq!(truncate_desc(&text, 40), format!("{}...", "a".repeat(40)));
    }

    #[test]
    fn truncate_desc_respects_char_boundaries() {
        assert_eq!(truncate_desc("ééééé", 2), "éé...");
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(1234), "1234");
    }

    // =========================================================================
    // Check output
    // =========================================================================

    #[test]
    fn scan_output_lists_photos_with_captions() {
        let root = Path::new("/photos");
        let images = vec![
            SourceImage {
                path: PathBuf::from("/photos/01-arrival.jpg"),
                caption: Some("Sunset over the bay".into()),
            },
            SourceImage {
                path: PathBuf::from("/photos/day2/hike.jpg"),
                caption: None,
            },
        ];
        let lines = format_scan_output(&images, root);
        assert_eq!(
            lines,
            vec![
                "Photos (2)",
                "001 01-arrival.jpg",
                "    Caption: Sunset over the bay",
                "002 day2/hike.jpg",
            ]
        );
    }

    #[test]
    fn scan_output_empty() {
        assert_eq!(format_scan_output(&[], Path::new("/")), vec!["Photos (0)"]);
    }

    // =========================================================================
    // Build events
    // =========================================================================

    #[test]
    fn progress_event() {
        let event = BuildEvent::Progress {
            current: 2,
            total: 5,
            name: "b.jpg".into(),
        };
        assert_eq!(format_build_event(&event), vec!["[2/5] b.jpg"]);
    }

    #[test]
    fn warning_event() {
        let event = BuildEvent::Warning("could not resize image x.jpg: bad".into());
        assert_eq!(
            format_build_event(&event),
            vec!["warning: could not resize image x.jpg: bad"]
        );
    }

    #[test]
    fn finished_events() {
        let done = |completed: bool, message: &str| {
            format_build_event(&BuildEvent::Finished {
                completed,
                message: message.into(),
            })
        };
        assert_eq!(done(true, ""), vec!["Album complete"]);
        assert_eq!(done(true, "one\ntwo"), vec!["Album complete, 2 warnings"]);
        assert_eq!(done(true, "one"), vec!["Album complete, 1 warning"]);
        assert_eq!(done(false, ""), vec!["Build stopped"]);
        assert_eq!(
            done(false, "directory: out already exists!"),
            vec!["Build failed", "    directory: out already exists!"]
        );
    }

    // =========================================================================
    // Inspect output
    // =========================================================================

    #[test]
    fn inspect_output_summarizes_album() {
        let mut config = AlbumConfig::default();
        config.album.title = "Holiday".into();
        config.album.subtitle = "Summer 2024".into();
        let manifest = AlbumManifest {
            info: AlbumInfo::from_config(&config),
            directories: vec!["160x160".into(), "640x480".into()],
            filenames: vec!["a.jpg".into(), "b.jpg".into()],
            captions: [("b.jpg".to_string(), "Beach".to_string())].into_iter().collect(),
        };
        let lines = format_inspect_output(&manifest);
        assert_eq!(lines[0], "Holiday");
        assert_eq!(lines[1], "    Subtitle: Summer 2024");
        assert_eq!(lines[2], "    Presentation: gallery, fullscreen (IOF)");
        assert_eq!(lines[3], "    Sizes: 160x160, 640x480");
        assert_eq!(lines[4], "Photos (2)");
        assert_eq!(&lines[5..], ["001 a.jpg", "002 b.jpg", "    Caption: Beach"]);
    }
}
