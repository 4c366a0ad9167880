//! # Photo Album
//!
//! Turns a folder of photographs into a self-contained web photo album: a
//! directory of resized slides, small JSON manifests, and the HTML and script
//! files of a viewer that reads them. The result can be served by any static
//! web server or opened straight from disk.
//!
//! # Architecture
//!
//! ```text
//! source/ ──scan──▶ Album ──build──▶ album/
//!                     │               ├── slides/<WxH>/*.jpg
//!                     │               ├── slides/*.json
//!                     ▼               └── *.html, viewer runtime, archive
//!                 Dispatcher
//!            (I/O thread + resize pool + tiered cache)
//! ```
//!
//! An [`album::Album`] owns an ordered list of [`item::ImageItem`]s and a
//! [`dispatcher::Dispatcher`]. Interactive use (thumbnails, previews) goes
//! through the items, which request bitmaps asynchronously and pick up the
//! replies on the owner thread. A build bypasses the queue: it hands whole
//! images to the resize pool in batches and writes the results itself.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`album`] | Album builder: collection, size validation, build, stop, rollback |
//! | [`item`] | Per-photo state machine and the resident-bitmap caps |
//! | [`dispatcher`] | Background load/save with priorities, dedupe, and owner-thread replies |
//! | [`cache`] | Decoded images in three size tiers with byte budgets |
//! | [`imaging`] | Resize arithmetic and operations, codec and storage seams |
//! | [`manifest`] | `slides/*.json` writers and the reader behind `inspect` |
//! | [`generate`] | HTML pages from the built-in templates, offline page assembly |
//! | [`json`] | The small JSON dialect the viewer reads and writes |
//! | [`archive`] | Stored (uncompressed) ZIP writer for the download archive |
//! | [`bundle`] | Viewer runtime files embedded at compile time and deployed per album |
//! | [`config`] | TOML album config, defaults, and validation |
//! | [`scan`] | Source directory walk, sidecar captions, image lists |
//! | [`types`] | `Size` and `ImageClass`, shared by every module |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Owner Thread
//!
//! Items and the dispatcher's mailboxes are touched only by the thread that
//! created the dispatcher. Worker threads communicate exclusively by sending
//! messages, so there is no shared mutable state beyond the cache and the
//! request queue, both behind their own locks.
//!
//! ## Plain Files Out
//!
//! The album is plain HTML, JSON and images. Manifests are written with a
//! tiny hand-rolled JSON writer whose output the viewer's own parser is known
//! to accept, and the archive stores files uncompressed (JPEGs do not shrink)
//! so it can be written in one pass without holding it in memory.

pub mod album;
pub mod archive;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod generate;
pub mod imaging;
pub mod item;
pub mod json;
pub mod manifest;
pub mod output;
pub mod scan;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
