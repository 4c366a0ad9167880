//! The album builder: a collection of photos and the build that deploys them.
//!
//! # Build Steps
//!
//! ```text
//! 1. validate sizes, create the destination directory
//! 2. deploy the runtime bundle (viewer page, script, stylesheet)
//! 3. create slides/<WxH>/ for every output size
//! 4. resize every image on the pool, batch by batch, and write the slides
//! 5. feed one rendition per image into the archive, if configured
//! 6. write the manifests to slides/*.json and inline them into the offline page
//! 7. write index.html, index_offline.html and the no-script pages
//! ```
//!
//! Each step that fails aborts the build and removes everything created so
//! far. A photo that cannot be loaded or resized is not fatal: it becomes a
//! warning and is left out of the manifests and pages.
//!
//! # Memory
//!
//! At most `processing.batch_size` images are in flight at once. Resize tasks
//! encode their outputs before handing them back, so the owner thread only
//! holds encoded bytes, never a batch worth of decoded originals.
//!
//! # Stopping
//!
//! [`StopHandle::stop`] may be called from any thread. The flag is checked
//! between batches: tasks already dispatched still finish, but no manifest
//! or page is written afterwards and the build reports `completed = false`
//! with an empty message.

use crate::archive::{ArchiveError, ArchiveWriter};
use crate::bundle::{self, BundleError};
use crate::config::{AlbumConfig, ConfigError};
use crate::dispatcher::{DispatchError, Dispatcher, IoCore, Priority};
use crate::generate::{self, Doctype, FAT_PAGE, NOSCRIPT_GALLERY, START_PAGE, TemplateError, Templates};
use crate::imaging::{
    Quality, Storage, closest_area, derive_file_name, dimensions, format_for_path, resize_series,
    supported_input_extensions,
};
use crate::item::{ImageItem, Residency};
use crate::manifest::{self, AlbumInfo, Manifests};
use crate::scan;
use crate::types::{ImageClass, Size};
use chrono::NaiveDateTime;
use image::DynamicImage;
use std::fs::File;
use std::io::BufWriter;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// No-script image pages show the output size closest in area to this.
const NOSCRIPT_REFERENCE: Size = Size::new(1024, 768);

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start image dispatcher: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("could not deploy runtime files: {0}")]
    Bundle(#[from] BundleError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("invalid sizes: {0}")]
    InvalidSizes(String),
    #[error("empty directory name!")]
    EmptyDestination,
    #[error("directory: {0} already exists!")]
    DestinationExists(String),
    #[error("parent directory does not exist: {0}")]
    MissingParent(String),
    #[error("directory {0} was not created")]
    DestinationMissing(String),
    #[error("could not create directory: {path}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("could not write file {path}: {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },
    #[error("could not write image {0}")]
    WriteImage(String),
    #[error("start page is not valid UTF-8: {0}")]
    StartPage(String),
    #[error("rollback incomplete: {0}")]
    Rollback(String),
}

/// Progress reported while an album is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Image `current` of `total` was dispatched for resizing.
    Progress {
        current: usize,
        total: usize,
        name: String,
    },
    /// A photo was skipped.
    Warning(String),
    /// The build ended. `message` joins all warnings and errors, one per line.
    Finished { completed: bool, message: String },
}

/// Result of [`Album::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// All steps ran to the end.
    pub completed: bool,
    /// Photos written to the album.
    pub deployed: usize,
    /// Warnings and errors, one per line; empty after a clean build or a stop.
    pub message: String,
}

/// Cloneable handle for stopping a build from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    running: Arc<Mutex<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the running flag for the duration of one build.
struct RunningGuard(Arc<Mutex<bool>>);

impl RunningGuard {
    fn enter(flag: &Arc<Mutex<bool>>) -> Self {
        let mut running = flag.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(!*running, "Album::build called while a build is already running");
        *running = true;
        Self(Arc::clone(flag))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

struct Events(Option<Sender<BuildEvent>>);

impl Events {
    fn send(&self, event: BuildEvent) {
        if let Some(tx) = &self.0 {
            // A vanished listener does not stop the build.
            let _ = tx.send(event);
        }
    }
}

enum Finish {
    Completed(usize),
    Stopped,
}

/// Sizes every image is resized to, and where the archive rendition sits.
struct RenderPlan {
    sizes: Vec<Size>,
    quality: Quality,
    chain_factor: u32,
}

/// Encoded outputs of one image, parallel to [`RenderPlan::sizes`].
struct Rendered {
    original: Size,
    outputs: Vec<Vec<u8>>,
}

/// Resize-task body. Runs on the pool.
fn render(core: &IoCore, path: &Path, dest_name: &str, plan: &RenderPlan) -> Result<Rendered, String> {
    let original = core
        .load_immediately(path, Size::ORIGINAL)
        .map_err(|e| e.to_string())?;
    let format = format_for_path(Path::new(dest_name)).map_err(|e| e.to_string())?;
    let series = resize_series(&original, &plan.sizes, plan.chain_factor);
    let mut outputs = Vec::with_capacity(series.len());
    for (size, image) in plan.sizes.iter().zip(&series) {
        let bytes = if size.is_original() {
            core.storage().read(path).map_err(|e| e.to_string())?
        } else {
            core.codec()
                .encode(image, format, plan.quality)
                .map_err(|e| e.to_string())?
        };
        outputs.push(bytes);
    }
    Ok(Rendered {
        original: dimensions(&original),
        outputs,
    })
}

/// The output sizes with the archive size merged in. Returns the list and
/// the archive size's index in it.
fn resize_plan(sizes: &[Size], archive: Option<Size>) -> (Vec<Size>, Option<usize>) {
    let Some(extra) = archive else {
        return (sizes.to_vec(), None);
    };
    if let Some(at) = sizes.iter().position(|s| *s == extra) {
        return (sizes.to_vec(), Some(at));
    }
    let mut list: Vec<Size> = sizes.iter().copied().filter(|s| !s.is_original()).collect();
    if !extra.is_original() {
        let at = list
            .iter()
            .position(|s| extra.fits_within(*s))
            .unwrap_or(list.len());
        list.insert(at, extra);
    }
    if extra.is_original() || sizes.last().is_some_and(|s| s.is_original()) {
        list.push(Size::ORIGINAL);
    }
    let at = list.iter().position(|s| *s == extra);
    (list, at)
}

/// `<name>.zip`, reduced to file-system-safe characters.
pub fn archive_file_name(name: &str) -> String {
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    format!("{}.zip", derive_file_name(stem))
}

fn make_dir(storage: &dyn Storage, path: &Path, created: &mut Vec<PathBuf>) -> Result<(), BuildError> {
    storage.create_dir(path).map_err(|source| BuildError::CreateDir {
        path: path.display().to_string(),
        source,
    })?;
    created.push(path.to_path_buf());
    Ok(())
}

fn write_text(storage: &dyn Storage, path: &Path, text: &str, created: &mut Vec<PathBuf>) -> Result<(), BuildError> {
    storage
        .write(path, text.as_bytes())
        .map_err(|source| BuildError::WriteFile {
            path: path.display().to_string(),
            source,
        })?;
    created.push(path.to_path_buf());
    Ok(())
}

/// A photo album under construction.
pub struct Album {
    config: AlbumConfig,
    io: Dispatcher,
    templates: Templates,
    items: Vec<ImageItem>,
    residency: Residency,
    stop: Arc<AtomicBool>,
    running: Arc<Mutex<bool>>,
    /// Everything the last build created, for [`Album::rollback`].
    created: Vec<PathBuf>,
}

impl Album {
    /// Album over the local filesystem with a dispatcher sized from `config`.
    pub fn new(config: AlbumConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let io = Dispatcher::with_settings(config.dispatcher_settings())?;
        Self::with_dispatcher(config, io)
    }

    /// Album using an existing dispatcher and its collaborators.
    pub fn with_dispatcher(config: AlbumConfig, io: Dispatcher) -> Result<Self, BuildError> {
        config.validate()?;
        let residency = Residency::new(
            config.cache.max_resident_images,
            config.cache.max_resident_previews,
        );
        Ok(Self {
            config,
            io,
            templates: Templates::builtin()?,
            items: Vec::new(),
            residency,
            stop: Arc::default(),
            running: Arc::default(),
            created: Vec::new(),
        })
    }

    pub fn config(&self) -> &AlbumConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.io
    }

    pub fn set_doctype(&mut self, doctype: Doctype) {
        self.templates.set_doctype(doctype);
    }

    // ---- collection ----

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn item_mut(&mut self, index: usize) -> Option<&mut ImageItem> {
        self.items.get_mut(index)
    }

    /// Index of the photo deployed as `dest_name`.
    pub fn find(&self, dest_name: &str) -> Option<usize> {
        self.items.iter().position(|it| it.dest_name() == dest_name)
    }

    /// `name`, or `stem_2.ext`, `stem_3.ext`, … if it is taken.
    fn unique_dest_name(&self, name: &str) -> String {
        if self.find(name).is_none() {
            return name.to_string();
        }
        let (stem, ext) = match name.rfind('.') {
            Some(dot) if dot > 0 => name.split_at(dot),
            _ => (name, ""),
        };
        (2..)
            .map(|n| format!("{stem}_{n}{ext}"))
            .find(|candidate| self.find(candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    /// Append a photo. Returns its index.
    pub fn add_image(&mut self, path: impl Into<PathBuf>) -> usize {
        let mut item = ImageItem::new(&self.io, path, self.config.class_sizes());
        let name = self.unique_dest_name(item.dest_name());
        item.set_dest_name(name);
        self.items.push(item);
        self.items.len() - 1
    }

    /// Append photos in order. Returns how many were added.
    pub fn add_images<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = 0;
        for path in paths {
            self.add_image(path);
            added += 1;
        }
        added
    }

    /// Append scanned photos, taking over their sidecar captions.
    pub fn add_sources(&mut self, sources: impl IntoIterator<Item = scan::SourceImage>) -> usize {
        let mut added = 0;
        for source in sources {
            let index = self.add_image(source.path);
            if let Some(caption) = source.caption {
                self.items[index].set_caption(caption);
            }
            added += 1;
        }
        added
    }

    /// Append the photos named in a list file (see [`scan::parse_image_list`]).
    /// Entries that are missing or not a supported image are skipped.
    pub fn add_image_list(&mut self, list: &Path) -> Result<usize, BuildError> {
        let text = std::fs::read_to_string(list)?;
        let base = list.parent().unwrap_or_else(|| Path::new(""));
        let core = self.io.core();
        let paths: Vec<PathBuf> = scan::parse_image_list(&text, base)
            .into_iter()
            .filter(|p| scan::has_extension(p, supported_input_extensions()))
            .filter(|p| core.storage().exists(p))
            .collect();
        Ok(self.add_images(paths))
    }

    /// Remove the photo at `index`, cancelling its pending loads.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        let mut item = self.items.remove(index);
        item.release(&self.io);
        self.residency.forget(item.callback());
        true
    }

    /// Feed newly decoded bitmaps of item `index` to the resident lists,
    /// evicting the oldest holders beyond the caps.
    fn settle(&mut self, index: usize) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        let id = item.callback();
        for class in item.take_newly_resident() {
            for evicted in self.residency.admit(id, class) {
                if let Some(other) = self.items.iter_mut().find(|it| it.callback() == evicted) {
                    debug!(path = %other.path().display(), ?class, "bitmap evicted");
                    other.evict(class);
                }
            }
        }
    }

    /// Start loading `class` of photo `index` in the background.
    pub fn prefetch(&mut self, index: usize, class: ImageClass) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        item.sync(&self.io);
        item.prefetch(class, &self.io, Priority::Normal);
        self.settle(index);
    }

    /// `class` of photo `index`, waiting for it if necessary.
    pub fn image(&mut self, index: usize, class: ImageClass) -> Option<Arc<DynamicImage>> {
        let image = self.items.get_mut(index)?.image(class, &self.io);
        self.settle(index);
        image
    }

    /// Photo `index` scaled to each of `sizes` (ascending), chained the
    /// same way a build does. Empty if the photo cannot be read.
    pub fn resized(&mut self, index: usize, sizes: &[Size]) -> Vec<Arc<DynamicImage>> {
        let chain_factor = self.config.processing.chain_factor;
        let images = match self.items.get_mut(index) {
            Some(item) => item.resized(sizes, chain_factor, &self.io),
            None => Vec::new(),
        };
        self.settle(index);
        images
    }

    /// True if photo `index` can be read.
    pub fn is_valid(&mut self, index: usize) -> bool {
        let valid = match self.items.get_mut(index) {
            Some(item) => item.is_valid(&self.io),
            None => false,
        };
        self.settle(index);
        valid
    }

    // ---- build ----

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
            running: Arc::clone(&self.running),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.stop_handle().is_running()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Check the output sizes: non-empty, strictly increasing in both
    /// dimensions, at most one original marker and only at the end, and the
    /// thumbnail size present when the viewer shows thumbnails.
    pub fn validate_sizes(&self) -> Result<(), BuildError> {
        let sizes = &self.config.images.sizes;
        let invalid = |reason: &str| Err(BuildError::InvalidSizes(reason.to_string()));
        if sizes.is_empty() {
            return invalid("no output sizes");
        }
        let mut last: Option<Size> = None;
        for (i, size) in sizes.iter().enumerate() {
            if size.is_original() {
                if i + 1 != sizes.len() {
                    return invalid("the original size may only appear once, at the end");
                }
                continue;
            }
            if let Some(prev) = last {
                if size.width <= prev.width || size.height <= prev.height {
                    return invalid(&format!("{size} does not follow {prev} in increasing order"));
                }
            }
            last = Some(*size);
        }
        let thumbnail = self.config.images.thumbnail;
        if self.config.presentation.needs_thumbnails() && !sizes.contains(&thumbnail) {
            return invalid(&format!("thumbnail size {thumbnail} is missing"));
        }
        Ok(())
    }

    /// Build the album into the new directory `destination`.
    ///
    /// Events go to `events` if given; the last one is always
    /// [`BuildEvent::Finished`]. A fatal error rolls the build back.
    ///
    /// # Panics
    ///
    /// If another build of this album is running.
    pub fn build(&mut self, destination: &Path, events: Option<Sender<BuildEvent>>) -> BuildReport {
        let _running = RunningGuard::enter(&self.running);
        self.stop.store(false, Ordering::SeqCst);
        self.created.clear();
        let events = Events(events);
        let mut warnings = Vec::new();
        let mut created = Vec::new();

        let result = self.run_build(destination, &events, &mut warnings, &mut created);
        self.created = created;

        let (completed, deployed, message) = match result {
            Ok(Finish::Completed(deployed)) => {
                info!(dest = %destination.display(), images = deployed, "album built");
                (true, deployed, warnings.join("\n"))
            }
            Ok(Finish::Stopped) => {
                info!(dest = %destination.display(), "album build stopped");
                (false, 0, String::new())
            }
            Err(e) => {
                warn!(dest = %destination.display(), error = %e, "album build failed");
                warnings.push(e.to_string());
                if let Err(rollback) = self.rollback() {
                    warnings.push(rollback.to_string());
                }
                (false, 0, warnings.join("\n"))
            }
        };
        events.send(BuildEvent::Finished {
            completed,
            message: message.clone(),
        });
        BuildReport {
            completed,
            deployed,
            message,
        }
    }

    fn run_build(
        &mut self,
        destination: &Path,
        events: &Events,
        warnings: &mut Vec<String>,
        created: &mut Vec<PathBuf>,
    ) -> Result<Finish, BuildError> {
        self.validate_sizes()?;
        let core = self.io.core();
        let storage = core.storage();
        let sizes = self.config.images.sizes.clone();

        let dest = self.create_destination(destination, storage, created)?;
        bundle::deploy(bundle::RUNTIME, &dest, storage, created)?;

        let slides = dest.join("slides");
        make_dir(storage, &slides, created)?;
        for size in &sizes {
            make_dir(storage, &slides.join(size.label()), created)?;
        }

        let deployed = match self.deploy_images(&dest, &core, events, warnings, created)? {
            Some(deployed) => deployed,
            None => return Ok(Finish::Stopped),
        };
        if self.stopped() {
            return Ok(Finish::Stopped);
        }

        let images: Vec<&ImageItem> = deployed.iter().map(|&i| &self.items[i]).collect();
        let manifests = Manifests {
            info: AlbumInfo::from_config(&self.config).to_json(),
            directories: manifest::directories_json(&sizes),
            filenames: manifest::filenames_json(images.iter().map(|it| it.dest_name())),
            captions: manifest::captions_json(images.iter().map(|it| (it.dest_name(), it.caption()))),
            resolutions: manifest::resolutions_json(
                &sizes,
                images
                    .iter()
                    .filter_map(|it| Some((it.dest_name(), it.original_size()?))),
            ),
        };
        for (name, content) in manifests.entries() {
            write_text(storage, &slides.join(name), content, created)?;
        }

        let start_page = storage.read(&dest.join(START_PAGE))?;
        let start_page = String::from_utf8(start_page).map_err(|_| BuildError::StartPage(START_PAGE.to_string()))?;
        write_text(
            storage,
            &dest.join(FAT_PAGE),
            &generate::fat_page(&start_page, &manifests),
            created,
        )?;

        let pages = &self.config.pages;
        let album = &self.config.album;
        let thumbnail = self.config.images.thumbnail;
        let has_gallery = pages.noscript && sizes.contains(&thumbnail);
        let gallery_entry = has_gallery && self.config.presentation.presentation == "gallery";
        let templates = &self.templates;

        write_text(
            storage,
            &dest.join("index.html"),
            &templates.index_page(pages.noscript, gallery_entry),
            created,
        )?;
        if pages.offline {
            write_text(
                storage,
                &dest.join("index_offline.html"),
                &templates.offline_index(pages.noscript, gallery_entry),
                created,
            )?;
        }
        if pages.noscript {
            let names: Vec<&str> = images.iter().map(|it| it.dest_name()).collect();
            if has_gallery {
                let page = templates.gallery_page(
                    &album.title,
                    &album.subtitle,
                    &album.bottom_line,
                    &thumbnail.label(),
                    &names,
                );
                write_text(storage, &dest.join(NOSCRIPT_GALLERY), &page, created)?;
            }
            let size_dir = closest_area(&sizes, NOSCRIPT_REFERENCE)
                .unwrap_or(sizes[0])
                .label();
            for (i, item) in images.iter().enumerate() {
                let number = i + 1;
                let page = templates.image_page(
                    number,
                    &size_dir,
                    item.dest_name(),
                    item.caption(),
                    number == images.len(),
                    has_gallery,
                );
                write_text(storage, &dest.join(generate::image_page_name(number)), &page, created)?;
            }
        }
        Ok(Finish::Completed(images.len()))
    }

    fn create_destination(
        &self,
        destination: &Path,
        storage: &dyn Storage,
        created: &mut Vec<PathBuf>,
    ) -> Result<PathBuf, BuildError> {
        if destination.as_os_str().is_empty() {
            return Err(BuildError::EmptyDestination);
        }
        let dest: PathBuf = destination.components().collect();
        if storage.exists(&dest) {
            return Err(BuildError::DestinationExists(dest.display().to_string()));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !storage.exists(parent) {
                return Err(BuildError::MissingParent(parent.display().to_string()));
            }
        }
        make_dir(storage, &dest, created)?;
        if !storage.is_dir(&dest) {
            // Nothing of ours to roll back at that path.
            created.pop();
            return Err(BuildError::DestinationMissing(dest.display().to_string()));
        }
        Ok(dest)
    }

    /// Resize and write every photo. Returns the indices of the deployed
    /// photos, or `None` if the build was stopped.
    fn deploy_images(
        &mut self,
        dest: &Path,
        core: &Arc<IoCore>,
        events: &Events,
        warnings: &mut Vec<String>,
        created: &mut Vec<PathBuf>,
    ) -> Result<Option<Vec<usize>>, BuildError> {
        let storage = core.storage();
        let slides = dest.join("slides");
        let config = &self.config;
        let archive_size = config.archive.enabled().then_some(config.archive.size);
        let (plan_sizes, archive_at) = resize_plan(&config.images.sizes, archive_size);
        let written: Vec<Option<PathBuf>> = plan_sizes
            .iter()
            .map(|s| {
                config
                    .images
                    .sizes
                    .contains(s)
                    .then(|| slides.join(s.label()))
            })
            .collect();
        let plan = Arc::new(RenderPlan {
            sizes: plan_sizes,
            quality: Quality::new(config.images.quality),
            chain_factor: config.processing.chain_factor,
        });

        let mut archive: Option<ArchiveWriter<BufWriter<File>>> = None;
        if archive_at.is_some() {
            let path = dest.join(archive_file_name(&config.archive.name));
            archive = Some(ArchiveWriter::open(&path)?);
            created.push(path);
        }
        let timestamp: NaiveDateTime = chrono::Local::now().naive_local();

        let total = self.items.len();
        let batch_size = config.processing.batch_size.max(1);
        let (tx, rx) = mpsc::channel::<(usize, Result<Rendered, String>)>();
        let mut deployed = Vec::with_capacity(total);
        let mut start = 0;

        while start < total {
            if self.stopped() {
                if let Some(archive) = archive.take() {
                    archive.close()?;
                }
                return Ok(None);
            }
            let end = (start + batch_size).min(total);
            for index in start..end {
                let item = &self.items[index];
                let task_core = Arc::clone(core);
                let task_plan = Arc::clone(&plan);
                let task_tx = tx.clone();
                let path = item.path().to_path_buf();
                let name = item.dest_name().to_string();
                core.spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| render(&task_core, &path, &name, &task_plan)))
                        .unwrap_or_else(|_| Err("resize task panicked".to_string()));
                    // The build only stops listening after collecting every result.
                    let _ = task_tx.send((index, result));
                });
                events.send(BuildEvent::Progress {
                    current: index + 1,
                    total,
                    name: item.dest_name().to_string(),
                });
            }

            let mut results: Vec<Option<Result<Rendered, String>>> = (start..end).map(|_| None).collect();
            for _ in start..end {
                let Ok((index, result)) = rx.recv() else {
                    break;
                };
                results[index - start] = Some(result);
            }

            for (offset, result) in results.into_iter().enumerate() {
                let index = start + offset;
                let item = &mut self.items[index];
                let rendered = match result {
                    Some(Ok(rendered)) => rendered,
                    Some(Err(reason)) => {
                        let warning = format!("could not resize image {}: {reason}", item.dest_name());
                        warn!("{warning}");
                        item.note_error(&reason);
                        events.send(BuildEvent::Warning(warning.clone()));
                        warnings.push(warning);
                        continue;
                    }
                    None => continue,
                };
                item.note_original(rendered.original);
                for (k, bytes) in rendered.outputs.iter().enumerate() {
                    if let Some(dir) = &written[k] {
                        let path = dir.join(item.dest_name());
                        storage
                            .write(&path, bytes)
                            .map_err(|_| BuildError::WriteImage(path.display().to_string()))?;
                        created.push(path);
                    }
                    if Some(k) == archive_at {
                        if let Some(archive) = archive.as_mut() {
                            archive.add_entry(item.dest_name(), bytes, timestamp)?;
                        }
                    }
                }
                debug!(name = item.dest_name(), "image deployed");
                deployed.push(index);
            }
            start = end;
        }

        if let Some(archive) = archive.take() {
            archive.close()?;
        }
        Ok(Some(deployed))
    }

    /// Delete everything the last build created. Paths are removed longest
    /// first, so files go before their directories and the destination goes
    /// last. Anything else in those directories is left alone, which makes
    /// the removal of its directory fail.
    pub fn rollback(&mut self) -> Result<(), BuildError> {
        let mut created = std::mem::take(&mut self.created);
        created.sort_by_key(|p| std::cmp::Reverse(p.as_os_str().len()));
        let storage = self.io.core();
        let failures: Vec<String> = created
            .iter()
            .filter_map(|path| {
                storage
                    .storage()
                    .remove(path)
                    .err()
                    .map(|e| format!("could not remove {}: {e}", path.display()))
            })
            .collect();
        if failures.is_empty() {
            debug!(paths = created.len(), "rollback complete");
            Ok(())
        } else {
            Err(BuildError::Rollback(failures.join("; ")))
        }
    }
}
