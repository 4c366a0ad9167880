//! One photo of an album and its three renditions.
//!
//! Each [`ImageClass`] of an item moves through
//!
//! ```text
//! Unrequested ──prefetch──▶ Pending ──reply──▶ Loaded | Errored
//! ```
//!
//! Requests go through the [`Dispatcher`]; replies arrive in the item's
//! mailbox and are applied by [`ImageItem::sync`]. A reply only resolves the
//! classes that are still requested at the reply's size, so replies made
//! stale by a size change are dropped.
//!
//! Decoded originals and previews are large. The album keeps two bounded
//! [`Residency`] lists and evicts the oldest item's bitmap when a list
//! overflows. Thumbnails are small and never evicted.

use crate::dispatcher::{CachePolicy, CallbackId, Dispatcher, Outcome, Priority, QuickResult, Reply, RequestHandle};
use crate::imaging::{dimensions, resize_series};
use crate::types::{ClassSet, ImageClass, Size};
use image::DynamicImage;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Target sizes of the scaled classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassSizes {
    pub thumbnail: Size,
    pub preview: Size,
}

impl Default for ClassSizes {
    fn default() -> Self {
        Self {
            thumbnail: Size::new(160, 160),
            preview: Size::new(1280, 960),
        }
    }
}

impl ClassSizes {
    pub fn size_of(&self, class: ImageClass) -> Size {
        match class {
            ImageClass::Original => Size::ORIGINAL,
            ImageClass::Preview => self.preview,
            ImageClass::Thumbnail => self.thumbnail,
        }
    }
}

#[derive(Debug, Default)]
struct Bitmaps {
    original: Option<Arc<DynamicImage>>,
    preview: Option<Arc<DynamicImage>>,
    thumbnail: Option<Arc<DynamicImage>>,
}

impl Bitmaps {
    fn slot(&mut self, class: ImageClass) -> &mut Option<Arc<DynamicImage>> {
        match class {
            ImageClass::Original => &mut self.original,
            ImageClass::Preview => &mut self.preview,
            ImageClass::Thumbnail => &mut self.thumbnail,
        }
    }

    fn get(&self, class: ImageClass) -> Option<&Arc<DynamicImage>> {
        match class {
            ImageClass::Original => self.original.as_ref(),
            ImageClass::Preview => self.preview.as_ref(),
            ImageClass::Thumbnail => self.thumbnail.as_ref(),
        }
    }
}

#[derive(Debug)]
pub struct ImageItem {
    callback: CallbackId,
    path: PathBuf,
    dest_name: String,
    caption: String,
    sizes: ClassSizes,
    bitmaps: Bitmaps,
    original_size: Option<Size>,
    error: Option<String>,
    requested: ClassSet,
    outstanding: HashMap<RequestHandle, ImageClass>,
    newly_resident: Vec<ImageClass>,
}

impl ImageItem {
    /// New item for `path`; its destination name defaults to the file name.
    pub fn new(io: &Dispatcher, path: impl Into<PathBuf>, sizes: ClassSizes) -> Self {
        let path = path.into();
        let dest_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            callback: io.register(),
            path,
            dest_name,
            caption: String::new(),
            sizes,
            bitmaps: Bitmaps::default(),
            original_size: None,
            error: None,
            requested: ClassSet::default(),
            outstanding: HashMap::new(),
            newly_resident: Vec::new(),
        }
    }

    pub fn callback(&self) -> CallbackId {
        self.callback
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dest_name(&self) -> &str {
        &self.dest_name
    }

    pub fn set_dest_name(&mut self, name: impl Into<String>) {
        self.dest_name = name.into();
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn original_size(&self) -> Option<Size> {
        self.original_size
    }

    pub fn class_sizes(&self) -> ClassSizes {
        self.sizes
    }

    /// True while any class has a request in flight.
    pub fn is_pending(&self) -> bool {
        !self.requested.is_empty()
    }

    /// Change the scaled class sizes. Bitmaps of a changed class are dropped
    /// and any reply still on its way for the old size is ignored.
    pub fn set_class_sizes(&mut self, sizes: ClassSizes) {
        for class in [ImageClass::Preview, ImageClass::Thumbnail] {
            if self.sizes.size_of(class) != sizes.size_of(class) {
                *self.bitmaps.slot(class) = None;
                self.requested.remove(class);
            }
        }
        self.sizes = sizes;
    }

    /// The bitmap of `class` if it is loaded, without waiting.
    pub fn bitmap(&self, class: ImageClass) -> Option<Arc<DynamicImage>> {
        self.bitmaps.get(class).cloned()
    }

    /// Drop the bitmap of `class`; it is reloaded on next use.
    pub fn evict(&mut self, class: ImageClass) {
        *self.bitmaps.slot(class) = None;
    }

    /// Classes that became resident since the last call. The album feeds
    /// them to its [`Residency`] lists.
    pub fn take_newly_resident(&mut self) -> Vec<ImageClass> {
        std::mem::take(&mut self.newly_resident)
    }

    /// Record the outcome of a load made outside the item.
    pub fn note_original(&mut self, size: Size) {
        self.original_size = Some(size);
    }

    pub fn note_error(&mut self, message: &str) {
        self.error = Some(format!("{message} {}", self.path.display()));
    }

    fn accept(&mut self, class: ImageClass, image: Arc<DynamicImage>) {
        if class == ImageClass::Original {
            self.original_size = Some(dimensions(&image));
        }
        if class != ImageClass::Thumbnail {
            self.newly_resident.push(class);
        }
        *self.bitmaps.slot(class) = Some(image);
    }

    /// Request `class` unless it is loaded, already requested, or the item
    /// is in error. A cache hit resolves the class before this returns.
    pub fn prefetch(&mut self, class: ImageClass, io: &Dispatcher, priority: Priority) {
        if self.error.is_some() || self.bitmaps.get(class).is_some() || self.requested.contains(class) {
            return;
        }
        let size = self.sizes.size_of(class);
        match io.quick_request(self.callback, &self.path, size, CachePolicy::UseCache, priority) {
            QuickResult::Ready(image) => self.accept(class, image),
            QuickResult::Pending(handle) => {
                // A duplicate means an identical request is already on its
                // way; its reply resolves this class too.
                self.requested.insert(class);
                if let Some(handle) = handle {
                    self.outstanding.insert(handle, class);
                }
            }
        }
    }

    /// Apply every reply waiting in this item's mailbox.
    pub fn sync(&mut self, io: &Dispatcher) {
        for reply in io.take_replies(self.callback) {
            self.apply(reply);
        }
    }

    fn apply(&mut self, reply: Reply) {
        self.outstanding.remove(&reply.handle);
        let classes: Vec<ImageClass> = ImageClass::ALL
            .into_iter()
            .filter(|&c| self.requested.contains(c) && self.sizes.size_of(c) == reply.size)
            .collect();
        if classes.is_empty() {
            debug!(path = %self.path.display(), size = %reply.size, "stale reply ignored");
            return;
        }
        for &class in &classes {
            self.requested.remove(class);
        }
        match reply.outcome {
            Outcome::Loaded(image) => {
                for class in classes {
                    self.accept(class, Arc::clone(&image));
                }
            }
            Outcome::Failed(message) => self.note_error(&message),
            Outcome::Saved => {}
        }
    }

    /// The bitmap of `class`, loading it if needed.
    ///
    /// Blocks by pumping the dispatcher, so replies for other items keep
    /// flowing into their mailboxes meanwhile. `None` if the item is or
    /// becomes erroneous.
    pub fn image(&mut self, class: ImageClass, io: &Dispatcher) -> Option<Arc<DynamicImage>> {
        self.sync(io);
        self.prefetch(class, io, Priority::Top);
        loop {
            if let Some(image) = self.bitmaps.get(class) {
                return Some(Arc::clone(image));
            }
            if self.error.is_some() {
                return None;
            }
            if !self.requested.contains(class) {
                self.prefetch(class, io, Priority::Top);
                continue;
            }
            let delivered = io.pump(true);
            self.sync(io);
            if delivered == 0 && io.outstanding() == 0 && self.bitmaps.get(class).is_none() {
                self.requested.remove(class);
                self.note_error("could not load image");
                return None;
            }
        }
    }

    /// The original scaled to every entry of `sizes`, smallest first.
    /// Empty if the original cannot be loaded.
    pub fn resized(&mut self, sizes: &[Size], chain_factor: u32, io: &Dispatcher) -> Vec<Arc<DynamicImage>> {
        match self.image(ImageClass::Original, io) {
            Some(original) => resize_series(&original, sizes, chain_factor),
            None => Vec::new(),
        }
    }

    /// True once the original has been read successfully. Loads it if
    /// nothing is known yet.
    pub fn is_valid(&mut self, io: &Dispatcher) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.original_size.is_some() || self.image(ImageClass::Original, io).is_some()
    }

    /// Stop all traffic for this item.
    pub fn release(&mut self, io: &Dispatcher) {
        io.unregister(self.callback);
        self.requested.clear();
        self.outstanding.clear();
    }
}

/// Bounded lists of items holding a decoded original or preview.
#[derive(Debug)]
pub struct Residency {
    originals: VecDeque<CallbackId>,
    previews: VecDeque<CallbackId>,
    max_originals: usize,
    max_previews: usize,
}

impl Residency {
    pub fn new(max_originals: usize, max_previews: usize) -> Self {
        Self {
            originals: VecDeque::new(),
            previews: VecDeque::new(),
            max_originals: max_originals.max(1),
            max_previews: max_previews.max(1),
        }
    }

    fn list(&mut self, class: ImageClass) -> Option<(&mut VecDeque<CallbackId>, usize)> {
        match class {
            ImageClass::Original => Some((&mut self.originals, self.max_originals)),
            ImageClass::Preview => Some((&mut self.previews, self.max_previews)),
            ImageClass::Thumbnail => None,
        }
    }

    /// Record that `item` now holds a bitmap of `class`. Returns the items
    /// that must drop theirs, oldest first.
    pub fn admit(&mut self, item: CallbackId, class: ImageClass) -> Vec<CallbackId> {
        let Some((list, cap)) = self.list(class) else {
            return Vec::new();
        };
        list.retain(|id| *id != item);
        list.push_back(item);
        let overflow = list.len().saturating_sub(cap);
        list.drain(..overflow).collect()
    }

    pub fn forget(&mut self, item: CallbackId) {
        self.originals.retain(|id| *id != item);
        self.previews.retain(|id| *id != item);
    }

    pub fn resident(&self, class: ImageClass) -> usize {
        match class {
            ImageClass::Original => self.originals.len(),
            ImageClass::Preview => self.previews.len(),
            ImageClass::Thumbnail => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherSettings;
    use crate::imaging::RustCodec;
    use crate::imaging::backend::tests::MockStorage;
    use crate::test_helpers::jpeg_bytes;

    fn setup(files: &[(&str, u32, u32)]) -> (Dispatcher, Arc<MockStorage>) {
        let mut storage = MockStorage::new();
        for (name, w, h) in files {
            storage = storage.with_file(*name, jpeg_bytes(*w, *h));
        }
        let storage = Arc::new(storage);
        let io = Dispatcher::new(Arc::new(RustCodec), storage.clone(), DispatcherSettings::default()).unwrap();
        (io, storage)
    }

    fn sizes(thumb: u32, preview: u32) -> ClassSizes {
        ClassSizes {
            thumbnail: Size::new(thumb, thumb),
            preview: Size::new(preview, preview),
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn dest_name_defaults_to_file_name() {
        let (io, _) = setup(&[]);
        let mut item = ImageItem::new(&io, "/photos/beach.jpg", ClassSizes::default());
        assert_eq!(item.dest_name(), "beach.jpg");
        item.set_dest_name("b.jpg");
        item.set_caption("Sunset");
        assert_eq!(item.dest_name(), "b.jpg");
        assert_eq!(item.caption(), "Sunset");
        assert_eq!(item.class_sizes().thumbnail, Size::new(160, 160));
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn image_blocks_until_loaded() {
        let (io, _) = setup(&[("/a.jpg", 400, 300)]);
        let mut item = ImageItem::new(&io, "/a.jpg", sizes(40, 200));

        let thumb = item.image(ImageClass::Thumbnail, &io).unwrap();
        assert_eq!(dimensions(&thumb), Size::new(40, 30));
        let original = item.image(ImageClass::Original, &io).unwrap();
        assert_eq!(dimensions(&original), Size::new(400, 300));
        assert_eq!(item.original_size(), Some(Size::new(400, 300)));
        assert!(!item.is_pending());
    }

    #[test]
    fn prefetch_then_sync_resolves_class() {
        let (io, storage) = setup(&[("/a.jpg", 100, 100)]);
        let mut item = ImageItem::new(&io, "/a.jpg", sizes(50, 80));
        item.prefetch(ImageClass::Preview, &io, Priority::Normal);
        item.prefetch(ImageClass::Preview, &io, Priority::Normal);
        while item.is_pending() {
            io.pump(true);
            item.sync(&io);
        }
        assert_eq!(dimensions(&item.bitmap(ImageClass::Preview).unwrap()), Size::new(80, 80));
        assert_eq!(storage.reads_of("/a.jpg"), 1);
        assert_eq!(item.take_newly_resident(), vec![ImageClass::Preview]);
        assert!(item.take_newly_resident().is_empty());
    }

    #[test]
    fn cached_class_resolves_inside_prefetch() {
        let (io, _) = setup(&[("/a.jpg", 100, 100)]);
        let mut first = ImageItem::new(&io, "/a.jpg", sizes(50, 80));
        first.image(ImageClass::Original, &io).unwrap();

        let mut second = ImageItem::new(&io, "/a.jpg", sizes(50, 80));
        second.prefetch(ImageClass::Thumbnail, &io, Priority::Top);
        assert!(second.bitmap(ImageClass::Thumbnail).is_some());
        assert!(!second.is_pending());
    }

    #[test]
    fn missing_file_records_error_with_path() {
        let (io, _) = setup(&[]);
        let mut item = ImageItem::new(&io, "/gone.jpg", ClassSizes::default());
        assert!(item.image(ImageClass::Thumbnail, &io).is_none());
        let error = item.error().unwrap();
        assert!(error.starts_with("could not load image"), "{error}");
        assert!(error.ends_with("/gone.jpg"), "{error}");
        assert!(!item.is_valid(&io));

        // Errored items issue no further requests.
        item.prefetch(ImageClass::Preview, &io, Priority::Normal);
        assert!(!item.is_pending());
    }

    #[test]
    fn reply_for_old_size_is_ignored() {
        let (io, _) = setup(&[("/a.jpg", 300, 300)]);
        let mut item = ImageItem::new(&io, "/a.jpg", sizes(100, 200));
        item.prefetch(ImageClass::Thumbnail, &io, Priority::Normal);
        item.set_class_sizes(sizes(50, 200));
        while io.outstanding() > 0 {
            io.pump(true);
        }
        item.sync(&io);
        assert!(item.bitmap(ImageClass::Thumbnail).is_none());

        let thumb = item.image(ImageClass::Thumbnail, &io).unwrap();
        assert_eq!(dimensions(&thumb), Size::new(50, 50));
    }

    #[test]
    fn validity_and_builder_notes() {
        let (io, storage) = setup(&[("/a.jpg", 64, 48)]);
        let mut item = ImageItem::new(&io, "/a.jpg", ClassSizes::default());
        item.note_original(Size::new(64, 48));
        assert!(item.is_valid(&io));
        assert_eq!(storage.reads_of("/a.jpg"), 0);

        let mut fresh = ImageItem::new(&io, "/a.jpg", ClassSizes::default());
        assert!(fresh.is_valid(&io));

        fresh.note_error("could not resize image");
        assert!(!fresh.is_valid(&io));
    }

    #[test]
    fn resized_chains_from_original() {
        let (io, _) = setup(&[("/a.jpg", 800, 600)]);
        let mut item = ImageItem::new(&io, "/a.jpg", ClassSizes::default());
        let out = item.resized(&[Size::new(100, 100), Size::new(400, 400), Size::ORIGINAL], 2, &io);
        let dims: Vec<Size> = out.iter().map(|i| dimensions(i)).collect();
        assert_eq!(dims, vec![Size::new(100, 75), Size::new(400, 300), Size::new(800, 600)]);

        let mut broken = ImageItem::new(&io, "/nope.jpg", ClassSizes::default());
        assert!(broken.resized(&[Size::new(10, 10)], 2, &io).is_empty());
    }

    // =========================================================================
    // Residency
    // =========================================================================

    #[test]
    fn residency_evicts_oldest_beyond_cap() {
        let (io, _) = setup(&[]);
        let ids: Vec<CallbackId> = (0..4).map(|_| io.register()).collect();
        let mut residency = Residency::new(2, 3);

        assert!(residency.admit(ids[0], ImageClass::Original).is_empty());
        assert!(residency.admit(ids[1], ImageClass::Original).is_empty());
        // Re-admitting refreshes instead of duplicating.
        assert!(residency.admit(ids[0], ImageClass::Original).is_empty());
        assert_eq!(residency.admit(ids[2], ImageClass::Original), vec![ids[1]]);
        assert_eq!(residency.resident(ImageClass::Original), 2);

        assert!(residency.admit(ids[3], ImageClass::Thumbnail).is_empty());
        assert_eq!(residency.resident(ImageClass::Thumbnail), 0);

        residency.forget(ids[0]);
        assert_eq!(residency.resident(ImageClass::Original), 1);
    }

    #[test]
    fn evicted_bitmap_reloads_on_demand() {
        let (io, storage) = setup(&[("/a.jpg", 2000, 1500)]);
        let mut item = ImageItem::new(&io, "/a.jpg", ClassSizes::default());
        item.image(ImageClass::Original, &io).unwrap();
        item.evict(ImageClass::Original);
        assert!(item.bitmap(ImageClass::Original).is_none());
        assert!(item.image(ImageClass::Original, &io).is_some());
        assert!(storage.reads_of("/a.jpg") >= 1);
    }
}
