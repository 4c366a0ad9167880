//! In-memory cache of decoded images, split into three size tiers.
//!
//! Decoding a 24 megapixel JPEG costs far more than scaling an already
//! decoded bitmap, so the dispatcher keeps recently decoded images around and
//! answers repeat requests for the same path from memory.
//!
//! # Tiers
//!
//! Entries are bucketed by image size against two configurable thresholds:
//!
//! | Tier | Condition | Default budget |
//! |---|---|---|
//! | Big | wider than `big.width` **or** taller than `big.height` | 64 MiB |
//! | Small | narrower than `small.width` **and** shorter than `small.height` | 32 MiB |
//! | Medium | everything else | 64 MiB |
//!
//! Default thresholds are 1600x1200 (big) and 320x240 (small). Each tier has
//! its own byte budget (cost = width × height × 4) and evicts its least
//! recently used entries when the budget is exceeded, so a burst of full-size
//! originals cannot flush out the thumbnails the UI is showing.
//!
//! # Lookup rules
//!
//! - A request for the original (empty size) only matches entries stored with
//!   [`CachedImage::original`] set, in any tier. A scaled derivative never
//!   stands in for the original.
//! - A request for a concrete size checks the small tier (only if the size
//!   itself is small), then medium (if the size is not big), then big. An
//!   entry matches if it is at least as wide **or** as tall as the request,
//!   i.e. it can be scaled down instead of re-read from disk.
//!
//! # Never downgrade
//!
//! [`TieredCache::store`] refuses to replace an entry of the same path in the
//! same tier that already has at least as many pixels.
//!
//! # Intermediate stage
//!
//! When a big image serves a small request,
//! [`TieredCache::store_intermediate`] additionally caches a quick-scaled copy
//! at the small threshold. Follow-up thumbnail requests for that path then
//! scale from the intermediate instead of the big original.

use crate::imaging::{dimensions, quick_resize};
use crate::types::Size;
use image::DynamicImage;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A decoded image as handed out by the cache.
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub image: Arc<DynamicImage>,
    /// True if this is the unscaled original as decoded from disk.
    pub original: bool,
}

impl CachedImage {
    pub fn original(image: Arc<DynamicImage>) -> Self {
        Self {
            image,
            original: true,
        }
    }

    pub fn scaled(image: Arc<DynamicImage>) -> Self {
        Self {
            image,
            original: false,
        }
    }

    pub fn size(&self) -> Size {
        dimensions(&self.image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Small,
    Medium,
    Big,
}

/// Size thresholds separating the tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub big: Size,
    pub small: Size,
    pub intermediates: bool,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self {
            big: Size::new(1600, 1200),
            small: Size::new(320, 240),
            intermediates: true,
        }
    }
}

impl CacheMetrics {
    pub fn tier_of(&self, size: Size) -> Tier {
        if size.width > self.big.width || size.height > self.big.height {
            Tier::Big
        } else if size.width < self.small.width && size.height < self.small.height {
            Tier::Small
        } else {
            Tier::Medium
        }
    }
}

/// Per-tier budgets in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudgets {
    pub big: usize,
    pub medium: usize,
    pub small: usize,
}

impl Default for CacheBudgets {
    fn default() -> Self {
        Self {
            big: 64 * 1024 * 1024,
            medium: 64 * 1024 * 1024,
            small: 32 * 1024 * 1024,
        }
    }
}

/// Cache activity counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub stores: u32,
    /// Stores refused (never-downgrade rule or entry larger than the tier).
    pub rejected: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({} lookups), {} stored",
            self.hits,
            self.misses,
            self.total(),
            self.stores
        )?;
        if self.rejected > 0 {
            write!(f, ", {} rejected", self.rejected)?;
        }
        Ok(())
    }
}

/// Approximate memory cost of a decoded image.
pub fn cost_of(size: Size) -> usize {
    size.width as usize * size.height as usize * 4
}

#[derive(Debug)]
struct Slot {
    entry: CachedImage,
    cost: usize,
    last_used: u64,
}

/// One tier: least-recently-used eviction under a byte budget.
#[derive(Debug)]
struct TierStore {
    budget: usize,
    total: usize,
    slots: HashMap<PathBuf, Slot>,
}

impl TierStore {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            total: 0,
            slots: HashMap::new(),
        }
    }

    fn get(&mut self, path: &Path, clock: u64) -> Option<&CachedImage> {
        let slot = self.slots.get_mut(path)?;
        slot.last_used = clock;
        Some(&slot.entry)
    }

    fn pixels_of(&self, path: &Path) -> Option<u64> {
        self.slots.get(path).map(|s| s.entry.size().pixels())
    }

    fn insert(&mut self, path: PathBuf, entry: CachedImage, clock: u64) -> bool {
        let cost = cost_of(entry.size());
        if cost > self.budget {
            return false;
        }
        if let Some(old) = self.slots.remove(&path) {
            self.total -= old.cost;
        }
        self.total += cost;
        self.slots.insert(
            path.clone(),
            Slot {
                entry,
                cost,
                last_used: clock,
            },
        );
        self.evict_except(&path);
        true
    }

    fn evict_except(&mut self, keep: &Path) {
        while self.total > self.budget {
            let victim = self
                .slots
                .iter()
                .filter(|(p, _)| p.as_path() != keep)
                .min_by_key(|(_, s)| s.last_used)
                .map(|(p, _)| p.clone());
            let Some(victim) = victim else { break };
            if let Some(slot) = self.slots.remove(&victim) {
                self.total -= slot.cost;
            }
        }
    }

    fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
        while self.total > self.budget {
            let Some(victim) = self
                .slots
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(p, _)| p.clone())
            else {
                break;
            };
            if let Some(slot) = self.slots.remove(&victim) {
                self.total -= slot.cost;
            }
        }
    }
}

#[derive(Debug)]
struct Tiers {
    metrics: CacheMetrics,
    small: TierStore,
    medium: TierStore,
    big: TierStore,
    clock: u64,
    stats: CacheStats,
}

impl Tiers {
    fn tier_mut(&mut self, tier: Tier) -> &mut TierStore {
        match tier {
            Tier::Small => &mut self.small,
            Tier::Medium => &mut self.medium,
            Tier::Big => &mut self.big,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Thread-safe three-tier image cache. All state sits behind one mutex.
#[derive(Debug)]
pub struct TieredCache {
    inner: Mutex<Tiers>,
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new(CacheMetrics::default(), CacheBudgets::default())
    }
}

impl TieredCache {
    pub fn new(metrics: CacheMetrics, budgets: CacheBudgets) -> Self {
        Self {
            inner: Mutex::new(Tiers {
                metrics,
                small: TierStore::new(budgets.small),
                medium: TierStore::new(budgets.medium),
                big: TierStore::new(budgets.big),
                clock: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.lock().metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Change the per-tier budgets, evicting immediately if a tier shrank.
    pub fn set_budgets(&self, budgets: CacheBudgets) {
        let mut tiers = self.lock();
        tiers.big.set_budget(budgets.big);
        tiers.medium.set_budget(budgets.medium);
        tiers.small.set_budget(budgets.small);
    }

    /// Change the tier thresholds. Zero sizes leave the current threshold in
    /// place; inverted thresholds are swapped.
    pub fn set_metrics(&self, big: Size, small: Size, intermediates: bool) {
        let mut tiers = self.lock();
        let metrics = &mut tiers.metrics;
        if !big.is_original() {
            metrics.big = big;
        }
        if !small.is_original() {
            metrics.small = small;
        }
        if metrics.small.pixels() > metrics.big.pixels() {
            std::mem::swap(&mut metrics.small, &mut metrics.big);
        }
        metrics.intermediates = intermediates;
    }

    /// Find a cached image usable for a request of `size` (see module docs).
    pub fn lookup(&self, path: &Path, size: Size) -> Option<CachedImage> {
        let mut guard = self.lock();
        let tiers = &mut *guard;
        let clock = tiers.tick();
        let found = if size.is_original() {
            [Tier::Big, Tier::Medium, Tier::Small]
                .into_iter()
                .find_map(|tier| {
                    tiers
                        .tier_mut(tier)
                        .get(path, clock)
                        .filter(|e| e.original)
                        .cloned()
                })
        } else {
            let metrics = tiers.metrics;
            let mut candidates = Vec::with_capacity(3);
            if metrics.tier_of(size) == Tier::Small {
                candidates.push(Tier::Small);
            }
            if size.fits_within(metrics.big) {
                candidates.push(Tier::Medium);
            }
            candidates.push(Tier::Big);
            candidates.into_iter().find_map(|tier| {
                tiers
                    .tier_mut(tier)
                    .get(path, clock)
                    .filter(|e| {
                        let have = e.size();
                        have.width >= size.width || have.height >= size.height
                    })
                    .cloned()
            })
        };
        if found.is_some() {
            tiers.stats.hits += 1;
        } else {
            tiers.stats.misses += 1;
        }
        found
    }

    /// Cache `entry` for `path` in the tier matching its size.
    ///
    /// Returns false if refused: an entry with at least as many pixels is
    /// already cached for `path` in that tier, or the image alone exceeds the
    /// tier's budget.
    pub fn store(&self, path: &Path, entry: CachedImage) -> bool {
        let mut tiers = self.lock();
        let size = entry.size();
        let tier = tiers.metrics.tier_of(size);
        let clock = tiers.tick();
        let store = tiers.tier_mut(tier);
        let downgrade = store
            .pixels_of(path)
            .is_some_and(|existing| existing >= size.pixels());
        let stored = !downgrade && store.insert(path.to_path_buf(), entry, clock);
        if stored {
            tiers.stats.stores += 1;
        } else {
            tiers.stats.rejected += 1;
        }
        stored
    }

    /// If `image` is big and `requested` is small, also cache a copy scaled
    /// to the small threshold. Returns true if an intermediate was stored.
    pub fn store_intermediate(&self, path: &Path, image: &Arc<DynamicImage>, requested: Size) -> bool {
        let metrics = self.metrics();
        if !metrics.intermediates
            || requested.is_original()
            || metrics.tier_of(dimensions(image)) != Tier::Big
            || metrics.tier_of(requested) != Tier::Small
        {
            return false;
        }
        // Scaling happens outside the lock.
        let intermediate = quick_resize(image, metrics.small);
        self.store(path, CachedImage::scaled(intermediate))
    }

    /// Bytes currently held by each tier, as (small, medium, big).
    pub fn usage(&self) -> (usize, usize, usize) {
        let tiers = self.lock();
        (tiers.small.total, tiers.medium.total, tiers.big.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn image(width: u32, height: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::new(width, height)))
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("/photos/{name}.jpg"))
    }

    // =========================================================================
    // Tier selection
    // =========================================================================

    #[test]
    fn tier_boundaries() {
        let m = CacheMetrics::default();
        assert_eq!(m.tier_of(Size::new(1601, 100)), Tier::Big);
        assert_eq!(m.tier_of(Size::new(100, 1201)), Tier::Big);
        assert_eq!(m.tier_of(Size::new(1600, 1200)), Tier::Medium);
        assert_eq!(m.tier_of(Size::new(320, 100)), Tier::Medium);
        assert_eq!(m.tier_of(Size::new(319, 239)), Tier::Small);
    }

    #[test]
    fn set_metrics_swaps_inverted_and_ignores_zero() {
        let cache = TieredCache::default();
        cache.set_metrics(Size::new(100, 100), Size::new(2000, 2000), false);
        let m = cache.metrics();
        assert_eq!(m.big, Size::new(2000, 2000));
        assert_eq!(m.small, Size::new(100, 100));
        assert!(!m.intermediates);

        cache.set_metrics(Size::ORIGINAL, Size::new(50, 50), true);
        assert_eq!(cache.metrics().big, Size::new(2000, 2000));
        assert_eq!(cache.metrics().small, Size::new(50, 50));
    }

    // =========================================================================
    // Store and lookup
    // =========================================================================

    #[test]
    fn store_then_lookup_same_or_smaller() {
        let cache = TieredCache::default();
        assert!(cache.store(&path("a"), CachedImage::scaled(image(640, 480))));
        assert!(cache.lookup(&path("a"), Size::new(640, 480)).is_some());
        assert!(cache.lookup(&path("a"), Size::new(160, 160)).is_some());
        assert!(cache.lookup(&path("b"), Size::new(160, 160)).is_none());
    }

    #[test]
    fn lookup_accepts_either_dimension_large_enough() {
        let cache = TieredCache::default();
        cache.store(&path("a"), CachedImage::scaled(image(640, 200)));
        assert!(cache.lookup(&path("a"), Size::new(640, 480)).is_some());
        assert!(cache.lookup(&path("a"), Size::new(800, 600)).is_none());
    }

    #[test]
    fn original_lookup_requires_marker() {
        let cache = TieredCache::default();
        cache.store(&path("a"), CachedImage::scaled(image(800, 600)));
        assert!(cache.lookup(&path("a"), Size::ORIGINAL).is_none());

        cache.store(&path("b"), CachedImage::original(image(2000, 1500)));
        let hit = cache.lookup(&path("b"), Size::ORIGINAL).unwrap();
        assert!(hit.original);
        assert_eq!(hit.size(), Size::new(2000, 1500));
    }

    #[test]
    fn never_downgrade_within_a_tier() {
        let cache = TieredCache::default();
        assert!(cache.store(&path("a"), CachedImage::scaled(image(800, 600))));
        assert!(!cache.store(&path("a"), CachedImage::scaled(image(640, 480))));
        assert!(!cache.store(&path("a"), CachedImage::scaled(image(800, 600))));
        assert!(cache.store(&path("a"), CachedImage::scaled(image(1024, 768))));
        assert_eq!(cache.stats().rejected, 2);
    }

    #[test]
    fn smaller_copy_goes_to_its_own_tier() {
        let cache = TieredCache::default();
        assert!(cache.store(&path("a"), CachedImage::original(image(2000, 1500))));
        assert!(cache.store(&path("a"), CachedImage::scaled(image(160, 120))));
        assert!(cache.lookup(&path("a"), Size::ORIGINAL).is_some());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = TieredCache::default();
        cache.store(&path("a"), CachedImage::scaled(image(100, 100)));
        cache.lookup(&path("a"), Size::new(50, 50));
        cache.lookup(&path("x"), Size::new(50, 50));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.stores), (1, 1, 1));
        assert_eq!(stats.to_string(), "1 hits, 1 misses (2 lookups), 1 stored");
    }

    // =========================================================================
    // Budgets
    // =========================================================================

    #[test]
    fn eviction_drops_least_recently_used() {
        let one = cost_of(Size::new(100, 100));
        let cache = TieredCache::new(
            CacheMetrics::default(),
            CacheBudgets {
                big: one,
                medium: one,
                small: 2 * one,
            },
        );
        cache.store(&path("a"), CachedImage::scaled(image(100, 100)));
        cache.store(&path("b"), CachedImage::scaled(image(100, 100)));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.lookup(&path("a"), Size::new(100, 100)).is_some());
        cache.store(&path("c"), CachedImage::scaled(image(100, 100)));
        assert!(cache.lookup(&path("a"), Size::new(100, 100)).is_some());
        assert!(cache.lookup(&path("b"), Size::new(100, 100)).is_none());
        assert!(cache.lookup(&path("c"), Size::new(100, 100)).is_some());
        assert_eq!(cache.usage().0, 2 * one);
    }

    #[test]
    fn oversized_entry_is_refused() {
        let cache = TieredCache::new(
            CacheMetrics::default(),
            CacheBudgets {
                big: 10,
                medium: 10,
                small: 10,
            },
        );
        assert!(!cache.store(&path("a"), CachedImage::scaled(image(100, 100))));
    }

    #[test]
    fn shrinking_budget_evicts() {
        let cache = TieredCache::default();
        cache.store(&path("a"), CachedImage::scaled(image(100, 100)));
        cache.set_budgets(CacheBudgets {
            big: 0,
            medium: 0,
            small: 0,
        });
        assert_eq!(cache.usage(), (0, 0, 0));
    }

    // =========================================================================
    // Intermediate stage
    // =========================================================================

    #[test]
    fn intermediate_for_big_image_and_small_request() {
        let cache = TieredCache::default();
        let big = image(2400, 1800);
        assert!(cache.store_intermediate(&path("a"), &big, Size::new(160, 160)));
        let hit = cache.lookup(&path("a"), Size::new(160, 160)).unwrap();
        assert_eq!(hit.size(), Size::new(320, 240));
        assert!(!hit.original);
    }

    #[test]
    fn no_intermediate_for_medium_request_or_when_disabled() {
        let cache = TieredCache::default();
        let big = image(2400, 1800);
        assert!(!cache.store_intermediate(&path("a"), &big, Size::new(640, 480)));
        cache.set_metrics(Size::ORIGINAL, Size::ORIGINAL, false);
        assert!(!cache.store_intermediate(&path("a"), &big, Size::new(160, 160)));
    }
}
