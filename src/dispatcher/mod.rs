//! Asynchronous image loading and saving.
//!
//! The [`Dispatcher`] is the only way the rest of the crate reads or writes
//! images in the background. It belongs to one designated thread (the thread
//! that created it) and refuses, by panicking, to be driven from any other.
//!
//! # Threads
//!
//! ```text
//! owner thread ──submit──▶ [pending queue] ──▶ I/O thread ──read──▶ resize pool
//!      ▲                                          │ save                │
//!      └──────────── completion channel ◀─────────┴─────────────────────┘
//! ```
//!
//! - **Owner thread**: submits, cancels, and receives every reply.
//! - **I/O thread**: one dedicated thread, serially reading files and
//!   encoding/writing saves, so disk seeks never interleave.
//! - **Resize pool**: a rayon pool that decodes and scales. The I/O thread
//!   feeds it, and so does the owner thread directly when a request is
//!   answered from the cache at submission.
//!
//! # Replies
//!
//! Workers never call back into client state. They send a completion over a
//! channel; [`Dispatcher::pump`] (owner thread only) turns completions into
//! [`Reply`] values and files them in a mailbox per [`CallbackId`]. Clients
//! collect theirs with [`Dispatcher::take_replies`]. Every dispatched request
//! produces exactly one reply.
//!
//! # Dedupe
//!
//! A request is identified by (kind, callback, path, size) plus, for saves, a
//! SHA-256 of the pixel data and the quality. While a request with the same
//! identity is pending or in flight, an identical submission is dropped and
//! returns `None`.
//!
//! # Locking
//!
//! The request book (pending queue, dedupe keys, in-flight tickets) has its
//! own mutex; the [`TieredCache`] has another. No code path holds both.
//!
//! # Shutdown
//!
//! [`Dispatcher::shutdown`] (also run on drop) cancels everything pending,
//! stops and joins the I/O thread, then blocks until every resize task has
//! finished.

mod queue;

pub use queue::{Priority, RequestQueue};

use crate::cache::{CacheBudgets, CacheMetrics, CachedImage, TieredCache};
use crate::imaging::{
    BackendError, ImageCodec, LocalStorage, Quality, RustCodec, Storage, dimensions,
    format_for_path, quick_resize,
};
use crate::types::Size;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not start resize pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("could not load image ({size}): {reason}")]
    Load { size: String, reason: String },
}

fn load_error(size: Size, reason: impl std::fmt::Display) -> DispatchError {
    DispatchError::Load {
        size: size.label(),
        reason: reason.to_string(),
    }
}

/// Identity of a reply recipient, issued by [`Dispatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Identity of one accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    UseCache,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Load,
    Save,
}

/// What a request does.
#[derive(Debug, Clone)]
pub enum Job {
    /// Load `path` scaled to fit `size` (the original for `Size::ORIGINAL`).
    Load { size: Size },
    /// Encode `image` by the path's extension and write it.
    Save {
        image: Arc<DynamicImage>,
        quality: Quality,
    },
}

impl Job {
    pub fn kind(&self) -> RequestKind {
        match self {
            Job::Load { .. } => RequestKind::Load,
            Job::Save { .. } => RequestKind::Save,
        }
    }

    fn size(&self) -> Size {
        match self {
            Job::Load { size } => *size,
            Job::Save { image, .. } => dimensions(image),
        }
    }
}

/// Result carried by a [`Reply`].
#[derive(Debug, Clone)]
pub enum Outcome {
    Loaded(Arc<DynamicImage>),
    Saved,
    Failed(String),
}

/// A finished request, delivered on the owner thread.
#[derive(Debug, Clone)]
pub struct Reply {
    pub handle: RequestHandle,
    pub callback: CallbackId,
    pub path: PathBuf,
    pub size: Size,
    pub outcome: Outcome,
}

/// Result of [`Dispatcher::quick_request`].
#[derive(Debug, Clone)]
pub enum QuickResult {
    /// Answered synchronously from the cache.
    Ready(Arc<DynamicImage>),
    /// Submitted; `None` if the submission was a duplicate or refused.
    Pending(Option<RequestHandle>),
}

/// Construction parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherSettings {
    /// Resize pool size; 0 lets rayon decide.
    pub threads: usize,
    pub metrics: CacheMetrics,
    pub budgets: CacheBudgets,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey(String);

fn fingerprint(image: &DynamicImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(format!("{:?}", image.color()).as_bytes());
    hasher.update(image.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn dedupe_key(callback: CallbackId, path: &Path, job: &Job) -> DedupeKey {
    let size = job.size();
    let base = format!(
        "{:?} {} {} {} {}",
        job.kind(),
        callback.0,
        path.display(),
        size.width,
        size.height
    );
    match job {
        Job::Load { .. } => DedupeKey(base),
        Job::Save { image, quality } => DedupeKey(format!(
            "{base} {} {}",
            fingerprint(image),
            quality.value()
        )),
    }
}

struct Request {
    handle: RequestHandle,
    callback: CallbackId,
    path: PathBuf,
    job: Job,
    policy: CachePolicy,
    key: DedupeKey,
}

impl Request {
    fn ticket(&self) -> Ticket {
        Ticket {
            callback: self.callback,
            path: self.path.clone(),
            size: self.job.size(),
            key: self.key.clone(),
        }
    }
}

/// Bookkeeping for a request that left the pending queue.
struct Ticket {
    callback: CallbackId,
    path: PathBuf,
    size: Size,
    key: DedupeKey,
}

#[derive(Default)]
struct Book {
    pending: RequestQueue<Request>,
    keys: HashSet<DedupeKey>,
    in_flight: HashMap<RequestHandle, Ticket>,
    terminate: bool,
}

#[derive(Default)]
struct Shared {
    book: Mutex<Book>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Completion {
    handle: RequestHandle,
    outcome: Outcome,
}

/// Counts running pool tasks so shutdown can wait for them.
#[derive(Default)]
struct TaskTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

struct TaskGuard(Arc<TaskTracker>);

impl TaskTracker {
    fn enter(self: &Arc<Self>) -> TaskGuard {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        TaskGuard(Arc::clone(self))
    }

    fn wait_idle(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        while *active > 0 {
            active = self.idle.wait(active).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut active = self.0.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active -= 1;
        if *active == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// The thread-safe half of the dispatcher: collaborators, cache and pool.
///
/// Shared with the I/O thread, the resize tasks, and the album builder's
/// own tasks. Everything here may be called from any thread.
pub struct IoCore {
    codec: Arc<dyn ImageCodec>,
    storage: Arc<dyn Storage>,
    cache: TieredCache,
    pool: rayon::ThreadPool,
    tasks: Arc<TaskTracker>,
}

impl IoCore {
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn codec(&self) -> &dyn ImageCodec {
        self.codec.as_ref()
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Run `task` on the resize pool. Shutdown waits for it; a panic inside
    /// is contained and logged.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        let guard = self.tasks.enter();
        self.pool.spawn(move || {
            let _guard = guard;
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                warn!("pool task panicked");
            }
        });
    }

    /// Load `path` scaled to `size` on the calling thread.
    ///
    /// Uses the cache if it can answer, but never stores into it and does
    /// no dedupe bookkeeping.
    pub fn load_immediately(&self, path: &Path, size: Size) -> Result<Arc<DynamicImage>, DispatchError> {
        if let Some(hit) = self.cache.lookup(path, size) {
            return Ok(quick_resize(&hit.image, size));
        }
        let bytes = self.storage.read(path).map_err(|e| load_error(size, e))?;
        let image = Arc::new(self.codec.decode(&bytes).map_err(|e| load_error(size, e))?);
        Ok(quick_resize(&image, size))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CachedImage, BackendError> {
        Ok(CachedImage::original(Arc::new(self.codec.decode(bytes)?)))
    }

    /// Resize-task body: decode if needed, cache, scale.
    fn resize_outcome(&self, path: &Path, size: Size, policy: CachePolicy, source: Source) -> Outcome {
        let source = match source {
            Source::Cached(hit) => hit,
            Source::Bytes(bytes) => match self.decode(&bytes) {
                Ok(decoded) => decoded,
                Err(e) => return Outcome::Failed(load_error(size, e).to_string()),
            },
        };
        let use_cache = policy == CachePolicy::UseCache;
        if use_cache {
            self.cache.store(path, source.clone());
        }
        if size.is_original() {
            return Outcome::Loaded(source.image);
        }
        if use_cache {
            self.cache.store_intermediate(path, &source.image, size);
        }
        let scaled = quick_resize(&source.image, size);
        if use_cache && !Arc::ptr_eq(&scaled, &source.image) {
            self.cache.store(path, CachedImage::scaled(Arc::clone(&scaled)));
        }
        Outcome::Loaded(scaled)
    }

    fn save(&self, path: &Path, image: &Arc<DynamicImage>, quality: Quality, policy: CachePolicy) -> Outcome {
        if policy == CachePolicy::UseCache {
            self.cache.store(path, CachedImage::original(Arc::clone(image)));
        }
        let written = format_for_path(path)
            .and_then(|format| self.codec.encode(image, format, quality))
            .and_then(|bytes| self.storage.write(path, &bytes).map_err(BackendError::Io));
        match written {
            Ok(()) => Outcome::Saved,
            Err(e) => Outcome::Failed(format!("could not save image: {e}")),
        }
    }
}

enum Source {
    Bytes(Vec<u8>),
    Cached(CachedImage),
}

/// Spawn the resize task for a load and report through `tx`.
fn spawn_resize(
    core: &Arc<IoCore>,
    tx: &Sender<Completion>,
    handle: RequestHandle,
    path: PathBuf,
    size: Size,
    policy: CachePolicy,
    source: Source,
) {
    let task_core = Arc::clone(core);
    let tx = tx.clone();
    core.spawn(move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            task_core.resize_outcome(&path, size, policy, source)
        }))
        .unwrap_or_else(|_| Outcome::Failed(load_error(size, "resize task panicked").to_string()));
        // The receiver is gone only after shutdown; nobody is waiting then.
        let _ = tx.send(Completion { handle, outcome });
    });
}

fn io_loop(shared: Arc<Shared>, core: Arc<IoCore>, tx: Sender<Completion>) {
    loop {
        let request = {
            let mut book = shared.lock();
            loop {
                if book.terminate {
                    return;
                }
                if let Some(request) = book.pending.pop() {
                    let ticket = request.ticket();
                    book.in_flight.insert(request.handle, ticket);
                    break request;
                }
                book = shared.wake.wait(book).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Request {
            handle,
            path,
            job,
            policy,
            ..
        } = request;
        match job {
            Job::Load { size } => {
                // The cache may have been filled while this request waited.
                let cached = match policy {
                    CachePolicy::UseCache => core.cache.lookup(&path, size),
                    CachePolicy::Bypass => None,
                };
                let source = match cached {
                    Some(hit) => Some(Source::Cached(hit)),
                    None => match core.storage.read(&path) {
                        Ok(bytes) => Some(Source::Bytes(bytes)),
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "read failed");
                            let outcome = Outcome::Failed(load_error(size, e).to_string());
                            let _ = tx.send(Completion { handle, outcome });
                            None
                        }
                    },
                };
                if let Some(source) = source {
                    spawn_resize(&core, &tx, handle, path, size, policy, source);
                }
            }
            Job::Save { image, quality } => {
                let outcome = core.save(&path, &image, quality, policy);
                let _ = tx.send(Completion { handle, outcome });
            }
        }
    }
}

/// Background image loader/saver owned by one thread. See the module docs.
pub struct Dispatcher {
    owner: ThreadId,
    shared: Arc<Shared>,
    core: Arc<IoCore>,
    sender: Sender<Completion>,
    completions: Receiver<Completion>,
    io_thread: Option<JoinHandle<()>>,
    mailboxes: RefCell<HashMap<CallbackId, VecDeque<Reply>>>,
    registered: RefCell<HashSet<CallbackId>>,
    next_id: Cell<u64>,
}

impl Dispatcher {
    /// Start the I/O thread and resize pool. The calling thread becomes
    /// the owner.
    pub fn new(
        codec: Arc<dyn ImageCodec>,
        storage: Arc<dyn Storage>,
        settings: DispatcherSettings,
    ) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .thread_name(|i| format!("resize-{i}"))
            .build()?;
        let core = Arc::new(IoCore {
            codec,
            storage,
            cache: TieredCache::new(settings.metrics, settings.budgets),
            pool,
            tasks: Arc::default(),
        });
        let shared = Arc::new(Shared::default());
        let (sender, completions) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread_core = Arc::clone(&core);
        let thread_tx = sender.clone();
        let io_thread = thread::Builder::new()
            .name("image-io".to_string())
            .spawn(move || io_loop(thread_shared, thread_core, thread_tx))?;

        Ok(Self {
            owner: thread::current().id(),
            shared,
            core,
            sender,
            completions,
            io_thread: Some(io_thread),
            mailboxes: RefCell::default(),
            registered: RefCell::default(),
            next_id: Cell::new(1),
        })
    }

    /// Dispatcher over the local filesystem and the `image` crate codec.
    pub fn with_settings(settings: DispatcherSettings) -> Result<Self, DispatchError> {
        Self::new(Arc::new(RustCodec), Arc::new(LocalStorage), settings)
    }

    fn assert_owner(&self, operation: &str) {
        let current = thread::current().id();
        assert!(
            current == self.owner,
            "Dispatcher::{operation} called from {current:?}; only the owner thread {:?} may call it",
            self.owner
        );
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Shared handle for off-thread work (`load_immediately`, pool tasks).
    pub fn core(&self) -> Arc<IoCore> {
        Arc::clone(&self.core)
    }

    pub fn cache(&self) -> &TieredCache {
        &self.core.cache
    }

    /// New reply recipient.
    pub fn register(&self) -> CallbackId {
        self.assert_owner("register");
        let id = CallbackId(self.next_id());
        self.registered.borrow_mut().insert(id);
        id
    }

    /// Queue a request. Returns `None` for a duplicate of a pending or
    /// in-flight request, or after shutdown.
    pub fn submit(
        &self,
        callback: CallbackId,
        path: impl Into<PathBuf>,
        job: Job,
        policy: CachePolicy,
        priority: Priority,
    ) -> Option<RequestHandle> {
        self.assert_owner("submit");
        let path = path.into();
        let key = dedupe_key(callback, &path, &job);
        {
            let mut book = self.shared.lock();
            if book.terminate {
                return None;
            }
            if !book.keys.insert(key.clone()) {
                debug!(path = %path.display(), "duplicate request dropped");
                return None;
            }
        }
        let handle = RequestHandle(self.next_id());
        let request = Request {
            handle,
            callback,
            path,
            job,
            policy,
            key,
        };

        // Short-circuit the I/O thread when the cache can answer a load.
        if let (Job::Load { size }, CachePolicy::UseCache) = (&request.job, policy) {
            if let Some(hit) = self.core.cache.lookup(&request.path, *size) {
                let size = *size;
                let ticket = request.ticket();
                self.shared.lock().in_flight.insert(handle, ticket);
                spawn_resize(
                    &self.core,
                    &self.sender,
                    handle,
                    request.path,
                    size,
                    policy,
                    Source::Cached(hit),
                );
                return Some(handle);
            }
        }

        self.shared.lock().pending.push(request, priority);
        self.shared.wake.notify_one();
        Some(handle)
    }

    /// Queue a load of `path` scaled to `size`.
    pub fn request_image(
        &self,
        callback: CallbackId,
        path: impl Into<PathBuf>,
        size: Size,
        policy: CachePolicy,
        priority: Priority,
    ) -> Option<RequestHandle> {
        self.submit(callback, path, Job::Load { size }, policy, priority)
    }

    /// Queue a save of `image` to `path`.
    pub fn save_image(
        &self,
        callback: CallbackId,
        path: impl Into<PathBuf>,
        image: Arc<DynamicImage>,
        quality: Quality,
        policy: CachePolicy,
        priority: Priority,
    ) -> Option<RequestHandle> {
        self.submit(callback, path, Job::Save { image, quality }, policy, priority)
    }

    /// Answer from the cache right now if a hit is at most twice the
    /// requested size; otherwise submit a normal load.
    pub fn quick_request(
        &self,
        callback: CallbackId,
        path: impl Into<PathBuf>,
        size: Size,
        policy: CachePolicy,
        priority: Priority,
    ) -> QuickResult {
        self.assert_owner("quick_request");
        let path = path.into();
        if policy == CachePolicy::UseCache {
            if let Some(hit) = self.core.cache.lookup(&path, size) {
                let have = hit.size();
                let cheap = size.is_original()
                    || (have.width <= 2 * size.width && have.height <= 2 * size.height);
                if cheap {
                    return QuickResult::Ready(quick_resize(&hit.image, size));
                }
            }
        }
        QuickResult::Pending(self.request_image(callback, path, size, policy, priority))
    }

    /// Synchronous load, callable from any thread. See [`IoCore::load_immediately`].
    pub fn load_immediately(&self, path: &Path, size: Size) -> Result<Arc<DynamicImage>, DispatchError> {
        self.core.load_immediately(path, size)
    }

    fn drop_pending(book: &mut Book, predicate: impl FnMut(&Request) -> bool) -> usize {
        let removed = book.pending.remove_where(predicate);
        for request in &removed {
            book.keys.remove(&request.key);
        }
        removed.len()
    }

    /// Remove a not-yet-dispatched request. In-flight work cannot be cancelled.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        self.assert_owner("cancel");
        let mut book = self.shared.lock();
        Self::drop_pending(&mut book, |r| r.handle == handle) > 0
    }

    /// Remove every pending request of `callback`, or of everybody for `None`.
    pub fn cancel_all(&self, callback: Option<CallbackId>) -> bool {
        self.assert_owner("cancel_all");
        let mut book = self.shared.lock();
        let removed = Self::drop_pending(&mut book, |r| callback.is_none_or(|c| r.callback == c));
        removed > 0
    }

    /// Cancel `callback`'s pending work and discard its undelivered replies.
    /// Replies of its in-flight work are dropped when they arrive.
    pub fn unregister(&self, callback: CallbackId) {
        self.cancel_all(Some(callback));
        self.registered.borrow_mut().remove(&callback);
        self.mailboxes.borrow_mut().remove(&callback);
    }

    /// Requests pending or in flight.
    pub fn outstanding(&self) -> usize {
        let book = self.shared.lock();
        book.pending.len() + book.in_flight.len()
    }

    fn deliver(&self, completion: Completion) {
        let ticket = {
            let mut book = self.shared.lock();
            let ticket = book.in_flight.remove(&completion.handle);
            if let Some(ticket) = &ticket {
                book.keys.remove(&ticket.key);
            }
            ticket
        };
        let Some(ticket) = ticket else {
            debug!(handle = completion.handle.0, "completion without ticket");
            return;
        };
        if !self.registered.borrow().contains(&ticket.callback) {
            debug!(handle = completion.handle.0, "reply for unregistered callback dropped");
            return;
        }
        let reply = Reply {
            handle: completion.handle,
            callback: ticket.callback,
            path: ticket.path,
            size: ticket.size,
            outcome: completion.outcome,
        };
        self.mailboxes
            .borrow_mut()
            .entry(ticket.callback)
            .or_default()
            .push_back(reply);
    }

    /// Move finished work into the callback mailboxes. With `wait`, block
    /// until at least one completion arrives, unless nothing is outstanding.
    /// Returns the number of replies delivered.
    pub fn pump(&self, wait: bool) -> usize {
        self.assert_owner("pump");
        let mut delivered = 0;
        if wait && self.outstanding() > 0 {
            match self.completions.recv() {
                Ok(completion) => {
                    self.deliver(completion);
                    delivered += 1;
                }
                Err(_) => return 0,
            }
        }
        while let Ok(completion) = self.completions.try_recv() {
            self.deliver(completion);
            delivered += 1;
        }
        delivered
    }

    /// Replies delivered to `callback` so far, oldest first.
    pub fn take_replies(&self, callback: CallbackId) -> Vec<Reply> {
        self.assert_owner("take_replies");
        self.mailboxes
            .borrow_mut()
            .remove(&callback)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Stop accepting work, cancel everything pending, join the I/O thread
    /// and wait for all resize tasks. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(io_thread) = self.io_thread.take() else {
            return;
        };
        {
            let mut book = self.shared.lock();
            let cancelled = Self::drop_pending(&mut book, |_| true);
            book.terminate = true;
            debug!(cancelled, "dispatcher shutting down");
        }
        self.shared.wake.notify_all();
        if io_thread.join().is_err() {
            warn!("image I/O thread panicked");
        }
        self.core.tasks.wait_idle();
        while self.completions.try_recv().is_ok() {}
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
