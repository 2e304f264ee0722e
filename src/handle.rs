//! Reference-counted archive handles.
//!
//! A [`HandleRef`] wraps one opened [`ArchiveHandle`]. Its counter starts at
//! two: one token for the caller that opened it and one existence token held
//! by the owning [`HandleSlot`]. `acquire` only succeeds while the counter is
//! positive, and the release that brings it to zero is the only path that
//! closes the handle.
//!
//! [`HandleSlot::with_handle`] mediates all access:
//!
//! 1. A published, still-live reference is acquired and used directly.
//! 2. Blocking threads publish an `Opening` marker, open the archive and
//!    publish the result; other blocking threads wait on the marker.
//! 3. Threads inside a [`CooperativeScope`] never wait. They open a private
//!    reference and try to publish it; if another reference won, the private
//!    one is drained and closed after use.

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::archive::ArchiveHandle;
use crate::error::{IndexError, Result};

thread_local! {
    static COOPERATIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as a cooperative (green/virtual) thread for the
/// lifetime of the guard. Handle access on such threads never blocks behind
/// another thread's in-flight open.
pub struct CooperativeScope {
    previous: bool,
}

impl CooperativeScope {
    pub fn enter() -> Self {
        let previous = COOPERATIVE.with(|c| c.replace(true));
        Self { previous }
    }
}

impl Drop for CooperativeScope {
    fn drop(&mut self) {
        COOPERATIVE.with(|c| c.set(self.previous));
    }
}

pub fn is_cooperative_thread() -> bool {
    COOPERATIVE.with(|c| c.get())
}

/// Open/close counters shared by every handle created through one loader.
#[derive(Debug, Default)]
pub struct OpenStats {
    opens: AtomicU64,
    closes: AtomicU64,
}

impl OpenStats {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Acquire)
    }

    pub fn open_handles(&self) -> u64 {
        self.opens().saturating_sub(self.closes())
    }
}

pub struct HandleRef {
    count: AtomicI32,
    handle: ArcSwapOption<ArchiveHandle>,
    path: PathBuf,
    owner: Weak<HandleSlot>,
    stats: Arc<OpenStats>,
}

impl std::fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRef")
            .field("path", &self.path)
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

impl HandleRef {
    fn new(handle: ArchiveHandle, owner: Weak<HandleSlot>, stats: Arc<OpenStats>) -> Self {
        let path = handle.path().to_path_buf();
        Self {
            count: AtomicI32::new(2),
            handle: ArcSwapOption::from_pointee(handle),
            path,
            owner,
            stats,
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.load().is_none()
    }

    pub fn acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops one token. Returns `true` when this call closed the handle.
    pub fn release(&self) -> Result<bool> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(IndexError::ReleaseUnderflow {
                    path: self.path.clone(),
                });
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if current == 1 => {
                    self.close();
                    return Ok(true);
                }
                Ok(_) => return Ok(false),
                Err(actual) => current = actual,
            }
        }
    }

    fn close(&self) {
        if self.handle.swap(None).is_some() {
            self.stats.closes.fetch_add(1, Ordering::AcqRel);
            tracing::trace!(path = %self.path.display(), "archive handle closed");
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.clear_if_current(self);
        }
    }
}

/// Keeps a reference acquired for the lifetime of the guard.
struct Acquired<'a>(&'a HandleRef);

impl Drop for Acquired<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.0.release() {
            tracing::error!(%err, "archive handle released more often than acquired");
        }
    }
}

impl Acquired<'_> {
    fn run<R>(&self, op: impl FnOnce(&ArchiveHandle) -> Result<R>) -> Result<R> {
        // The guard holds a token, so the handle cannot have been closed.
        match self.0.handle.load_full() {
            Some(handle) => op(&handle),
            None => Err(IndexError::Malformed(format!(
                "archive handle for {} used after close",
                self.0.path.display()
            ))),
        }
    }
}

#[derive(Default)]
struct PendingOpen {
    done: Mutex<bool>,
    ready: Condvar,
}

impl PendingOpen {
    fn complete(&self) {
        *self.done.lock() = true;
        self.ready.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.ready.wait(&mut done);
        }
    }
}

enum SlotState {
    Opening(Arc<PendingOpen>),
    Ready(Arc<HandleRef>),
}

/// The owner's pointer to its current handle reference.
pub struct HandleSlot {
    path: PathBuf,
    state: ArcSwapOption<SlotState>,
    stats: Arc<OpenStats>,
    me: Weak<HandleSlot>,
}

impl std::fmt::Debug for HandleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.load().as_deref() {
            None => "unopened",
            Some(SlotState::Opening(_)) => "opening",
            Some(SlotState::Ready(_)) => "ready",
        };
        f.debug_struct("HandleSlot")
            .field("path", &self.path)
            .field("state", &state)
            .finish()
    }
}

fn same_state(a: &Option<Arc<SlotState>>, b: &Option<Arc<SlotState>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl HandleSlot {
    pub fn new(path: PathBuf, stats: Arc<OpenStats>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            path,
            state: ArcSwapOption::empty(),
            stats,
            me: me.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state.load().as_deref(), Some(SlotState::Ready(_)))
    }

    /// The currently published reference, if any.
    pub fn current(&self) -> Option<Arc<HandleRef>> {
        match self.state.load_full().as_deref() {
            Some(SlotState::Ready(r)) => Some(Arc::clone(r)),
            _ => None,
        }
    }

    fn cas(&self, current: &Option<Arc<SlotState>>, new: Option<Arc<SlotState>>) -> bool {
        let previous = self.state.compare_and_swap(current, new);
        same_state(&previous, current)
    }

    fn clear_if_current(&self, closed: &HandleRef) {
        let current = self.state.load_full();
        if let Some(SlotState::Ready(r)) = current.as_deref()
            && std::ptr::eq(Arc::as_ptr(r), closed)
        {
            self.cas(&current, None);
        }
    }

    fn open_ref(&self) -> Result<Arc<HandleRef>> {
        let handle = ArchiveHandle::open(&self.path)?;
        self.stats.opens.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(path = %self.path.display(), "archive handle opened");
        Ok(Arc::new(HandleRef::new(handle, self.me.clone(), Arc::clone(&self.stats))))
    }

    /// Runs `op` against an acquired handle, opening the archive if needed.
    /// The acquisition is released on every exit path.
    pub fn with_handle<R>(&self, op: impl FnOnce(&ArchiveHandle) -> Result<R>) -> Result<R> {
        let cooperative = is_cooperative_thread();
        loop {
            let current = self.state.load_full();
            match current.as_deref() {
                Some(SlotState::Ready(r)) => {
                    if r.acquire() {
                        return Acquired(r).run(op);
                    }
                    // Closing right now; drop the dead pointer and go again.
                    self.cas(&current, None);
                }
                Some(SlotState::Opening(pending)) if !cooperative => {
                    pending.wait();
                }
                Some(SlotState::Opening(_)) => {
                    return self.with_private_ref(&None, op);
                }
                None if cooperative => {
                    return self.with_private_ref(&current, op);
                }
                None => {
                    let pending = Arc::new(PendingOpen::default());
                    let marker = Some(Arc::new(SlotState::Opening(Arc::clone(&pending))));
                    if !self.cas(&None, marker.clone()) {
                        continue;
                    }
                    let r = match self.open_ref() {
                        Ok(r) => r,
                        Err(err) => {
                            self.cas(&marker, None);
                            pending.complete();
                            return Err(err);
                        }
                    };
                    let published = Some(Arc::new(SlotState::Ready(Arc::clone(&r))));
                    let is_published = self.cas(&marker, published);
                    pending.complete();
                    return if is_published {
                        Acquired(&r).run(op)
                    } else {
                        drain_private(&r, op)
                    };
                }
            }
        }
    }

    fn with_private_ref<R>(
        &self,
        expected: &Option<Arc<SlotState>>,
        op: impl FnOnce(&ArchiveHandle) -> Result<R>,
    ) -> Result<R> {
        let r = self.open_ref()?;
        let published = Some(Arc::new(SlotState::Ready(Arc::clone(&r))));
        if expected.is_none() && self.cas(expected, published) {
            return Acquired(&r).run(op);
        }
        drain_private(&r, op)
    }

    /// Drops the owner's existence token. The handle closes once every
    /// in-flight user has released it. An open still in flight loses its
    /// marker, so the opener drains its handle instead of publishing it.
    pub fn reset(&self) {
        loop {
            let previous = self.state.load_full();
            match previous.as_deref() {
                None => return,
                Some(SlotState::Opening(_)) => {
                    if self.cas(&previous, None) {
                        return;
                    }
                }
                Some(SlotState::Ready(r)) => {
                    if self.cas(&previous, None) {
                        if let Err(err) = r.release() {
                            tracing::error!(%err, "existence token already released");
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Uses an unpublished reference once, then releases both its tokens so it
/// closes immediately.
fn drain_private<R>(r: &HandleRef, op: impl FnOnce(&ArchiveHandle) -> Result<R>) -> Result<R> {
    let result = Acquired(r).run(op);
    if let Err(err) = r.release() {
        tracing::error!(%err, "private archive handle over-released");
    }
    result
}
