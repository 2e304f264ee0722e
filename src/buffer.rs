//! Lock-free pool of reusable byte buffers for resource reads.
//!
//! The pool is a Treiber stack. Popped nodes are reclaimed through
//! `crossbeam::epoch`, so a thread that raced on a node it no longer owns
//! only ever reads its `next` link, never its payload.
//!
//! `disable_pooling` swaps a tagged null sentinel into the head. From then on
//! every allocation is fresh and every release is dropped on the floor.

use crossbeam::epoch::{self, Atomic, Owned, Shared};
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

const DISABLED: usize = 1;

pub const DEFAULT_MAX_POOLED_CAPACITY: usize = 1024 * 1024;

struct Node {
    data: ManuallyDrop<Vec<u8>>,
    next: Atomic<Node>,
}

/// A byte buffer handed out by [`BufferPool::allocate`].
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<u8>,
    reused: bool,
    poolable: bool,
}

impl PooledBuffer {
    fn fresh(len: usize, poolable: bool) -> Self {
        Self {
            data: vec![0u8; len],
            reused: false,
            poolable,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Whether the backing storage came out of the pool.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

pub struct BufferPool {
    head: Atomic<Node>,
    max_pooled_capacity: usize,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_pooled_capacity", &self.max_pooled_capacity)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED_CAPACITY)
    }
}

impl BufferPool {
    pub fn new(max_pooled_capacity: usize) -> Self {
        Self {
            head: Atomic::null(),
            max_pooled_capacity,
        }
    }

    pub fn is_disabled(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).tag() == DISABLED
    }

    /// Returns a buffer of exactly `len` bytes, reusing pooled storage when
    /// the popped buffer is large enough.
    pub fn allocate(&self, len: usize) -> PooledBuffer {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            if head.tag() == DISABLED {
                return PooledBuffer::fresh(len, false);
            }
            // SAFETY: nodes are only destroyed through the epoch collector, so
            // a pinned guard keeps `head` alive while we read it.
            let Some(node) = (unsafe { head.as_ref() }) else {
                return PooledBuffer::fresh(len, true);
            };
            let next = node.next.load(Ordering::Relaxed, &guard);
            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // SAFETY: the successful CAS made us the sole owner of the
                // payload; other threads may still read `next` until the
                // deferred destruction runs, but never `data`.
                let mut data = unsafe {
                    guard.defer_destroy(head);
                    ManuallyDrop::into_inner(ptr::read(&node.data))
                };
                if data.capacity() < len {
                    return PooledBuffer::fresh(len, true);
                }
                data.clear();
                data.resize(len, 0);
                return PooledBuffer {
                    data,
                    reused: true,
                    poolable: true,
                };
            }
        }
    }

    pub fn release(&self, buffer: PooledBuffer) {
        if !buffer.poolable || buffer.data.capacity() > self.max_pooled_capacity {
            return;
        }

        let mut node = Owned::new(Node {
            data: ManuallyDrop::new(buffer.data),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            if head.tag() == DISABLED {
                let node = node.into_box();
                drop(ManuallyDrop::into_inner(node.data));
                return;
            }
            node.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => return,
                Err(err) => node = err.new,
            }
        }
    }

    /// Permanently turns the pool into a pass-through allocator and lets the
    /// pooled memory go.
    pub fn disable_pooling(&self) {
        let guard = epoch::pin();
        let sentinel = Shared::null().with_tag(DISABLED);
        let mut current = self.head.swap(sentinel, Ordering::AcqRel, &guard);
        if current.tag() == DISABLED {
            return;
        }

        let mut released = 0usize;
        // SAFETY: the detached chain is unreachable from the head now; racing
        // poppers can only fail their CAS and read `next`, which stays valid
        // until the deferred destruction.
        while let Some(node) = unsafe { current.as_ref() } {
            let next = node.next.load(Ordering::Acquire, &guard);
            unsafe {
                drop(ManuallyDrop::into_inner(ptr::read(&node.data)));
                guard.defer_destroy(current);
            }
            released += 1;
            current = next;
        }
        tracing::debug!(released, "buffer pooling disabled");
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread touches the stack.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while let Some(node) = current.as_ref() {
                let next = node.next.load(Ordering::Relaxed, guard);
                let mut owned = current.into_owned();
                ManuallyDrop::drop(&mut owned.data);
                drop(owned);
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocate_never_returns_smaller_buffer() {
        let pool = BufferPool::default();
        let small = pool.allocate(16);
        assert_eq!(small.len(), 16);
        pool.release(small);

        let big = pool.allocate(4096);
        assert_eq!(big.len(), 4096);
        assert!(!big.is_reused());

        let again = pool.allocate(8);
        assert_eq!(again.len(), 8);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::default();
        let buf = pool.allocate(128);
        let ptr = buf.as_slice().as_ptr();
        pool.release(buf);

        let reused = pool.allocate(64);
        assert!(reused.is_reused());
        assert_eq!(reused.len(), 64);
        assert_eq!(reused.as_slice().as_ptr(), ptr);
        assert!(reused.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_buffers_are_not_pooled() {
        let pool = BufferPool::new(32);
        pool.release(pool.allocate(64));
        assert!(!pool.allocate(1).is_reused());
    }

    #[test]
    fn disabled_pool_hands_out_fresh_buffers_only() {
        let pool = BufferPool::default();
        let held: Vec<_> = (0..4).map(|_| pool.allocate(32)).collect();
        for buf in held {
            pool.release(buf);
        }

        pool.disable_pooling();
        assert!(pool.is_disabled());

        for _ in 0..8 {
            let buf = pool.allocate(16);
            assert!(!buf.is_reused());
            assert!(buf.len() >= 16);
            pool.release(buf);
        }

        pool.disable_pooling();
        assert!(pool.is_disabled());
    }

    #[test]
    fn concurrent_allocate_and_release() {
        let pool = Arc::new(BufferPool::default());
        std::thread::scope(|s| {
            for t in 0..8 {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    for i in 0..500 {
                        let len = 1 + (i * 7 + t) % 300;
                        let mut buf = pool.allocate(len);
                        assert_eq!(buf.len(), len);
                        buf.as_mut_slice()[len - 1] = t as u8;
                        pool.release(buf);
                        if t == 0 && i == 250 {
                            pool.disable_pooling();
                        }
                    }
                });
            }
        });
        assert!(pool.is_disabled());
        assert!(!pool.allocate(10).is_reused());
    }
}
