//! Fixed-capacity single-producer/single-consumer byte queue.
//!
//! Sits between the radio callback context (producer) and the bridge loop
//! (consumer). Both sides only take `&self`; the indices are atomics with
//! acquire/release ordering, so a producer running in another execution
//! context never observes a half-published write.
//!
//! ## Overflow policy
//!
//! **Truncation**, uniformly for every instance: a write larger than
//! [`RingBuffer::free_space`] stores the prefix that fits and reports the
//! shorter count. Bytes already queued are never touched.
//!
//! ## Index layout
//!
//! `head` (consumer) and `tail` (producer) run over `0..2N`, so a full
//! buffer (`tail - head == N`) is distinguishable from an empty one
//! without sacrificing a slot.
//!
//! ```text
//!   head % N              tail % N
//!      │                     │
//!   ┌──▼─────────────────────▼────────┐
//!   │  │  unread bytes (count) │ free │
//!   └─────────────────────────────────┘
//! ```

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// SPSC byte ring of capacity `N`.
///
/// At most one producer and one consumer may use an instance. The
/// consumer-side operations are [`read`](Self::read) and
/// [`clear`](Self::clear); the producer-side operations are
/// [`write`](Self::write) and [`push`](Self::push).
pub struct RingBuffer<const N: usize> {
    data: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: the producer only writes the free region and then publishes it
// with a release store of `tail`; the consumer only reads the region it
// acquired through `tail` and then releases it with a store of `head`.
// The two regions never overlap.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const NONZERO: () = assert!(N > 0, "ring buffer capacity must be non-zero");

    /// Create an empty buffer. Usable in `static` items.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NONZERO;
        Self {
            data: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Total capacity in bytes.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of unread bytes.
    #[inline]
    pub fn available(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        Self::distance(head, tail)
    }

    /// Number of bytes that can be written without truncation.
    #[inline]
    pub fn free_space(&self) -> usize {
        N - self.available()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Append as much of `data` as fits. Returns the number of bytes stored.
    ///
    /// Producer side. Never blocks.
    pub fn write(&self, data: &[u8]) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let free = N - Self::distance(head, tail);
        let len = data.len().min(free);
        if len == 0 {
            return 0;
        }

        let start = tail % N;
        let first = len.min(N - start);
        let base = self.data.get() as *mut u8;
        // SAFETY: `start..start + first` and `0..len - first` lie in the free
        // region, which the consumer does not read until `tail` is published.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, len - first);
        }

        self.tail.store(Self::advance(tail, len), Ordering::Release);
        len
    }

    /// Append `data`, reporting `BufferFull` when it did not fit entirely.
    ///
    /// The prefix that fits is still stored (truncation policy); the error
    /// only signals that the tail end was dropped.
    pub fn push(&self, data: &[u8]) -> Result<()> {
        if self.write(data) == data.len() {
            Ok(())
        } else {
            Err(Error::BufferFull)
        }
    }

    /// Move up to `buf.len()` bytes out of the ring, oldest first.
    ///
    /// Consumer side. Returns the number of bytes copied (0 when empty).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        let len = buf.len().min(Self::distance(head, tail));
        if len == 0 {
            return 0;
        }

        let start = head % N;
        let first = len.min(N - start);
        let base = self.data.get() as *const u8;
        // SAFETY: the region was published by the producer's release store of
        // `tail` and is not reused until `head` moves past it below.
        unsafe {
            ptr::copy_nonoverlapping(base.add(start), buf.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, buf.as_mut_ptr().add(first), len - first);
        }

        self.head.store(Self::advance(head, len), Ordering::Release);
        len
    }

    /// Discard everything currently queued. Returns the number of bytes dropped.
    ///
    /// Consumer side; used to flush stale traffic after a reconnect.
    pub fn clear(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(tail, Ordering::Release);
        Self::distance(head, tail)
    }

    #[inline]
    const fn distance(head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            tail + 2 * N - head
        }
    }

    #[inline]
    const fn advance(pos: usize, len: usize) -> usize {
        let next = pos + len;
        if next >= 2 * N {
            next - 2 * N
        } else {
            next
        }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
