//! Fixed-capacity I/O buffers and the pool that recycles them

use crate::errors::Error;
use crossbeam::queue::ArrayQueue;
use std::{
    fmt, mem,
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// A fixed-capacity byte region with a read cursor and a write cursor.
///
/// ```text
/// [ consumed | readable          | writable           ]
/// 0          start               end                  capacity
/// ```
///
/// Bytes are appended at `end` (socket reads, encoder output) and consumed
/// from `start` (decoder, socket writes). [`compact`](Buffer::compact)
/// moves the unread tail back to offset 0.
pub struct Buffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Buffer of `capacity` bytes already holding `value`.
    ///
    /// # Panics
    /// If `value` is longer than `capacity`.
    pub fn from_slice<V: AsRef<[u8]>>(capacity: usize, value: V) -> Self {
        let value = value.as_ref();
        assert!(value.len() <= capacity, "Value does not fit the buffer");

        let mut buffer = Self::with_capacity(capacity);
        buffer.data[..value.len()].copy_from_slice(value);
        buffer.end = value.len();
        buffer
    }

    #[inline(always)]
    fn empty() -> Self {
        Self {
            data: Box::default(),
            start: 0,
            end: 0,
        }
    }
}

impl Buffer {
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Free space after the write cursor.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.end
    }

    /// `true` when unread bytes occupy the whole buffer.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    #[inline(always)]
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Marks `n` readable bytes as consumed.
    #[inline]
    #[track_caller]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "Cannot consume more than is readable");
        self.start += n;
    }

    /// Marks `n` bytes of [`writable`](Buffer::writable) as filled.
    #[inline]
    #[track_caller]
    pub fn filled(&mut self, n: usize) {
        debug_assert!(n <= self.remaining(), "Cannot fill past the capacity");
        self.end += n;
    }

    /// Appends all of `bytes` or nothing.
    pub fn put(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let available = self.remaining();
        if bytes.len() > available {
            return Err(Error::BufferOverflow {
                needed: bytes.len(),
                available,
            });
        }

        self.data[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
        Ok(())
    }

    /// Moves unread bytes to the front, making room after them.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }

        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    // Read cursor checkpoints for the decoder
    #[inline(always)]
    pub(crate) const fn position(&self) -> usize {
        self.start
    }

    #[inline(always)]
    pub(crate) fn rewind(&mut self, position: usize) {
        debug_assert!(position <= self.end);
        self.start = position;
    }

    /// Bytes between two read positions, typically just consumed.
    #[inline(always)]
    pub(crate) fn span(&self, from: usize, to: usize) -> &[u8] {
        &self.data[from..to]
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

//

/// Lock-free pool of equally sized buffers shared by every reactor.
#[derive(Debug)]
pub struct BufferPool {
    queue: ArrayQueue<Buffer>,
    buffer_size: usize,
}

impl BufferPool {
    /// Creates a pool holding `count` pre-allocated buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, count: usize) -> Arc<Self> {
        let queue = ArrayQueue::new(count.max(1));
        for _ in 0..count {
            let _ = queue.push(Buffer::with_capacity(buffer_size));
        }

        Arc::new(Self { queue, buffer_size })
    }

    /// Hands out an empty buffer, allocating one if the pool is exhausted.
    /// It comes back to this pool when the guard is dropped.
    pub fn take(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .queue
            .pop()
            .unwrap_or_else(|| Buffer::with_capacity(self.buffer_size));

        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    fn give(&self, mut buffer: Buffer) {
        if buffer.capacity() != self.buffer_size {
            return;
        }

        buffer.clear();
        // A full pool drops the surplus buffer
        let _ = self.queue.push(buffer);
    }

    /// Buffers currently idle in the pool.
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// A [`Buffer`] on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buffer: Buffer,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Buffer;

    #[inline(always)]
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = mem::replace(&mut self.buffer, Buffer::empty());
        self.pool.give(buffer);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.buffer, f)
    }
}
