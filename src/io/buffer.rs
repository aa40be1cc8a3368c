//! Splice buffer pool
//!
//! Fixed-size 16 KiB slabs shared by the SNI relay's copy pumps, kept in a
//! lock-free queue. Buffers return to the pool when dropped; when the pool
//! is empty a fresh slab is allocated, and when it is full returned slabs
//! are simply freed.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Slab size used by the splice pumps
pub const SPLICE_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of pooled slabs
pub const DEFAULT_POOL_CAPACITY: usize = 128;

/// Pool of fixed-size byte slabs
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl BufferPool {
    /// Create a pool holding up to `capacity` slabs of `buffer_size` bytes
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// Create the splicer's pool: 128 × 16 KiB
    #[must_use]
    pub fn splice_pool() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, SPLICE_BUFFER_SIZE)
    }

    /// Take a slab from the pool, allocating if empty
    #[must_use]
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = match self.buffers.pop() {
            Some(buf) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.buffer_size]
            }
        };
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Slab size in bytes
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of fresh allocations (pool was empty)
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of reused slabs
    #[must_use]
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    fn put(&self, buf: Vec<u8>) {
        // Full pool: let the slab drop.
        let _ = self.buffers.push(buf);
    }
}

/// A slab borrowed from a [`BufferPool`], returned on drop
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
