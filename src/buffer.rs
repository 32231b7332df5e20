//! Lock-free receive-buffer pool
//!
//! Listeners read datagrams and framed TCP messages into pooled buffers so
//! the hot path does not allocate per request. Buffers are returned to the
//! pool when the owning [`PooledBuffer`] drops.
//!
//! Returned buffers are zeroed before they re-enter the pool: a pooled
//! buffer must never leak a previous query's bytes into a later request.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Statistics for the buffer pool
#[derive(Debug)]
pub struct BufferPoolStats {
    /// New buffer allocations (pool was empty)
    allocations: AtomicU64,
    /// Buffers reused from the pool
    reuses: AtomicU64,
    /// Buffers returned to the pool
    returns: AtomicU64,
    /// Buffers dropped because the pool was full
    drops: AtomicU64,
}

impl BufferPoolStats {
    fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// Get the number of allocations
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Get the number of reuses
    #[must_use]
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Get the number of returns
    #[must_use]
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }

    /// Get the number of drops
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all stats
    #[must_use]
    pub fn snapshot(&self) -> BufferPoolStatsSnapshot {
        BufferPoolStatsSnapshot {
            allocations: self.allocations(),
            reuses: self.reuses(),
            returns: self.returns(),
            drops: self.drops(),
        }
    }
}

/// Snapshot of buffer pool statistics
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolStatsSnapshot {
    /// New buffer allocations
    pub allocations: u64,
    /// Buffers reused from the pool
    pub reuses: u64,
    /// Buffers returned to the pool
    pub returns: u64,
    /// Buffers dropped (pool full)
    pub drops: u64,
}

/// Lock-free pool of fixed-size byte buffers
///
/// # Example
///
/// ```
/// use dns_sinkhole::buffer::BufferPool;
/// use std::sync::Arc;
///
/// let pool = Arc::new(BufferPool::new(64, 4096));
/// let buf = pool.get();
/// assert_eq!(buf.len(), 4096);
/// drop(buf); // returned to the pool, zeroed
/// assert_eq!(pool.stats().returns(), 1);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    stats: BufferPoolStats,
}

impl BufferPool {
    /// Create a pool holding up to `capacity` buffers of `buffer_size` bytes
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            stats: BufferPoolStats::new(),
        }
    }

    /// Get a buffer, reusing a pooled one when available
    ///
    /// The returned buffer always has length `buffer_size`. Pooled buffers
    /// were zeroed when they were returned.
    #[must_use]
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buffer = if let Some(buf) = self.buffers.pop() {
            self.stats.reuses.fetch_add(1, Ordering::Relaxed);
            buf
        } else {
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.buffer_size]
        };
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    /// Size of each buffer in bytes
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently idle in the pool
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    fn put_back(&self, mut buffer: Vec<u8>) {
        buffer.iter_mut().for_each(|b| *b = 0);
        buffer.resize(self.buffer_size, 0);
        if self.buffers.push(buffer).is_ok() {
            self.stats.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// RAII handle to a pooled buffer
///
/// Dereferences to `[u8]`; the buffer is zeroed and returned to its pool
/// on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.put_back(buffer);
        }
    }
}
