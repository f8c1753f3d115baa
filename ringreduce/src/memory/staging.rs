use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pool of host scratch buffers reused across collective calls.
///
/// Every segment that goes on the wire is encoded into a staging buffer, and
/// accelerator segments additionally bounce through one on their way to and
/// from device memory. Buffers whose capacity grew past four times the pool's
/// nominal capacity are dropped instead of returned.
pub struct StagingPool {
    queue: ArrayQueue<Vec<u8>>,
    capacity: usize,
    fresh_allocations: AtomicU64,
}

impl StagingPool {
    /// Create a pool pre-filled with `buffers` vectors of `capacity` bytes.
    pub fn new(buffers: usize, capacity: usize) -> Arc<Self> {
        let queue = ArrayQueue::new(buffers.max(1));
        for _ in 0..buffers {
            let _ = queue.push(Vec::with_capacity(capacity));
        }
        Arc::new(Self {
            queue,
            capacity,
            fresh_allocations: AtomicU64::new(0),
        })
    }

    /// Check out a zeroed buffer of `len` bytes.
    pub fn checkout(self: &Arc<Self>, len: usize) -> StagingBuf {
        let mut buf = match self.queue.pop() {
            Some(buf) => buf,
            None => {
                self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(len.max(self.capacity))
            }
        };
        buf.resize(len, 0);
        StagingBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Adopt a vector produced elsewhere (a received frame) so it is recycled
    /// into this pool when dropped.
    pub fn adopt(self: &Arc<Self>, buf: Vec<u8>) -> StagingBuf {
        StagingBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Number of checkouts that found the pool empty and had to allocate.
    pub fn fresh_allocations(&self) -> u64 {
        self.fresh_allocations.load(Ordering::Relaxed)
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() <= self.capacity.saturating_mul(4).max(64 * 1024) {
            buf.clear();
            let _ = self.queue.push(buf);
        }
    }
}

/// A buffer checked out from a [`StagingPool`]. Derefs to `[u8]` and returns
/// its storage to the pool on drop.
pub struct StagingBuf {
    buf: Vec<u8>,
    pool: Arc<StagingPool>,
}

impl StagingBuf {
    /// Resize in place, zero-filling any new bytes.
    pub fn resize(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }
}

impl Deref for StagingBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for StagingBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl AsRef<[u8]> for StagingBuf {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for StagingBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}
