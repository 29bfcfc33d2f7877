use std::sync::Arc;

use parking_lot::Mutex;

use super::{ByteBuffer, byte_buffer::Segment};

pub(crate) struct PoolShared {
    segment_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl PoolShared {
    pub(crate) fn put(&self, data: Vec<u8>) {
        if data.len() != self.segment_size {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(data);
        }
    }
}

/// A pool of fixed-size buffer segments.
///
/// [`take`](Self::take) hands out a [`ByteBuffer`] backed by a recycled
/// segment when the request fits one. The segment comes back to the pool once
/// the buffer and every [`Chunk`](crate::Chunk) sliced from it are dropped,
/// so frames read from the network reuse storage without any explicit
/// release call. Requests larger than a segment get a dedicated allocation.
///
/// ```
/// use amqp_engine::BufferPool;
///
/// let pool = BufferPool::new(1024, 8);
/// let buffer = pool.take(100);
/// assert!(buffer.capacity() >= 100);
/// drop(buffer);
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Creates a pool of `segment_size`-byte segments keeping at most
    /// `capacity` idle segments.
    pub fn new(segment_size: usize, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                segment_size,
                capacity,
                free: Mutex::new(Vec::with_capacity(capacity)),
            }),
        }
    }

    /// Returns an empty buffer able to hold at least `len` bytes.
    pub fn take(&self, len: usize) -> ByteBuffer {
        if len > self.shared.segment_size {
            return ByteBuffer::with_capacity(len);
        }
        let data = self
            .shared
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.shared.segment_size]);
        ByteBuffer::from_segment(Segment::new(data, Some(Arc::downgrade(&self.shared))))
    }

    pub fn segment_size(&self) -> usize {
        self.shared.segment_size
    }

    /// Number of idle segments ready for reuse.
    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16 * 1024, 64)
    }
}
