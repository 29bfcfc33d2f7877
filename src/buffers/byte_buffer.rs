use core::{fmt, mem, num::NonZeroUsize};
use std::{
    any::Any,
    sync::{Arc, Weak},
};

use thiserror::Error;

use super::{
    Chunk, DynBuf,
    pool::PoolShared,
    reader::{AdvanceableReader, DidntRead, Reader},
    writer::{DidntWrite, HasWriter, Writer},
};

/// Error returned by operations that need to resize or write a [`ByteBuffer`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The storage is referenced by another buffer or by a [`Chunk`] view.
    ///
    /// Shared storage is never resized or written in place; drop the other
    /// references (or copy) first.
    #[error("buffer storage is shared by {0} references")]
    Shared(usize),

    /// The buffer is a read-only slice of a larger buffer.
    #[error("buffer is a read-only slice")]
    ReadOnly,
}

/// Backing storage of a [`ByteBuffer`].
///
/// Pooled segments go back to their [`BufferPool`](super::BufferPool) when the
/// last reference is dropped.
pub(crate) struct Segment {
    data: Vec<u8>,
    pool: Option<Weak<PoolShared>>,
}

impl Segment {
    pub(crate) fn new(data: Vec<u8>, pool: Option<Weak<PoolShared>>) -> Self {
        Self { data, pool }
    }
}

impl DynBuf for Segment {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) {
            pool.put(mem::take(&mut self.data));
        }
    }
}

/// A reference-counted byte region with `start`, `read`, `write` and `end`
/// cursors.
///
/// ```text
///   start        read           write            end
///     |  consumed  |   readable    |   writable    |
/// ```
///
/// Writes append at `write`; reads consume from `read`. Cloning a buffer (or
/// slicing a [`Chunk`] off it) adds a reference to the same storage. Growth
/// and in-place writes require the storage to be exclusively owned and fail
/// with [`BufferError::Shared`] otherwise.
pub struct ByteBuffer {
    seg: Arc<Segment>,
    start: usize,
    read: usize,
    write: usize,
    end: usize,
}

impl ByteBuffer {
    /// Creates an empty, unpooled buffer able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_segment(Segment::new(vec![0u8; capacity], None))
    }

    pub(crate) fn from_segment(seg: Segment) -> Self {
        let end = seg.data.len();
        Self {
            seg: Arc::new(seg),
            start: 0,
            read: 0,
            write: 0,
            end,
        }
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Number of bytes that can be appended without growing.
    pub fn writable(&self) -> usize {
        self.end - self.write
    }

    /// Number of live references to the storage, including [`Chunk`] views.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.seg)
    }

    pub fn is_exclusive(&self) -> bool {
        self.ref_count() == 1
    }

    /// Returns the readable region.
    pub fn as_slice(&self) -> &[u8] {
        &self.seg.data[self.read..self.write]
    }

    /// Returns a read-only buffer over `len` readable bytes starting `offset`
    /// bytes past the read cursor, sharing this buffer's storage.
    pub fn slice(&self, offset: usize, len: usize) -> Option<ByteBuffer> {
        let start = self.read.checked_add(offset)?;
        let end = start.checked_add(len)?;
        (end <= self.write).then(|| ByteBuffer {
            seg: self.seg.clone(),
            start,
            read: start,
            write: end,
            end,
        })
    }

    /// Grows the writable region by at least `additional` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the storage is shared or if this buffer is a slice.
    pub fn grow(&mut self, additional: usize) -> Result<(), BufferError> {
        if self.start != 0 || self.end != self.seg.data.len() {
            return Err(BufferError::ReadOnly);
        }
        let refs = self.ref_count();
        let seg = Arc::get_mut(&mut self.seg).ok_or(BufferError::Shared(refs))?;
        let new_len = (self.end * 2).max(self.write + additional);
        seg.data.resize(new_len, 0);
        // A resized segment no longer matches the pool's segment size.
        seg.pool = None;
        self.end = new_len;
        Ok(())
    }

    /// Resets both cursors to the start so the storage can be refilled.
    ///
    /// # Errors
    ///
    /// Fails if the storage is shared.
    pub fn reset(&mut self) -> Result<(), BufferError> {
        if !self.is_exclusive() {
            return Err(BufferError::Shared(self.ref_count()));
        }
        self.read = self.start;
        self.write = self.start;
        Ok(())
    }

    /// Returns `len` writable bytes past the write cursor, growing if needed.
    /// Call [`commit`](Self::commit) once they are filled.
    pub(crate) fn unfilled_mut(&mut self, len: usize) -> Result<&mut [u8], BufferError> {
        if self.writable() < len {
            self.grow(len - self.writable())?;
        }
        if self.start != 0 || self.end != self.seg.data.len() {
            return Err(BufferError::ReadOnly);
        }
        let refs = self.ref_count();
        let write = self.write;
        let seg = Arc::get_mut(&mut self.seg).ok_or(BufferError::Shared(refs))?;
        Ok(&mut seg.data[write..write + len])
    }

    /// Marks `len` bytes handed out by [`unfilled_mut`](Self::unfilled_mut) as
    /// written.
    pub(crate) fn commit(&mut self, len: usize) {
        debug_assert!(self.write + len <= self.end);
        self.write = (self.write + len).min(self.end);
    }

    /// Freezes the readable region into a [`Chunk`] sharing this storage.
    pub fn into_chunk(self) -> Chunk {
        let (read, write) = (self.read, self.write);
        let buf: Arc<dyn DynBuf> = self.seg;
        // In bounds: read <= write <= end <= storage length.
        Chunk::new(buf, read, write).unwrap_or_else(|_| Chunk::from(Vec::new()))
    }
}

impl Clone for ByteBuffer {
    /// Adds a reference to the same storage. The clone has its own cursors.
    fn clone(&self) -> Self {
        Self {
            seg: self.seg.clone(),
            start: self.start,
            read: self.read,
            write: self.write,
            end: self.end,
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("start", &self.start)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("end", &self.end)
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl HasWriter for &mut ByteBuffer {
    type Writer = Self;

    fn writer(self) -> Self::Writer {
        self
    }
}

impl Writer for &mut ByteBuffer {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        let len = NonZeroUsize::new(bytes.len()).ok_or(DidntWrite)?;
        self.write_exact(bytes)?;
        Ok(len)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        let slot = self.unfilled_mut(bytes.len()).map_err(|_| DidntWrite)?;
        slot.copy_from_slice(bytes);
        self.commit(bytes.len());
        Ok(())
    }

    fn remaining(&self) -> usize {
        if self.is_exclusive() && self.start == 0 {
            isize::MAX as usize - self.write
        } else {
            0
        }
    }
}

impl Reader for ByteBuffer {
    fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead> {
        let len = NonZeroUsize::new(self.len().min(into.len())).ok_or(DidntRead)?;
        into[..len.get()].copy_from_slice(&self.as_slice()[..len.get()]);
        self.read += len.get();
        Ok(len)
    }

    fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead> {
        if self.len() < into.len() {
            return Err(DidntRead);
        }
        into.copy_from_slice(&self.as_slice()[..into.len()]);
        self.read += into.len();
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    fn read_chunks<F: FnMut(Chunk)>(&mut self, len: usize, mut f: F) -> Result<(), DidntRead> {
        f(self.read_chunk(len)?);
        Ok(())
    }

    fn read_chunk(&mut self, len: usize) -> Result<Chunk, DidntRead> {
        if self.len() < len {
            return Err(DidntRead);
        }
        let buf: Arc<dyn DynBuf> = self.seg.clone();
        let chunk = Chunk::new(buf, self.read, self.read + len).map_err(|_| DidntRead)?;
        self.read += len;
        Ok(chunk)
    }
}

impl AdvanceableReader for ByteBuffer {
    fn skip(&mut self, offset: usize) -> Result<(), DidntRead> {
        if offset > self.len() {
            return Err(DidntRead);
        }
        self.read += offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_when_exclusive() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.writer().write_exact(b"AMQP").unwrap();
        assert_eq!(buf.writable(), 0);
        buf.writer().write_exact(&[0, 1, 0, 0]).unwrap();
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.as_slice(), b"AMQP\x00\x01\x00\x00");
    }

    #[test]
    fn shared_buffer_never_resizes() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.writer().write_exact(b"abcd").unwrap();

        let view = buf.clone().into_chunk();
        assert_eq!(buf.ref_count(), 2);
        assert_eq!(buf.grow(16), Err(BufferError::Shared(2)));
        assert!(buf.writer().write_u8(b'e').is_err());
        assert_eq!(buf.capacity(), 4);

        drop(view);
        assert!(buf.is_exclusive());
        buf.grow(16).unwrap();
        buf.writer().write_u8(b'e').unwrap();
        assert_eq!(buf.as_slice(), b"abcde");
    }

    #[test]
    fn zero_copy_reads_add_references() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.writer().write_exact(b"headerpayload").unwrap();

        buf.skip(6).unwrap();
        let payload = buf.read_chunk(7).unwrap();
        assert_eq!(payload.as_slice(), b"payload");
        assert_eq!(buf.ref_count(), 2);
        assert!(buf.is_empty());
        assert!(buf.read_chunk(1).is_err());

        drop(payload);
        assert_eq!(buf.ref_count(), 1);
        buf.reset().unwrap();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn slices_are_read_only() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.writer().write_exact(b"01234567").unwrap();

        let mut slice = buf.slice(2, 3).unwrap();
        assert_eq!(slice.as_slice(), b"234");
        assert_eq!(slice.grow(1), Err(BufferError::ReadOnly));
        assert!(buf.slice(6, 3).is_none());
        assert_eq!(slice.read_u8().unwrap(), b'2');
        assert_eq!(slice.len(), 2);
    }
}
