use core::{
    fmt,
    num::NonZeroUsize,
    ops::{Bound, Deref, RangeBounds},
};
use std::{any::Any, sync::Arc};

use super::reader::{AdvanceableReader, DidntRead, HasReader, Reader};

/************************************ */
/* DYN BUFFER */
/************************************ */
/// Storage that can back a [`Chunk`].
///
/// Implemented for the usual owned byte containers and for the pooled
/// segments handed out by [`BufferPool`](crate::BufferPool). Implementors must
/// return `self` from [`DynBuf::as_any`] so [`Chunk::downcast_ref`] can recover
/// the concrete type.
pub trait DynBuf: Send + Sync {
    /// Returns the whole backing storage.
    fn as_slice(&self) -> &[u8];

    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

macro_rules! impl_dynbuf {
    ($($ty:ty => |$s:ident| $body:expr),* $(,)?) => {
        $(
            impl DynBuf for $ty {
                fn as_slice(&self) -> &[u8] {
                    let $s = self;
                    $body
                }

                fn as_any(&self) -> &dyn Any {
                    self
                }
            }
        )*
    };
}

impl_dynbuf! {
    Vec<u8> => |s| s,
    Box<[u8]> => |s| s,
    &'static [u8] => |s| s,
    String => |s| s.as_bytes(),
    &'static str => |s| s.as_bytes(),
}

impl<const N: usize> DynBuf for [u8; N] {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/************************************ */
/* CHUNK */
/************************************ */
/// A cheaply cloneable, immutable view over a reference-counted byte region.
///
/// Every clone and every [`view`](Chunk::view) shares the same storage and
/// holds one reference to it; the storage is released (or returned to its
/// pool) when the last view is dropped. Frame payloads received from the
/// network are handed to the application as chunks of the frame buffer, so a
/// delivery is reassembled without copying.
///
/// ```
/// use amqp_engine::Chunk;
///
/// let chunk: Chunk = vec![0, 1, 2, 3, 4, 5].into();
/// let view = chunk.view(2..5).unwrap();
/// assert_eq!(view.as_slice(), &[2, 3, 4]);
/// assert_eq!(view.view(1..).unwrap().as_slice(), &[3, 4]);
/// ```
#[derive(Clone)]
pub struct Chunk {
    buf: Arc<dyn DynBuf>,
    start: usize,
    end: usize,
}

impl Chunk {
    /// Creates a chunk over `buf[start..end]`.
    ///
    /// # Errors
    ///
    /// Returns the buffer back if the range is out of bounds.
    pub fn new(buf: Arc<dyn DynBuf>, start: usize, end: usize) -> Result<Chunk, Arc<dyn DynBuf>> {
        if start <= end && end <= buf.as_slice().len() {
            Ok(Self { buf, start, end })
        } else {
            Err(buf)
        }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf.as_slice()[self.start..self.end]
    }

    /// Returns the concrete backing storage, if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.buf.as_any().downcast_ref()
    }

    /// Creates a view into a subrange of this chunk, relative to its start.
    ///
    /// Returns `None` if the range is out of bounds.
    #[must_use]
    pub fn view<R: RangeBounds<usize>>(&self, range: R) -> Option<Chunk> {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.checked_add(1)?,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&n) => n.checked_add(1)?,
            Bound::Excluded(&n) => n,
            Bound::Unbounded => self.len(),
        };
        (start <= end && end <= self.len()).then(|| Chunk {
            buf: self.buf.clone(),
            start: self.start + start,
            end: self.start + end,
        })
    }

    /// Returns the number of live references to the backing storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    /// Returns `true` if both chunks are views over the same storage.
    pub fn shares_storage(&self, other: &Chunk) -> bool {
        core::ptr::addr_eq(Arc::as_ptr(&self.buf), Arc::as_ptr(&other.buf))
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Chunk {}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk[{}]{{", self.len())?;
        for b in self.as_slice().iter().take(32) {
            write!(f, "{b:02x}")?;
        }
        if self.len() > 32 {
            f.write_str("..")?;
        }
        f.write_str("}")
    }
}

impl<T: DynBuf + 'static> From<Arc<T>> for Chunk {
    fn from(buf: Arc<T>) -> Self {
        let end = buf.as_slice().len();
        Self { buf, start: 0, end }
    }
}

impl<T: DynBuf + 'static> From<T> for Chunk {
    fn from(buf: T) -> Self {
        Self::from(Arc::new(buf))
    }
}

// Reader
impl HasReader for &Chunk {
    type Reader = Chunk;

    fn reader(self) -> Self::Reader {
        self.clone()
    }
}

impl Reader for Chunk {
    fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead> {
        let len = self.len().min(into.len());
        into[..len].copy_from_slice(&self.as_slice()[..len]);
        self.start += len;
        NonZeroUsize::new(len).ok_or(DidntRead)
    }

    fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead> {
        if self.len() < into.len() {
            return Err(DidntRead);
        }
        let len = into.len();
        into.copy_from_slice(&self.as_slice()[..len]);
        self.start += len;
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
        let chunk = self.view(..len).ok_or(DidntRead)?;
        self.start += len;
        Ok(chunk)
    }
}

impl AdvanceableReader for Chunk {
    fn skip(&mut self, offset: usize) -> Result<(), DidntRead> {
        if offset > self.len() {
            return Err(DidntRead);
        }
        self.start += offset;
        Ok(())
    }
}
