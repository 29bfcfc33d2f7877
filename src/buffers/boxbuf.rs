use core::{fmt, num::NonZeroUsize};

use super::writer::{DidntWrite, HasWriter, Writer};

/// A fixed-capacity, reusable byte buffer.
///
/// The I/O writer copies small frames into one `BoxBuf` so that a run of
/// queued frames goes out in a single write call; [`clear`](Self::clear)
/// resets it without reallocating.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct BoxBuf {
    buffer: Box<[u8]>,
    len: usize,
}

impl BoxBuf {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Debug for BoxBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BoxBuf[{}/{}]", self.len, self.capacity())
    }
}

impl HasWriter for &mut BoxBuf {
    type Writer = Self;

    fn writer(self) -> Self::Writer {
        self
    }
}

impl Writer for &mut BoxBuf {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        let len = NonZeroUsize::new(bytes.len().min(self.remaining())).ok_or(DidntWrite)?;
        let start = self.len;
        self.buffer[start..start + len.get()].copy_from_slice(&bytes[..len.get()]);
        self.len += len.get();
        Ok(len)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        if bytes.len() > self.remaining() {
            return Err(DidntWrite);
        }
        let start = self.len;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_keeps_capacity() {
        let mut bbuf = BoxBuf::with_capacity(8);
        let mut w = bbuf.writer();
        w.write_exact(&[1, 2, 3]).unwrap();
        assert_eq!(w.write(&[4, 5, 6, 7, 8, 9]).unwrap().get(), 5);
        assert!(w.write(&[10]).is_err());
        assert_eq!(bbuf.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        bbuf.clear();
        assert!(bbuf.is_empty());
        assert_eq!(bbuf.capacity(), 8);
    }
}
