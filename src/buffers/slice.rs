use core::{mem, num::NonZeroUsize};

use super::{
    Chunk,
    reader::{AdvanceableReader, DidntRead, HasReader, Reader},
    writer::{DidntWrite, HasWriter, Writer},
};

impl HasWriter for &mut [u8] {
    type Writer = Self;

    fn writer(self) -> Self::Writer {
        self
    }
}

impl Writer for &mut [u8] {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        let len = NonZeroUsize::new(bytes.len().min(self.len())).ok_or(DidntWrite)?;
        let (to_write, remain) = mem::take(self).split_at_mut(len.get());
        to_write.copy_from_slice(&bytes[..len.get()]);
        *self = remain;
        Ok(len)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        if self.len() < bytes.len() {
            return Err(DidntWrite);
        }
        let (to_write, remain) = mem::take(self).split_at_mut(bytes.len());
        to_write.copy_from_slice(bytes);
        *self = remain;
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.len()
    }
}

impl HasReader for &[u8] {
    type Reader = Self;

    fn reader(self) -> Self::Reader {
        self
    }
}

// Borrowed slices cannot be shared, so chunked reads copy.
impl Reader for &[u8] {
    fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead> {
        let len = NonZeroUsize::new(self.len().min(into.len())).ok_or(DidntRead)?;
        let (head, tail) = self.split_at(len.get());
        into[..len.get()].copy_from_slice(head);
        *self = tail;
        Ok(len)
    }

    fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead> {
        if self.len() < into.len() {
            return Err(DidntRead);
        }
        let (head, tail) = self.split_at(into.len());
        into.copy_from_slice(head);
        *self = tail;
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
        let mut buffer = vec![0u8; len];
        self.read_exact(&mut buffer)?;
        Ok(buffer.into())
    }
}

impl AdvanceableReader for &[u8] {
    fn skip(&mut self, offset: usize) -> Result<(), DidntRead> {
        *self = self.get(offset..).ok_or(DidntRead)?;
        Ok(())
    }
}
