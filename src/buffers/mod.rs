mod boxbuf;
pub(crate) mod byte_buffer;
pub(crate) mod chunk;
pub(crate) mod list;
pub(crate) mod pool;
mod slice;
mod vec;

pub(crate) use boxbuf::*;
pub use byte_buffer::*;
pub use chunk::*;
pub use list::*;
pub use pool::*;

/// Traits for writing data to buffers.
pub(crate) mod writer {
    use core::num::NonZeroUsize;

    use super::Chunk;

    /// Error type indicating a write operation failed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DidntWrite;

    /// A trait for writing bytes into a buffer.
    pub(crate) trait Writer {
        /// Writes as many bytes as possible from `bytes` into the buffer.
        ///
        /// # Errors
        ///
        /// Returns `DidntWrite` if no bytes could be written.
        fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite>;

        /// Writes all bytes from `bytes` into the buffer, or none of them.
        ///
        /// # Errors
        ///
        /// Returns `DidntWrite` if the buffer has insufficient space.
        fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite>;

        /// Returns the number of bytes that can still be written.
        fn remaining(&self) -> usize;

        fn write_u8(&mut self, byte: u8) -> Result<(), DidntWrite> {
            self.write_exact(core::slice::from_ref(&byte))
        }

        fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), DidntWrite> {
            self.write_exact(chunk.as_slice())
        }

        #[allow(unused)]
        fn can_write(&self) -> bool {
            self.remaining() != 0
        }
    }

    /// A trait for types that can provide a writer.
    pub(crate) trait HasWriter {
        type Writer: Writer;

        /// Returns the most appropriate writer for `self`.
        fn writer(self) -> Self::Writer;
    }
}

/// Traits for reading data from buffers.
pub(crate) mod reader {
    use core::num::NonZeroUsize;

    use super::Chunk;

    /// Error type indicating a read operation failed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DidntRead;

    /// A trait for reading bytes from a buffer.
    ///
    /// Implementations backed by reference-counted storage hand out
    /// [`Chunk`]s without copying from [`Reader::read_chunk`] and
    /// [`Reader::read_chunks`].
    pub(crate) trait Reader {
        /// Reads as many bytes as possible into `into`.
        ///
        /// # Errors
        ///
        /// Returns `DidntRead` if no bytes could be read.
        fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead>;

        /// Reads exactly enough bytes to fill `into`.
        ///
        /// # Errors
        ///
        /// Returns `DidntRead` if the buffer has insufficient data. Nothing is
        /// consumed in that case.
        fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead>;

        /// Returns the number of bytes remaining to be read.
        fn remaining(&self) -> usize;

        /// Reads exactly `len` bytes and passes them as `Chunk`s to the closure.
        ///
        /// Readers over several segments may invoke the closure more than once;
        /// the total length handed out is always `len`.
        fn read_chunks<F: FnMut(Chunk)>(&mut self, len: usize, for_each_chunk: F) -> Result<(), DidntRead>;

        /// Reads exactly `len` bytes as a single `Chunk`.
        fn read_chunk(&mut self, len: usize) -> Result<Chunk, DidntRead>;

        fn read_u8(&mut self) -> Result<u8, DidntRead> {
            let mut byte = 0;
            self.read_exact(core::slice::from_mut(&mut byte))?;
            Ok(byte)
        }

        fn can_read(&self) -> bool {
            self.remaining() != 0
        }
    }

    /// A reader that can skip bytes without handing them out.
    pub(crate) trait AdvanceableReader: Reader {
        /// Skips forward by `offset` bytes.
        ///
        /// # Errors
        ///
        /// Returns `DidntRead` if `offset` exceeds the remaining bytes.
        fn skip(&mut self, offset: usize) -> Result<(), DidntRead>;
    }

    /// A trait for types that can provide a reader.
    pub(crate) trait HasReader {
        type Reader: Reader;

        /// Returns the most appropriate reader for `self`.
        fn reader(self) -> Self::Reader;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        reader::{HasReader, Reader},
        writer::{HasWriter, Writer},
        *,
    };

    const PAYLOAD: &[u8] = b"amqp-frame-body";

    fn write_payload<W: Writer>(mut writer: W) {
        assert!(writer.can_write());
        writer.write_exact(PAYLOAD).unwrap();
        writer.write_u8(0x40).unwrap();
    }

    #[test]
    fn vec_writer_grows() {
        let mut vec = Vec::new();
        write_payload(&mut vec);
        assert_eq!(&vec[..PAYLOAD.len()], PAYLOAD);
        assert_eq!(vec.last(), Some(&0x40));
    }

    #[test]
    fn slice_writer_is_bounded() {
        let mut storage = [0u8; 4];
        let mut writer = storage.as_mut_slice();
        assert!(writer.write_exact(PAYLOAD).is_err());
        assert_eq!(writer.remaining(), 4, "a failed write_exact consumes nothing");
        assert_eq!(writer.write(PAYLOAD).unwrap().get(), 4);
        assert!(!writer.can_write());
        assert_eq!(&storage, b"amqp");
    }

    #[test]
    fn boxbuf_writer_is_bounded() {
        let mut bbuf = BoxBuf::with_capacity(PAYLOAD.len() + 1);
        write_payload(&mut bbuf);
        assert!(bbuf.writer().write_u8(0).is_err());
        assert_eq!(bbuf.len(), PAYLOAD.len() + 1);
    }

    #[test]
    fn slice_reader_consumes() {
        let mut reader = PAYLOAD;
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"amqp");
        assert_eq!(reader.remaining(), PAYLOAD.len() - 4);
        let mut rest = vec![0u8; 64];
        assert!(reader.read_exact(&mut rest).is_err());
        let n = reader.read(&mut rest).unwrap().get();
        assert_eq!(&rest[..n], b"-frame-body");
        assert!(!reader.can_read());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn chunk_reader_is_zero_copy() {
        let chunk: Chunk = PAYLOAD.to_vec().into();
        let mut reader = chunk.clone();
        let head = reader.read_chunk(4).unwrap();
        assert_eq!(head.as_slice(), b"amqp");
        assert!(head.shares_storage(&chunk));
        let mut pieces = Vec::new();
        (&mut reader).read_chunks(6, |c| pieces.push(c)).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].as_slice(), b"-frame");
        assert_eq!((&chunk).reader().remaining(), PAYLOAD.len());
    }
}
