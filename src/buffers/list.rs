use core::{fmt, num::NonZeroUsize, ops::RangeBounds};
use std::io;

use super::{
    Chunk,
    reader::{AdvanceableReader, DidntRead, HasReader, Reader},
};

/// An ordered list of non-contiguous [`Chunk`]s read as one byte stream.
///
/// Delivery payloads are carried as buffer lists: an incoming delivery split
/// over several Transfer frames is reassembled by pushing each frame's payload
/// view, and an outgoing payload is fragmented by slicing views off its
/// reader. Neither direction copies bytes.
///
/// ```
/// use std::io::Read;
///
/// use amqp_engine::BufferList;
///
/// let mut list = BufferList::new();
/// list.push(b"Hello ".to_vec().into());
/// list.push(b"World!".to_vec().into());
/// assert_eq!(list.len(), 12);
///
/// let mut text = String::new();
/// list.reader().read_to_string(&mut text).unwrap();
/// assert_eq!(text, "Hello World!");
/// ```
#[derive(Clone, Default)]
pub struct BufferList {
    chunks: Vec<Chunk>,
}

impl BufferList {
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn single(chunk: Chunk) -> Self {
        let mut list = Self::new();
        list.push(chunk);
        list
    }

    /// Total number of bytes across all segments.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Appends a segment. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Chunk) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Moves all segments of `other` to the end of `self`.
    pub fn append(&mut self, other: BufferList) {
        self.chunks.extend(other.chunks);
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter()
    }

    pub fn slices(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.chunks.iter().map(Chunk::as_slice)
    }

    /// Number of segments.
    pub fn segments(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the content as a single [`Chunk`].
    ///
    /// This is free for lists of zero or one segment and copies otherwise.
    pub fn to_chunk(&self) -> Chunk {
        match self.chunks.as_slice() {
            [] => Chunk::from(Vec::new()),
            [single] => single.clone(),
            _ => Chunk::from(self.to_vec()),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.len());
        for s in self.slices() {
            vec.extend_from_slice(s);
        }
        vec
    }

    /// Returns a zero-copy view over `range` of the stream.
    pub fn view<R: RangeBounds<usize>>(&self, range: R) -> Option<BufferList> {
        let len = self.len();
        let start = match range.start_bound() {
            core::ops::Bound::Included(&n) => n,
            core::ops::Bound::Excluded(&n) => n.checked_add(1)?,
            core::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            core::ops::Bound::Included(&n) => n.checked_add(1)?,
            core::ops::Bound::Excluded(&n) => n,
            core::ops::Bound::Unbounded => len,
        };
        if start > end || end > len {
            return None;
        }
        let mut reader = self.reader();
        reader.skip(start).ok()?;
        let mut view = BufferList::new();
        reader.read_chunks(end - start, |c| view.push(c)).ok()?;
        Some(view)
    }

    /// Returns a cursor over the list implementing [`io::Read`] and
    /// [`io::Seek`].
    pub fn reader(&self) -> BufferListReader<'_> {
        BufferListReader {
            inner: self,
            cursor: Cursor::default(),
        }
    }
}

impl PartialEq for BufferList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.slices().flatten().eq(other.slices().flatten())
    }
}

impl Eq for BufferList {}

impl fmt::Debug for BufferList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferList")
            .field("len", &self.len())
            .field("segments", &self.chunks.len())
            .finish()
    }
}

impl<T: Into<Chunk>> From<T> for BufferList {
    fn from(t: T) -> Self {
        BufferList::single(t.into())
    }
}

impl Extend<Chunk> for BufferList {
    fn extend<I: IntoIterator<Item = Chunk>>(&mut self, iter: I) {
        for c in iter {
            self.push(c);
        }
    }
}

impl FromIterator<Chunk> for BufferList {
    fn from_iter<I: IntoIterator<Item = Chunk>>(iter: I) -> Self {
        let mut list = BufferList::new();
        list.extend(iter);
        list
    }
}

/************************************ */
/* READER */
/************************************ */
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    segment: usize,
    offset: usize,
}

/// A stream cursor over a [`BufferList`].
///
/// Reads cross segment boundaries transparently; [`io::Seek`] positions are
/// absolute offsets into the concatenated stream.
#[derive(Debug, Clone)]
pub struct BufferListReader<'a> {
    inner: &'a BufferList,
    cursor: Cursor,
}

impl BufferListReader<'_> {
    fn position(&self) -> usize {
        self.inner.chunks[..self.cursor.segment].iter().map(Chunk::len).sum::<usize>() + self.cursor.offset
    }

    fn set_position(&mut self, mut pos: usize) -> bool {
        if pos > self.inner.len() {
            return false;
        }
        self.cursor = Cursor::default();
        for chunk in &self.inner.chunks {
            if pos < chunk.len() {
                self.cursor.offset = pos;
                return true;
            }
            pos -= chunk.len();
            self.cursor.segment += 1;
        }
        true
    }

    fn advance(&mut self, len: usize) {
        self.cursor.offset += len;
        if let Some(chunk) = self.inner.chunks.get(self.cursor.segment)
            && self.cursor.offset == chunk.len()
        {
            self.cursor.segment += 1;
            self.cursor.offset = 0;
        }
    }
}

impl<'a> HasReader for &'a BufferList {
    type Reader = BufferListReader<'a>;

    fn reader(self) -> Self::Reader {
        BufferList::reader(self)
    }
}

impl Reader for BufferListReader<'_> {
    fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead> {
        let mut read = 0;
        while read < into.len() {
            let Some(chunk) = self.inner.chunks.get(self.cursor.segment) else {
                break;
            };
            let from = &chunk.as_slice()[self.cursor.offset..];
            let len = from.len().min(into.len() - read);
            into[read..read + len].copy_from_slice(&from[..len]);
            read += len;
            self.advance(len);
        }
        NonZeroUsize::new(read).ok_or(DidntRead)
    }

    fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead> {
        if self.remaining() < into.len() {
            return Err(DidntRead);
        }
        if into.is_empty() {
            return Ok(());
        }
        Reader::read(self, into).map(|_| ())
    }

    fn remaining(&self) -> usize {
        self.inner.chunks[self.cursor.segment.min(self.inner.chunks.len())..]
            .iter()
            .map(Chunk::len)
            .sum::<usize>()
            - self.cursor.offset
    }

    fn read_chunks<F: FnMut(Chunk)>(&mut self, mut len: usize, mut f: F) -> Result<(), DidntRead> {
        if self.remaining() < len {
            return Err(DidntRead);
        }
        while len > 0 {
            let chunk = &self.inner.chunks[self.cursor.segment];
            let take = (chunk.len() - self.cursor.offset).min(len);
            let view = chunk
                .view(self.cursor.offset..self.cursor.offset + take)
                .ok_or(DidntRead)?;
            self.advance(take);
            len -= take;
            f(view);
        }
        Ok(())
    }

    fn read_chunk(&mut self, len: usize) -> Result<Chunk, DidntRead> {
        let chunk = self.inner.chunks.get(self.cursor.segment).ok_or(DidntRead)?;
        if chunk.len() - self.cursor.offset >= len {
            let view = chunk
                .view(self.cursor.offset..self.cursor.offset + len)
                .ok_or(DidntRead)?;
            self.advance(len);
            Ok(view)
        } else {
            // Spans segments: the only case that copies.
            let mut buffer = vec![0u8; len];
            Reader::read_exact(self, &mut buffer)?;
            Ok(buffer.into())
        }
    }
}

impl AdvanceableReader for BufferListReader<'_> {
    fn skip(&mut self, offset: usize) -> Result<(), DidntRead> {
        let pos = self.position() + offset;
        if self.set_position(pos) { Ok(()) } else { Err(DidntRead) }
    }
}

impl io::Read for BufferListReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(<Self as Reader>::read(self, buf).map_or(0, NonZeroUsize::get))
    }
}

impl io::Seek for BufferListReader<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(s) => i128::from(s),
            io::SeekFrom::Current(s) => self.position() as i128 + i128::from(s),
            io::SeekFrom::End(s) => self.inner.len() as i128 + i128::from(s),
        };
        let target = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"))?;
        if self.set_position(target) {
            Ok(target as u64)
        } else {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "seek past end of stream"))
        }
    }
}

#[cfg(test)]
impl BufferList {
    /// Random payload split at random points into segments.
    pub(crate) fn rand(len: usize) -> Self {
        use rand::Rng;

        let mut rng = rand::rng();
        let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let mut list = BufferList::new();
        let mut start = 0;
        while start < len {
            let end = rng.random_range(start + 1..=len);
            list.push(data[start..end].to_vec().into());
            start = end;
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;

    fn three_segments() -> BufferList {
        [b"abc".to_vec(), b"defg".to_vec(), b"hi".to_vec()]
            .into_iter()
            .map(Chunk::from)
            .collect()
    }

    #[test]
    fn reads_across_segments() {
        let list = three_segments();
        assert_eq!(list.len(), 9);
        assert_eq!(list.segments(), 3);

        let mut reader = list.reader();
        let mut buf = [0u8; 5];
        Reader::read_exact(&mut reader, &mut buf).unwrap();
        assert_eq!(&buf, b"abcde");
        assert_eq!(reader.remaining(), 4);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"fghi");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn read_chunks_hands_out_views() {
        let list = three_segments();
        let mut reader = list.reader();
        reader.skip(2).unwrap();

        let mut views = Vec::new();
        reader.read_chunks(5, |c| views.push(c)).unwrap();
        let lens: Vec<usize> = views.iter().map(Chunk::len).collect();
        assert_eq!(lens, vec![1, 4]);
        assert!(views[1].shares_storage(list.chunks().nth(1).unwrap()));
        assert!(reader.read_chunks(3, |_| ()).is_err());
    }

    #[test]
    fn read_chunk_copies_only_when_spanning() {
        let list = three_segments();
        let mut reader = list.reader();
        let first = reader.read_chunk(2).unwrap();
        assert!(first.shares_storage(list.chunks().next().unwrap()));
        let spanning = reader.read_chunk(3).unwrap();
        assert_eq!(spanning.as_slice(), b"cde");
        assert_eq!(spanning.ref_count(), 1);
    }

    #[test]
    fn seek_is_absolute() {
        let list = three_segments();
        let mut reader = list.reader();
        assert_eq!(reader.seek(SeekFrom::Start(7)).unwrap(), 7);
        assert_eq!(reader.read_u8().unwrap(), b'h');
        assert_eq!(reader.seek(SeekFrom::Current(-5)).unwrap(), 3);
        assert_eq!(reader.read_u8().unwrap(), b'd');
        assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 9);
        assert!(!reader.can_read());
        assert!(reader.seek(SeekFrom::Current(-10)).is_err());
        assert!(reader.seek(SeekFrom::Start(10)).is_err());
    }

    #[test]
    fn view_and_equality() {
        let list = three_segments();
        let view = list.view(2..8).unwrap();
        assert_eq!(view.to_vec(), b"cdefgh");
        assert_eq!(view, BufferList::from(b"cdefgh".to_vec()));
        assert!(list.view(4..10).is_none());

        let random = BufferList::rand(1024);
        assert_eq!(random.len(), 1024);
        assert_eq!(BufferList::from(random.to_vec()), random);
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let mut list = BufferList::new();
        list.push(Vec::new().into());
        assert!(list.is_empty());
        assert_eq!(list.to_chunk().len(), 0);
    }
}
