use core::num::NonZeroUsize;

use super::writer::{DidntWrite, HasWriter, Writer};

impl HasWriter for &mut Vec<u8> {
    type Writer = Self;

    fn writer(self) -> Self::Writer {
        self
    }
}

// Vectors grow on demand, so writes only fail for empty input.
impl Writer for &mut Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        let len = NonZeroUsize::new(bytes.len()).ok_or(DidntWrite)?;
        self.extend_from_slice(bytes);
        Ok(len)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn remaining(&self) -> usize {
        isize::MAX as usize - self.len()
    }
}
