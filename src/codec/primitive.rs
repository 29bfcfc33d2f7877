use super::{AmqpCodec, LCodec, RCodec, WCodec};
use crate::buffers::{
    reader::{DidntRead, Reader},
    writer::{DidntWrite, Writer},
};

// Fixed-width, network byte order.
macro_rules! impl_be {
    ($($ty:ty),*) => {
        $(
            impl LCodec<$ty> for AmqpCodec {
                fn w_len(self, _x: $ty) -> usize {
                    size_of::<$ty>()
                }
            }

            impl<W> WCodec<$ty, &mut W> for AmqpCodec
            where
                W: Writer,
            {
                type Output = Result<(), DidntWrite>;

                fn write(self, writer: &mut W, x: $ty) -> Self::Output {
                    writer.write_exact(&x.to_be_bytes())
                }
            }

            impl<R> RCodec<$ty, &mut R> for AmqpCodec
            where
                R: Reader,
            {
                type Error = DidntRead;

                fn read(self, reader: &mut R) -> Result<$ty, Self::Error> {
                    let mut bytes = [0u8; size_of::<$ty>()];
                    reader.read_exact(&mut bytes)?;
                    Ok(<$ty>::from_be_bytes(bytes))
                }
            }
        )*
    };
}

impl_be!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl<R> RCodec<[u8; 16], &mut R> for AmqpCodec
where
    R: Reader,
{
    type Error = DidntRead;

    fn read(self, reader: &mut R) -> Result<[u8; 16], Self::Error> {
        let mut bytes = [0u8; 16];
        reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

/// Reads `len` bytes, refusing lengths the input cannot hold before
/// allocating.
pub(super) fn read_bytes<R: Reader>(reader: &mut R, len: usize) -> Result<Vec<u8>, DidntRead> {
    if reader.remaining() < len {
        return Err(DidntRead);
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
