//! Encoding of the AMQP type system subset used by performatives, and of
//! frames on top of it.
//!
//! Encoders write into any [`Writer`](crate::buffers::writer::Writer) and
//! decoders read from any [`Reader`](crate::buffers::reader::Reader), so the
//! same code serves contiguous buffers and segmented [`BufferList`]s.
//!
//! [`BufferList`]: crate::buffers::BufferList
pub(crate) mod frame;
pub(crate) mod performative;
mod primitive;
pub(crate) mod value;

pub(crate) trait WCodec<Message, Buffer> {
    type Output;
    fn write(self, buffer: Buffer, message: Message) -> Self::Output;
}

pub(crate) trait RCodec<Message, Buffer> {
    type Error;
    fn read(self, buffer: Buffer) -> Result<Message, Self::Error>;
}

// Calculate the length of the value once serialized
pub(crate) trait LCodec<Message> {
    fn w_len(self, message: Message) -> usize;
}

#[derive(Clone, Copy)]
pub(crate) struct AmqpCodec {
    /// Remaining nesting allowed while decoding compound values.
    depth: u8,
}

impl Default for AmqpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AmqpCodec {
    const MAX_DEPTH: u8 = 32;

    pub(crate) const fn new() -> Self {
        Self {
            depth: Self::MAX_DEPTH,
        }
    }

    fn nested(self) -> Option<Self> {
        self.depth.checked_sub(1).map(|depth| Self { depth })
    }
}

#[cfg(test)]
mod tests {
    use rand::{
        Rng,
        distr::{Alphanumeric, SampleString},
    };

    use super::*;
    use crate::{
        buffers::{
            BoxBuf, BufferList, Chunk,
            reader::{HasReader, Reader},
            writer::HasWriter,
        },
        protocol::{Descriptor, Symbol, Value},
    };

    const NUM_ITER: usize = 50;

    fn rand_scalar(rng: &mut impl Rng) -> Value {
        match rng.random_range(0..14) {
            0 => Value::Null,
            1 => Value::Bool(rng.random()),
            2 => Value::UByte(rng.random()),
            3 => Value::UShort(rng.random()),
            4 => Value::UInt(if rng.random_bool(0.5) { rng.random_range(0..256) } else { rng.random() }),
            5 => Value::ULong(if rng.random_bool(0.5) { 0 } else { rng.random() }),
            6 => Value::Int(rng.random()),
            7 => Value::Long(rng.random()),
            8 => Value::Timestamp(rng.random()),
            9 => Value::Uuid(rng.random()),
            10 => {
                let len = if rng.random_bool(0.1) { 300 } else { rng.random_range(0..16) };
                Value::Binary((0..len).map(|_| rng.random()).collect())
            }
            11 => {
                let len = rng.random_range(0..16);
                Value::String(Alphanumeric.sample_string(rng, len))
            }
            12 => {
                let len = rng.random_range(1..16);
                Value::Symbol(Symbol::from(Alphanumeric.sample_string(rng, len)))
            }
            _ => Value::Double(rng.random()),
        }
    }

    fn rand_value(rng: &mut impl Rng, depth: usize) -> Value {
        if depth == 0 {
            return rand_scalar(rng);
        }
        match rng.random_range(0..5) {
            0 => Value::List((0..rng.random_range(0..6)).map(|_| rand_value(rng, depth - 1)).collect()),
            1 => Value::Map(
                (0..rng.random_range(0..4))
                    .map(|_| (rand_scalar(rng), rand_value(rng, depth - 1)))
                    .collect(),
            ),
            2 => Value::Array((0..rng.random_range(1..5)).map(|i| Value::UInt(i * 1000)).collect()),
            3 => Value::Described(
                Box::new(Descriptor::Code(rng.random_range(0..0x40))),
                Box::new(rand_value(rng, depth - 1)),
            ),
            _ => rand_scalar(rng),
        }
    }

    fn check(value: &Value) {
        let codec = AmqpCodec::new();

        let mut buffer = vec![];
        codec.write(&mut buffer.writer(), value).unwrap();
        assert_eq!(buffer.len(), codec.w_len(value), "w_len of {value:?}");

        let mut reader = buffer.reader();
        let decoded: Value = codec.read(&mut reader).unwrap();
        assert_eq!(&decoded, value);
        assert!(!reader.can_read());

        // Same bytes, split one byte per segment.
        let list: BufferList = buffer.iter().map(|b| Chunk::from(vec![*b])).collect();
        let mut reader = list.reader();
        let decoded: Value = codec.read(&mut reader).unwrap();
        assert_eq!(&decoded, value);

        let mut boxed = BoxBuf::with_capacity(buffer.len());
        codec.write(&mut boxed.writer(), value).unwrap();
        assert_eq!(boxed.as_slice(), buffer.as_slice());
    }

    #[test]
    fn codec_values() {
        let mut rng = rand::rng();
        for _ in 0..NUM_ITER {
            check(&rand_value(&mut rng, 3));
        }
    }

    #[test]
    fn codec_large_compounds_switch_to_wide_encodings() {
        let list = Value::List((0..100).map(|i| Value::String(format!("item-{i}"))).collect());
        check(&list);
        let map = Value::Map((0..300u32).map(|i| (Value::UInt(i), Value::Bool(i % 2 == 0))).collect());
        check(&map);
        let array = Value::Array((0..100).map(|i| Value::Symbol(Symbol::from(format!("cap-{i}")))).collect());
        check(&array);
    }

    #[test]
    fn codec_rejects_truncated_input() {
        let codec = AmqpCodec::new();
        let value = Value::List(vec![Value::String("hello".into()), Value::UInt(70000)]);
        let mut buffer = vec![];
        codec.write(&mut buffer.writer(), &value).unwrap();

        for len in 0..buffer.len() {
            let mut reader = (&buffer[..len]).reader();
            let res: Result<Value, _> = codec.read(&mut reader);
            assert!(res.is_err(), "decoded a {len}-byte prefix");
        }
    }

    #[test]
    fn codec_bounds_nesting() {
        let codec = AmqpCodec::new();
        // A list8 nested in itself 64 times.
        let mut buffer = vec![];
        for i in 0..64u8 {
            let remaining = 64 - i;
            buffer.extend_from_slice(&[0xc0, remaining * 3, 1]);
        }
        buffer.push(0x40);
        let mut reader = buffer.reader();
        let res: Result<Value, _> = codec.read(&mut reader);
        assert!(res.is_err());
    }

    #[test]
    fn codec_chunk_reader() {
        let codec = AmqpCodec::new();
        let value = Value::described(0x24, Value::List(vec![]));
        let mut buffer = vec![];
        codec.write(&mut buffer.writer(), &value).unwrap();
        assert_eq!(buffer, [0x00, 0x53, 0x24, 0x45]);

        let chunk = Chunk::from(buffer);
        let mut reader = chunk.clone();
        let decoded: Value = codec.read(&mut reader).unwrap();
        assert_eq!(decoded, value);
    }
}
