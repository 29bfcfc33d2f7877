use super::{AmqpCodec, LCodec, RCodec, WCodec, primitive::read_bytes};
use crate::{
    buffers::{
        reader::{DidntRead, Reader},
        writer::{DidntWrite, Writer},
    },
    protocol::{Descriptor, Symbol, Value},
};

/// Format codes.
pub(crate) mod ctor {
    pub(crate) const DESCRIBED: u8 = 0x00;
    pub(crate) const NULL: u8 = 0x40;
    pub(crate) const TRUE: u8 = 0x41;
    pub(crate) const FALSE: u8 = 0x42;
    pub(crate) const UINT0: u8 = 0x43;
    pub(crate) const ULONG0: u8 = 0x44;
    pub(crate) const LIST0: u8 = 0x45;
    pub(crate) const UBYTE: u8 = 0x50;
    pub(crate) const BYTE: u8 = 0x51;
    pub(crate) const SMALLUINT: u8 = 0x52;
    pub(crate) const SMALLULONG: u8 = 0x53;
    pub(crate) const SMALLINT: u8 = 0x54;
    pub(crate) const SMALLLONG: u8 = 0x55;
    pub(crate) const BOOL: u8 = 0x56;
    pub(crate) const USHORT: u8 = 0x60;
    pub(crate) const SHORT: u8 = 0x61;
    pub(crate) const UINT: u8 = 0x70;
    pub(crate) const INT: u8 = 0x71;
    pub(crate) const FLOAT: u8 = 0x72;
    pub(crate) const CHAR: u8 = 0x73;
    pub(crate) const ULONG: u8 = 0x80;
    pub(crate) const LONG: u8 = 0x81;
    pub(crate) const DOUBLE: u8 = 0x82;
    pub(crate) const TIMESTAMP: u8 = 0x83;
    pub(crate) const UUID: u8 = 0x98;
    pub(crate) const VBIN8: u8 = 0xa0;
    pub(crate) const STR8: u8 = 0xa1;
    pub(crate) const SYM8: u8 = 0xa3;
    pub(crate) const VBIN32: u8 = 0xb0;
    pub(crate) const STR32: u8 = 0xb1;
    pub(crate) const SYM32: u8 = 0xb3;
    pub(crate) const LIST8: u8 = 0xc0;
    pub(crate) const MAP8: u8 = 0xc1;
    pub(crate) const LIST32: u8 = 0xd0;
    pub(crate) const MAP32: u8 = 0xd1;
    pub(crate) const ARRAY8: u8 = 0xe0;
    pub(crate) const ARRAY32: u8 = 0xf0;
}

fn fits_u8(n: usize) -> bool {
    n <= u8::MAX as usize
}

fn fits_i8<T: TryInto<i8>>(n: T) -> bool {
    n.try_into().is_ok()
}

impl AmqpCodec {
    /// The most compact constructor for a standalone value.
    fn compact_ctor(self, x: &Value) -> u8 {
        match x {
            Value::Null => ctor::NULL,
            Value::Bool(true) => ctor::TRUE,
            Value::Bool(false) => ctor::FALSE,
            Value::UByte(_) => ctor::UBYTE,
            Value::UShort(_) => ctor::USHORT,
            Value::UInt(0) => ctor::UINT0,
            Value::UInt(v) if *v <= u8::MAX as u32 => ctor::SMALLUINT,
            Value::UInt(_) => ctor::UINT,
            Value::ULong(0) => ctor::ULONG0,
            Value::ULong(v) if *v <= u8::MAX as u64 => ctor::SMALLULONG,
            Value::ULong(_) => ctor::ULONG,
            Value::Byte(_) => ctor::BYTE,
            Value::Short(_) => ctor::SHORT,
            Value::Int(v) if fits_i8(*v) => ctor::SMALLINT,
            Value::Int(_) => ctor::INT,
            Value::Long(v) if fits_i8(*v) => ctor::SMALLLONG,
            Value::Long(_) => ctor::LONG,
            Value::Float(_) => ctor::FLOAT,
            Value::Double(_) => ctor::DOUBLE,
            Value::Char(_) => ctor::CHAR,
            Value::Timestamp(_) => ctor::TIMESTAMP,
            Value::Uuid(_) => ctor::UUID,
            Value::Binary(b) if fits_u8(b.len()) => ctor::VBIN8,
            Value::Binary(_) => ctor::VBIN32,
            Value::String(s) if fits_u8(s.len()) => ctor::STR8,
            Value::String(_) => ctor::STR32,
            Value::Symbol(s) if fits_u8(s.len()) => ctor::SYM8,
            Value::Symbol(_) => ctor::SYM32,
            Value::List(items) if items.is_empty() => ctor::LIST0,
            Value::List(items) => {
                let len = self.items_len(items.iter());
                if fits_u8(items.len()) && fits_u8(len + 1) {
                    ctor::LIST8
                } else {
                    ctor::LIST32
                }
            }
            Value::Map(pairs) => {
                let len = self.items_len(pairs.iter().flat_map(|(k, v)| [k, v]));
                if fits_u8(pairs.len() * 2) && fits_u8(len + 1) {
                    ctor::MAP8
                } else {
                    ctor::MAP32
                }
            }
            Value::Array(items) => {
                let len = self.elements_len(items);
                if fits_u8(items.len()) && fits_u8(len + 1) {
                    ctor::ARRAY8
                } else {
                    ctor::ARRAY32
                }
            }
            Value::Described(..) => ctor::DESCRIBED,
        }
    }

    /// The constructor shared by the elements of an array. Arrays always use
    /// the fixed-width or 32-bit variant so every element fits.
    fn element_ctor(self, x: &Value) -> Option<u8> {
        let ctor = match x {
            Value::Null => ctor::NULL,
            Value::Bool(_) => ctor::BOOL,
            Value::UByte(_) => ctor::UBYTE,
            Value::UShort(_) => ctor::USHORT,
            Value::UInt(_) => ctor::UINT,
            Value::ULong(_) => ctor::ULONG,
            Value::Byte(_) => ctor::BYTE,
            Value::Short(_) => ctor::SHORT,
            Value::Int(_) => ctor::INT,
            Value::Long(_) => ctor::LONG,
            Value::Float(_) => ctor::FLOAT,
            Value::Double(_) => ctor::DOUBLE,
            Value::Char(_) => ctor::CHAR,
            Value::Timestamp(_) => ctor::TIMESTAMP,
            Value::Uuid(_) => ctor::UUID,
            Value::Binary(_) => ctor::VBIN32,
            Value::String(_) => ctor::STR32,
            Value::Symbol(_) => ctor::SYM32,
            Value::List(_) => ctor::LIST32,
            Value::Map(_) => ctor::MAP32,
            Value::Array(_) => ctor::ARRAY32,
            Value::Described(..) => return None,
        };
        Some(ctor)
    }

    fn items_len<'a>(self, items: impl Iterator<Item = &'a Value>) -> usize {
        items.map(|i| self.w_len(i)).sum()
    }

    fn elements_len(self, items: &[Value]) -> usize {
        let ctor = items.first().and_then(|i| self.element_ctor(i)).unwrap_or(ctor::NULL);
        1 + items.iter().map(|i| self.body_len(i, ctor)).sum::<usize>()
    }

    /// Length of the bytes following constructor `ctor`.
    fn body_len(self, x: &Value, ctor: u8) -> usize {
        match (x, ctor) {
            (_, ctor::NULL | ctor::TRUE | ctor::FALSE | ctor::UINT0 | ctor::ULONG0 | ctor::LIST0) => 0,
            (_, ctor::BOOL | ctor::UBYTE | ctor::BYTE | ctor::SMALLUINT | ctor::SMALLULONG) => 1,
            (_, ctor::SMALLINT | ctor::SMALLLONG) => 1,
            (_, ctor::USHORT | ctor::SHORT) => 2,
            (_, ctor::UINT | ctor::INT | ctor::FLOAT | ctor::CHAR) => 4,
            (_, ctor::ULONG | ctor::LONG | ctor::DOUBLE | ctor::TIMESTAMP) => 8,
            (_, ctor::UUID) => 16,
            (Value::Binary(b), _) => width(ctor) + b.len(),
            (Value::String(s), _) => width(ctor) + s.len(),
            (Value::Symbol(s), _) => width(ctor) + s.len(),
            (Value::List(items), _) => 2 * width(ctor) + self.items_len(items.iter()),
            (Value::Map(pairs), _) => 2 * width(ctor) + self.items_len(pairs.iter().flat_map(|(k, v)| [k, v])),
            (Value::Array(items), _) => 2 * width(ctor) + self.elements_len(items),
            (Value::Described(d, v), _) => self.w_len(&descriptor_value(d)) + self.w_len(v.as_ref()),
            _ => 0,
        }
    }

    fn write_body<W: Writer>(self, writer: &mut W, x: &Value, ctor: u8) -> Result<(), DidntWrite> {
        match (x, ctor) {
            (_, ctor::NULL | ctor::TRUE | ctor::FALSE | ctor::UINT0 | ctor::ULONG0 | ctor::LIST0) => Ok(()),
            (Value::Bool(b), ctor::BOOL) => self.write(&mut *writer, u8::from(*b)),
            (Value::UByte(v), _) => self.write(&mut *writer, *v),
            (Value::UShort(v), _) => self.write(&mut *writer, *v),
            (Value::UInt(v), ctor::SMALLUINT) => self.write(&mut *writer, *v as u8),
            (Value::UInt(v), _) => self.write(&mut *writer, *v),
            (Value::ULong(v), ctor::SMALLULONG) => self.write(&mut *writer, *v as u8),
            (Value::ULong(v), _) => self.write(&mut *writer, *v),
            (Value::Byte(v), _) => self.write(&mut *writer, *v),
            (Value::Short(v), _) => self.write(&mut *writer, *v),
            (Value::Int(v), ctor::SMALLINT) => self.write(&mut *writer, *v as i8),
            (Value::Int(v), _) => self.write(&mut *writer, *v),
            (Value::Long(v), ctor::SMALLLONG) => self.write(&mut *writer, *v as i8),
            (Value::Long(v), _) => self.write(&mut *writer, *v),
            (Value::Float(v), _) => self.write(&mut *writer, *v),
            (Value::Double(v), _) => self.write(&mut *writer, *v),
            (Value::Char(c), _) => self.write(&mut *writer, *c as u32),
            (Value::Timestamp(v), _) => self.write(&mut *writer, *v),
            (Value::Uuid(v), _) => writer.write_exact(v),
            (Value::Binary(b), _) => self.write_sized(writer, b, ctor),
            (Value::String(s), _) => self.write_sized(writer, s.as_bytes(), ctor),
            (Value::Symbol(s), _) => self.write_sized(writer, s.as_bytes(), ctor),
            (Value::List(items), _) => {
                self.write_size(writer, ctor, self.body_len(x, ctor) - width(ctor))?;
                self.write_size(writer, ctor, items.len())?;
                items.iter().try_for_each(|i| self.write(&mut *writer, i))
            }
            (Value::Map(pairs), _) => {
                self.write_size(writer, ctor, self.body_len(x, ctor) - width(ctor))?;
                self.write_size(writer, ctor, pairs.len() * 2)?;
                pairs.iter().try_for_each(|(k, v)| {
                    self.write(&mut *writer, k)?;
                    self.write(&mut *writer, v)
                })
            }
            (Value::Array(items), _) => {
                let element = match items.first() {
                    Some(first) => self.element_ctor(first).ok_or(DidntWrite)?,
                    None => ctor::NULL,
                };
                if items.iter().any(|i| self.element_ctor(i) != Some(element)) {
                    return Err(DidntWrite);
                }
                self.write_size(writer, ctor, self.body_len(x, ctor) - width(ctor))?;
                self.write_size(writer, ctor, items.len())?;
                writer.write_u8(element)?;
                items.iter().try_for_each(|i| self.write_body(writer, i, element))
            }
            (Value::Described(d, v), _) => {
                self.write(&mut *writer, &descriptor_value(d))?;
                self.write(&mut *writer, v.as_ref())
            }
            _ => Err(DidntWrite),
        }
    }

    fn write_size<W: Writer>(self, writer: &mut W, ctor: u8, n: usize) -> Result<(), DidntWrite> {
        if width(ctor) == 1 {
            self.write(&mut *writer, u8::try_from(n).map_err(|_| DidntWrite)?)
        } else {
            self.write(&mut *writer, u32::try_from(n).map_err(|_| DidntWrite)?)
        }
    }

    fn write_sized<W: Writer>(self, writer: &mut W, bytes: &[u8], ctor: u8) -> Result<(), DidntWrite> {
        self.write_size(writer, ctor, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }
        writer.write_exact(bytes)
    }

    fn num<T, R: Reader>(self, reader: &mut R) -> Result<T, DidntRead>
    where
        for<'a> Self: RCodec<T, &'a mut R, Error = DidntRead>,
    {
        self.read(reader)
    }

    fn read_size<R: Reader>(self, reader: &mut R, ctor: u8) -> Result<usize, DidntRead> {
        if width(ctor) == 1 {
            let n: u8 = self.num(reader)?;
            Ok(n as usize)
        } else {
            let n: u32 = self.num(reader)?;
            usize::try_from(n).map_err(|_| DidntRead)
        }
    }

    fn read_body<R: Reader>(self, reader: &mut R, ctor: u8) -> Result<Value, DidntRead> {
        let value = match ctor {
            ctor::NULL => Value::Null,
            ctor::TRUE => Value::Bool(true),
            ctor::FALSE => Value::Bool(false),
            ctor::BOOL => Value::Bool(reader.read_u8()? != 0),
            ctor::UBYTE => Value::UByte(self.num(reader)?),
            ctor::USHORT => Value::UShort(self.num(reader)?),
            ctor::UINT0 => Value::UInt(0),
            ctor::SMALLUINT => Value::UInt(reader.read_u8()? as u32),
            ctor::UINT => Value::UInt(self.num(reader)?),
            ctor::ULONG0 => Value::ULong(0),
            ctor::SMALLULONG => Value::ULong(reader.read_u8()? as u64),
            ctor::ULONG => Value::ULong(self.num(reader)?),
            ctor::BYTE => Value::Byte(self.num(reader)?),
            ctor::SHORT => Value::Short(self.num(reader)?),
            ctor::SMALLINT => Value::Int(self.num::<i8, R>(reader)? as i32),
            ctor::INT => Value::Int(self.num(reader)?),
            ctor::SMALLLONG => Value::Long(self.num::<i8, R>(reader)? as i64),
            ctor::LONG => Value::Long(self.num(reader)?),
            ctor::FLOAT => Value::Float(self.num(reader)?),
            ctor::DOUBLE => Value::Double(self.num(reader)?),
            ctor::CHAR => {
                let c: u32 = self.num(reader)?;
                Value::Char(char::from_u32(c).ok_or(DidntRead)?)
            }
            ctor::TIMESTAMP => Value::Timestamp(self.num(reader)?),
            ctor::UUID => Value::Uuid(self.num(reader)?),
            ctor::VBIN8 | ctor::VBIN32 => {
                let len = self.read_size(reader, ctor)?;
                Value::Binary(read_bytes(reader, len)?)
            }
            ctor::STR8 | ctor::STR32 => {
                let len = self.read_size(reader, ctor)?;
                Value::String(String::from_utf8(read_bytes(reader, len)?).map_err(|_| DidntRead)?)
            }
            ctor::SYM8 | ctor::SYM32 => {
                let len = self.read_size(reader, ctor)?;
                let s = String::from_utf8(read_bytes(reader, len)?).map_err(|_| DidntRead)?;
                Value::Symbol(Symbol::from(s))
            }
            ctor::LIST0 => Value::List(Vec::new()),
            ctor::LIST8 | ctor::LIST32 => {
                let codec = self.nested().ok_or(DidntRead)?;
                let (count, end) = self.read_compound_header(reader, ctor)?;
                let mut items: Vec<Value> = Vec::with_capacity(count.min(reader.remaining()));
                for _ in 0..count {
                    let item: Value = codec.read(&mut *reader)?;
                    items.push(item);
                }
                check_end(reader, end)?;
                Value::List(items)
            }
            ctor::MAP8 | ctor::MAP32 => {
                let codec = self.nested().ok_or(DidntRead)?;
                let (count, end) = self.read_compound_header(reader, ctor)?;
                if count % 2 != 0 {
                    return Err(DidntRead);
                }
                let mut pairs: Vec<(Value, Value)> = Vec::with_capacity((count / 2).min(reader.remaining()));
                for _ in 0..count / 2 {
                    let k: Value = codec.read(&mut *reader)?;
                    let v: Value = codec.read(&mut *reader)?;
                    pairs.push((k, v));
                }
                check_end(reader, end)?;
                Value::Map(pairs)
            }
            ctor::ARRAY8 | ctor::ARRAY32 => {
                let codec = self.nested().ok_or(DidntRead)?;
                let (count, end) = self.read_compound_header(reader, ctor)?;
                let mut element = reader.read_u8()?;
                let mut descriptor = None;
                if element == ctor::DESCRIBED {
                    let d: Value = codec.read(&mut *reader)?;
                    descriptor = Some(to_descriptor(d)?);
                    element = reader.read_u8()?;
                }
                let mut items: Vec<Value> = Vec::with_capacity(count.min(reader.remaining()));
                for _ in 0..count {
                    let item = codec.read_body(reader, element)?;
                    items.push(match &descriptor {
                        Some(d) => Value::Described(Box::new(d.clone()), Box::new(item)),
                        None => item,
                    });
                }
                check_end(reader, end)?;
                Value::Array(items)
            }
            ctor::DESCRIBED => {
                let codec = self.nested().ok_or(DidntRead)?;
                let d: Value = codec.read(&mut *reader)?;
                let value: Value = codec.read(&mut *reader)?;
                Value::Described(Box::new(to_descriptor(d)?), Box::new(value))
            }
            _ => return Err(DidntRead),
        };
        Ok(value)
    }

    /// Reads the size and count of a compound and returns the count and the
    /// number of bytes the reader must have left once the compound is read.
    fn read_compound_header<R: Reader>(self, reader: &mut R, ctor: u8) -> Result<(usize, usize), DidntRead> {
        let size = self.read_size(reader, ctor)?;
        let end = reader.remaining().checked_sub(size).ok_or(DidntRead)?;
        let count = self.read_size(reader, ctor)?;
        Ok((count, end))
    }
}

fn check_end<R: Reader>(reader: &R, end: usize) -> Result<(), DidntRead> {
    if reader.remaining() == end { Ok(()) } else { Err(DidntRead) }
}

/// Width of the size and count fields following a variable-width
/// constructor.
fn width(ctor: u8) -> usize {
    match ctor {
        ctor::VBIN8 | ctor::STR8 | ctor::SYM8 | ctor::LIST8 | ctor::MAP8 | ctor::ARRAY8 => 1,
        _ => 4,
    }
}

fn descriptor_value(d: &Descriptor) -> Value {
    match d {
        Descriptor::Code(c) => Value::ULong(*c),
        Descriptor::Name(n) => Value::Symbol(n.clone()),
    }
}

fn to_descriptor(v: Value) -> Result<Descriptor, DidntRead> {
    match v {
        Value::ULong(c) => Ok(Descriptor::Code(c)),
        Value::Symbol(s) => Ok(Descriptor::Name(s)),
        _ => Err(DidntRead),
    }
}

impl LCodec<&Value> for AmqpCodec {
    fn w_len(self, x: &Value) -> usize {
        1 + self.body_len(x, self.compact_ctor(x))
    }
}

impl<W> WCodec<&Value, &mut W> for AmqpCodec
where
    W: Writer,
{
    type Output = Result<(), DidntWrite>;

    fn write(self, writer: &mut W, x: &Value) -> Self::Output {
        let ctor = self.compact_ctor(x);
        writer.write_u8(ctor)?;
        self.write_body(writer, x, ctor)
    }
}

impl<R> RCodec<Value, &mut R> for AmqpCodec
where
    R: Reader,
{
    type Error = DidntRead;

    fn read(self, reader: &mut R) -> Result<Value, Self::Error> {
        let ctor = reader.read_u8()?;
        self.read_body(reader, ctor)
    }
}
