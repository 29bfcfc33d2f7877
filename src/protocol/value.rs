use core::{borrow::Borrow, fmt, ops::Deref};
use std::collections::BTreeMap;

use crate::error::AmqpError;

/// An AMQP symbol: an ASCII identifier such as a capability or an error
/// condition.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Symbol(String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A map keyed by symbols, as carried in `properties` and `info` fields.
pub type Fields = BTreeMap<Symbol, Value>;

/// The descriptor of a described value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Code(u64),
    Name(Symbol),
}

/// A decoded AMQP value.
///
/// This covers the part of the type system that performatives, termini and
/// delivery states use. Message bodies never go through it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Timestamp(i64),
    Uuid([u8; 16]),
    Binary(Vec<u8>),
    String(String),
    Symbol(Symbol),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Array(Vec<Value>),
    Described(Box<Descriptor>, Box<Value>),
}

impl Value {
    pub fn described(code: u64, value: Value) -> Self {
        Value::Described(Box::new(Descriptor::Code(code)), Box::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encodes a symbol list as an array, or null when empty.
    pub(crate) fn symbols(symbols: &[Symbol]) -> Value {
        if symbols.is_empty() {
            Value::Null
        } else {
            Value::Array(symbols.iter().cloned().map(Value::Symbol).collect())
        }
    }

    pub(crate) fn fields(fields: &Option<Fields>) -> Value {
        match fields {
            Some(f) => Value::Map(
                f.iter()
                    .map(|(k, v)| (Value::Symbol(k.clone()), v.clone()))
                    .collect(),
            ),
            None => Value::Null,
        }
    }

    pub(crate) fn option<T, F: FnOnce(T) -> Value>(value: Option<T>, f: F) -> Value {
        value.map_or(Value::Null, f)
    }
}

impl From<AmqpError> for Value {
    fn from(e: AmqpError) -> Self {
        crate::codec::performative::error_to_value(&e)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}
