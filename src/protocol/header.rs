use core::fmt;

use crate::error::{Error, ErrorCondition, Result};

/// Identifies the layer a protocol header announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    Amqp = 0,
    Tls = 2,
    Sasl = 3,
}

impl ProtocolId {
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Amqp),
            2 => Some(Self::Tls),
            3 => Some(Self::Sasl),
            _ => None,
        }
    }
}

/// The 8-byte header exchanged before any frame:
///
/// ```text
///  0   1   2   3   4    5       6       7
/// +---+---+---+---+----+-------+-------+----------+
/// | A | M | Q | P | id | major | minor | revision |
/// +---+---+---+---+----+-------+-------+----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader {
    pub id: ProtocolId,
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl ProtocolHeader {
    pub const SIZE: usize = 8;
    const TAG: &[u8; 4] = b"AMQP";

    /// AMQP 1.0.0.
    pub const AMQP: Self = Self::new(ProtocolId::Amqp, 1, 0, 0);
    /// SASL security layer, version 1.0.0.
    pub const SASL: Self = Self::new(ProtocolId::Sasl, 1, 0, 0);
    /// TLS security layer, version 1.0.0.
    pub const TLS: Self = Self::new(ProtocolId::Tls, 1, 0, 0);

    pub const fn new(id: ProtocolId, major: u8, minor: u8, revision: u8) -> Self {
        Self {
            id,
            major,
            minor,
            revision,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(Self::TAG);
        out[4] = self.id as u8;
        out[5] = self.major;
        out[6] = self.minor;
        out[7] = self.revision;
        out
    }

    /// Parses a protocol header.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorCondition::NotImplemented`] if the bytes do not carry
    /// the `AMQP` tag or a known protocol id.
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Result<Self> {
        if &bytes[..4] != Self::TAG {
            return Err(Error::amqp(
                ErrorCondition::NotImplemented,
                format!("invalid protocol header {bytes:02x?}"),
            ));
        }
        let id = ProtocolId::from_u8(bytes[4]).ok_or_else(|| {
            Error::amqp(
                ErrorCondition::NotImplemented,
                format!("unknown protocol id {}", bytes[4]),
            )
        })?;
        Ok(Self::new(id, bytes[5], bytes[6], bytes[7]))
    }
}

impl fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AMQP {:?} {}.{}.{}",
            self.id, self.major, self.minor, self.revision
        )
    }
}
