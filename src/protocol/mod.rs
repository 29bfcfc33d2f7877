//! The AMQP 1.0 transport data model: protocol headers, frames,
//! performatives, termini and delivery states.
mod delivery_state;
mod frame;
mod header;
mod performative;
mod seq_num;
mod value;

use core::{fmt, ops::Deref};

pub use delivery_state::*;
pub use frame::*;
pub use header::*;
pub use performative::*;
pub use seq_num::*;
pub use value::*;

/// Protocol limits and defaults.
pub mod constants {
    /// The smallest `max-frame-size` a peer may announce.
    pub const MIN_MAX_FRAME_SIZE: u32 = 512;

    /// The smallest non-zero idle timeout accepted from a peer, in
    /// milliseconds.
    pub const MIN_IDLE_TIMEOUT: u32 = 5000;

    pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

    pub const DEFAULT_CHANNEL_MAX: u16 = 8191;

    pub const DEFAULT_LINK_CREDIT: u32 = 1000;

    pub const DEFAULT_WINDOW: u32 = 5000;

    pub const DEFAULT_HANDLE_MAX: u32 = 255;

    /// Size of the fixed frame header: size, doff, type and channel.
    pub const FRAME_HEADER_SIZE: usize = 8;

    /// The "infinite" window and credit value.
    pub const INFINITE: u32 = u32::MAX;

    /// Property a peer sets on Open to refuse the connection.
    pub const OPEN_ERROR: &str = "com.microsoft:open-error";
}

pub type Handle = u32;
pub type ChannelId = u16;
pub type DeliveryNumber = u32;
pub type TransferNumber = u32;
pub type Milliseconds = u32;

/// Which end of a link an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_bool(&self) -> bool {
        matches!(self, Role::Receiver)
    }

    pub fn from_bool(receiver: bool) -> Self {
        if receiver { Role::Receiver } else { Role::Sender }
    }

    pub fn peer(&self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

/// Settlement policy of the sending end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SenderSettleMode {
    /// Deliveries are sent unsettled.
    Unsettled = 0,
    /// Deliveries are sent pre-settled.
    Settled = 1,
    #[default]
    Mixed = 2,
}

impl SenderSettleMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unsettled),
            1 => Some(Self::Settled),
            2 => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// Settlement policy of the receiving end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReceiverSettleMode {
    /// The receiver settles as soon as it disposes.
    #[default]
    First = 0,
    /// The receiver settles only after the sender settles.
    Second = 1,
}

impl ReceiverSettleMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            _ => None,
        }
    }
}

/// Opaque, caller-chosen identifier of a delivery, unique per link.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeliveryTag(Vec<u8>);

impl DeliveryTag {
    pub fn new(tag: impl Into<Vec<u8>>) -> Self {
        Self(tag.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for DeliveryTag {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for DeliveryTag {
    fn from(tag: &[u8]) -> Self {
        Self(tag.to_vec())
    }
}

impl From<Vec<u8>> for DeliveryTag {
    fn from(tag: Vec<u8>) -> Self {
        Self(tag)
    }
}

impl From<u64> for DeliveryTag {
    fn from(tag: u64) -> Self {
        Self(tag.to_be_bytes().to_vec())
    }
}

impl fmt::Debug for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x?}", self.0)
    }
}
