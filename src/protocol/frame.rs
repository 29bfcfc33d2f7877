use crate::{
    buffers::{BufferList, Chunk},
    codec,
    error::Result,
    protocol::{ChannelId, Performative},
};

/// The frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameType {
    #[default]
    Amqp = 0,
    Sasl = 1,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Amqp),
            1 => Some(Self::Sasl),
            _ => None,
        }
    }
}

/// A decoded frame.
///
/// ```text
/// +----------+------+------+---------+-------------+-------------+---------+
/// | size:u32 | doff | type | channel | ext header  | performative| payload |
/// +----------+------+------+---------+-------------+-------------+---------+
///  <----------- 8 bytes ------------> <doff*4 - 8>
/// ```
///
/// A frame without a performative is an empty keep-alive frame. The payload
/// of a decoded frame is a zero-copy view of the bytes it was decoded from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub channel: ChannelId,
    pub frame_type: FrameType,
    pub performative: Option<Performative>,
    pub payload: BufferList,
}

impl Frame {
    pub fn new(channel: ChannelId, performative: impl Into<Performative>) -> Self {
        Self {
            channel,
            frame_type: FrameType::Amqp,
            performative: Some(performative.into()),
            payload: BufferList::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<BufferList>) -> Self {
        self.payload = payload.into();
        self
    }

    /// An empty frame, used as a keep-alive.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.performative.is_none()
    }

    /// Encodes the whole frame, size prefix included.
    ///
    /// # Errors
    ///
    /// Fails if the performative cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        codec::frame::write_head(&mut out, self.frame_type, self.channel, self.performative.as_ref(), self.payload.len())?;
        for slice in self.payload.slices() {
            out.extend_from_slice(slice);
        }
        Ok(out)
    }

    /// Decodes a whole frame, size prefix included.
    ///
    /// # Errors
    ///
    /// Fails with a framing error if the size prefix or data offset is
    /// inconsistent, and with a decode error if the performative is
    /// malformed.
    pub fn decode(frame: Chunk) -> Result<Self> {
        codec::frame::decode(frame)
    }
}
