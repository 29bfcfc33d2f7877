use super::{AmqpCodec, LCodec, RCodec, WCodec};
use crate::{
    buffers::{BufferList, Chunk, reader::Reader, writer::Writer},
    error::{Error, ErrorCondition, Result},
    protocol::{ChannelId, Frame, FrameType, Performative, constants::FRAME_HEADER_SIZE},
};

/// Data offset, in 4-byte words, of every frame this engine writes: no
/// extended header.
const DOFF: u8 = 2;

/// Encoded length of a frame without its payload.
pub(crate) fn head_len(performative: Option<&Performative>) -> usize {
    FRAME_HEADER_SIZE + performative.map_or(0, |p| AmqpCodec::new().w_len(p))
}

/// Writes the frame header and performative of a frame carrying
/// `payload_len` bytes of payload. The payload itself is written by the
/// caller.
pub(crate) fn write_head<W: Writer>(
    mut writer: W,
    frame_type: FrameType,
    channel: ChannelId,
    performative: Option<&Performative>,
    payload_len: usize,
) -> Result<()> {
    let codec = AmqpCodec::new();
    let size = head_len(performative) + payload_len;
    let size = u32::try_from(size).map_err(|_| Error::Encode(format!("frame of {size} bytes")))?;

    let mut header = [0u8; FRAME_HEADER_SIZE];
    header[..4].copy_from_slice(&size.to_be_bytes());
    header[4] = DOFF;
    header[5] = frame_type as u8;
    header[6..].copy_from_slice(&channel.to_be_bytes());
    writer
        .write_exact(&header)
        .map_err(|_| Error::Encode("frame header".into()))?;

    if let Some(p) = performative {
        codec
            .write(&mut writer, p)
            .map_err(|_| Error::Encode(format!("{} performative", p.name())))?;
    }
    Ok(())
}

fn framing_error(description: String) -> Error {
    Error::amqp(ErrorCondition::FramingError, description)
}

/// Decodes a whole frame, size prefix included. The payload is a view of
/// `frame`.
pub(crate) fn decode(frame: Chunk) -> Result<Frame> {
    let bytes = frame.as_slice();
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(framing_error(format!("frame of {} bytes", bytes.len())));
    }
    let size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size != bytes.len() {
        return Err(framing_error(format!("frame size {size} but {} bytes", bytes.len())));
    }
    let doff = bytes[4] as usize * 4;
    if doff < FRAME_HEADER_SIZE || doff > size {
        return Err(framing_error(format!("invalid data offset {}", bytes[4])));
    }
    let frame_type =
        FrameType::from_u8(bytes[5]).ok_or_else(|| framing_error(format!("unknown frame type {}", bytes[5])))?;
    let channel = u16::from_be_bytes([bytes[6], bytes[7]]);

    let mut body = frame
        .view(doff..)
        .ok_or_else(|| framing_error(format!("invalid data offset {}", bytes[4])))?;
    if body.is_empty() {
        return Ok(Frame {
            channel,
            frame_type,
            performative: None,
            payload: BufferList::new(),
        });
    }

    let performative: Performative = AmqpCodec::new()
        .read(&mut body)
        .map_err(|_| Error::Decode(format!("malformed performative on channel {channel}")))?;
    let mut payload = BufferList::new();
    let remaining = body.remaining();
    if remaining > 0 {
        let chunk = body
            .read_chunk(remaining)
            .map_err(|_| Error::Decode("truncated payload".into()))?;
        payload.push(chunk);
    }
    Ok(Frame {
        channel,
        frame_type,
        performative: Some(performative),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Begin, Close, Transfer};

    #[test]
    fn empty_frame_is_eight_bytes() {
        let bytes = Frame::empty().encode().unwrap();
        assert_eq!(bytes, [0, 0, 0, 8, 2, 0, 0, 0]);
        let frame = Frame::decode(Chunk::from(bytes)).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn payload_is_a_view_of_the_frame() {
        let transfer = Transfer {
            handle: 0,
            delivery_id: Some(0),
            ..Default::default()
        };
        let frame = Frame::new(1, transfer).with_payload(Chunk::from(b"hello".to_vec()));
        let bytes = Chunk::from(frame.encode().unwrap());

        let decoded = Frame::decode(bytes.clone()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.channel, 1);
        let payload: Vec<&Chunk> = decoded.payload.chunks().collect();
        assert!(payload[0].shares_storage(&bytes));
    }

    #[test]
    fn extended_header_is_skipped() {
        let mut bytes = Frame::new(3, Close::default()).encode().unwrap();
        // Grow the data offset to 3 words with 4 bytes of extended header.
        bytes[4] = 3;
        bytes.splice(8..8, [0xde, 0xad, 0xbe, 0xef]);
        let size = (bytes.len() as u32).to_be_bytes();
        bytes[..4].copy_from_slice(&size);

        let frame = Frame::decode(Chunk::from(bytes)).unwrap();
        assert_eq!(frame.performative, Some(Performative::Close(Close::default())));
    }

    #[test]
    fn inconsistent_frames_are_framing_errors() {
        let bytes = Frame::new(0, Begin::default()).encode().unwrap();

        let mut short = bytes.clone();
        short.pop();
        let err = Frame::decode(Chunk::from(short)).unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::FramingError));

        let mut bad_doff = bytes.clone();
        bad_doff[4] = 1;
        let err = Frame::decode(Chunk::from(bad_doff)).unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::FramingError));

        let mut garbage = bytes;
        garbage[8] = 0xff;
        let err = Frame::decode(Chunk::from(garbage)).unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::DecodeError));
    }

    #[test]
    fn head_len_matches_encoding() {
        let transfer = Performative::from(Transfer {
            handle: 12,
            delivery_id: Some(u32::MAX),
            more: true,
            ..Default::default()
        });
        let mut buffer = vec![];
        write_head(&mut buffer, FrameType::Amqp, 0, Some(&transfer), 100).unwrap();
        assert_eq!(buffer.len(), head_len(Some(&transfer)));
        assert_eq!(u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize, buffer.len() + 100);
    }
}
