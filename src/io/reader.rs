#[cfg(feature = "stats")]
use std::sync::atomic::AtomicUsize;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{
    buffers::BufferPool,
    error::{Error, ErrorCondition, Result},
    protocol::{Frame, ProtocolHeader, constants::FRAME_HEADER_SIZE},
    sync::time::AtomicInstant,
};

/// What the reader task hands to the connection.
#[derive(Debug)]
pub(crate) enum ReadEvent {
    Header(ProtocolHeader),
    Frame(Frame),
    /// The stream ended or failed. No event follows.
    Closed(Error),
}

/// State shared between the reader task and its connection.
pub(crate) struct FrameReader {
    /// Largest frame the peer may send.
    max_frame_size: AtomicU32,
    last_received: AtomicInstant,
    pool: BufferPool,
    #[cfg(feature = "stats")]
    pub(crate) bytes: AtomicUsize,
    #[cfg(feature = "stats")]
    pub(crate) frames: AtomicUsize,
}

impl FrameReader {
    pub(crate) fn new(max_frame_size: u32, pool: BufferPool) -> Self {
        Self {
            max_frame_size: AtomicU32::new(max_frame_size),
            last_received: AtomicInstant::now(),
            pool,
            #[cfg(feature = "stats")]
            bytes: AtomicUsize::new(0),
            #[cfg(feature = "stats")]
            frames: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_max_frame_size(&self, size: u32) {
        self.max_frame_size.store(size, Ordering::Relaxed);
    }

    /// When the last byte arrived, relative to the local epoch.
    pub(crate) fn last_received(&self) -> std::time::Duration {
        self.last_received.load()
    }

    /// Validates the size prefix of the next frame.
    fn check_size(&self, size: u32) -> Result<usize> {
        let max = self.max_frame_size.load(Ordering::Relaxed);
        if (size as usize) < FRAME_HEADER_SIZE || size > max {
            return Err(Error::amqp(
                ErrorCondition::FramingError,
                format!("frame size {size} outside [{FRAME_HEADER_SIZE}, {max}]"),
            ));
        }
        Ok(size as usize)
    }
}

/// Reads the protocol header, then frames, until the stream ends, a framing
/// error occurs or `token` is cancelled.
pub(crate) async fn read_task<R>(
    mut io: R,
    reader: Arc<FrameReader>,
    events: mpsc::Sender<ReadEvent>,
    token: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    macro_rules! read_exact {
        ($buf:expr) => {{
            let res = select! {
                res = io.read_exact($buf) => res,
                _ = token.cancelled() => return,
            };
            if let Err(e) = res {
                let _ = events.send(ReadEvent::Closed(Error::Io(e))).await;
                return;
            }
            reader.last_received.touch();
        }};
    }

    macro_rules! fail {
        ($err:expr) => {{
            let err = $err;
            warn!("reader: {err}");
            let _ = events.send(ReadEvent::Closed(err)).await;
            return;
        }};
    }

    let mut header = [0u8; ProtocolHeader::SIZE];
    read_exact!(&mut header);
    let header = match ProtocolHeader::decode(&header) {
        Ok(header) => header,
        Err(e) => fail!(e),
    };
    trace!("RECV header {header}");
    if events.send(ReadEvent::Header(header)).await.is_err() {
        return;
    }

    loop {
        let mut size = [0u8; 4];
        read_exact!(&mut size);
        let size = match reader.check_size(u32::from_be_bytes(size)) {
            Ok(size) => size,
            Err(e) => fail!(e),
        };

        // The frame keeps its size prefix so it decodes as a whole.
        let mut buffer = reader.pool.take(size);
        let body = match buffer.unfilled_mut(size) {
            Ok(body) => body,
            Err(e) => fail!(Error::amqp(ErrorCondition::InternalError, e.to_string())),
        };
        body[..4].copy_from_slice(&(size as u32).to_be_bytes());
        read_exact!(&mut body[4..]);
        buffer.commit(size);

        #[cfg(feature = "stats")]
        {
            reader.bytes.fetch_add(size, Ordering::Relaxed);
            reader.frames.fetch_add(1, Ordering::Relaxed);
        }

        let frame = match Frame::decode(buffer.into_chunk()) {
            Ok(frame) => frame,
            Err(e) => fail!(e),
        };
        if events.send(ReadEvent::Frame(frame)).await.is_err() {
            return;
        }
    }
}
