#[cfg(feature = "stats")]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::IoEvent;
use crate::{
    buffers::{BoxBuf, BufferList, writer::Writer},
    codec,
    error::{Error, Result},
    protocol::{ChannelId, FrameType, Performative, ProtocolHeader},
    sync::{Signal, time::AtomicInstant},
};

/// An encoded frame waiting in the writer queue. The payload is not copied.
pub(crate) struct OutgoingFrame {
    head: Vec<u8>,
    payload: BufferList,
}

impl OutgoingFrame {
    pub(crate) fn new(channel: ChannelId, performative: Option<&Performative>, payload: BufferList) -> Result<Self> {
        let mut head = Vec::with_capacity(codec::frame::head_len(performative));
        codec::frame::write_head(&mut head, FrameType::Amqp, channel, performative, payload.len())?;
        Ok(Self { head, payload })
    }

    fn raw(bytes: Vec<u8>) -> Self {
        Self {
            head: bytes,
            payload: BufferList::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.head.len() + self.payload.len()
    }
}

/// Writer queue limits.
#[derive(Debug, Clone)]
pub(crate) struct WriterConfig {
    pub(crate) queue_full_limit: usize,
    pub(crate) queue_empty_limit: usize,
    /// Frames up to this size are copied into the batch buffer.
    pub(crate) coalesce_threshold: usize,
    /// Capacity of the batch buffer.
    pub(crate) batch_size: usize,
    pub(crate) write_timeout: Duration,
}

#[derive(Default)]
struct Queue {
    frames: VecDeque<OutgoingFrame>,
    /// Bytes queued and not yet written.
    bytes: usize,
    congested: bool,
    /// A QueueFull not yet reported to the observer.
    full_pending: bool,
    closing: bool,
}

type Observer = Arc<dyn Fn(IoEvent) + Send + Sync>;

/// The producer side of the writer task.
///
/// [`push`](Self::push) never blocks: frames queue up and the watermarks
/// tell producers when to back off. Producers may push while holding their
/// own locks, so the observer is only ever called from the writer task.
pub(crate) struct FrameWriter {
    config: WriterConfig,
    queue: Mutex<Queue>,
    signal: Signal,
    last_sent: AtomicInstant,
    observer: Mutex<Option<Observer>>,
    #[cfg(feature = "stats")]
    pub(crate) bytes: AtomicUsize,
    #[cfg(feature = "stats")]
    pub(crate) frames: AtomicUsize,
}

impl FrameWriter {
    pub(crate) fn new(config: WriterConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(Queue::default()),
            signal: Signal::new(),
            last_sent: AtomicInstant::now(),
            observer: Mutex::new(None),
            #[cfg(feature = "stats")]
            bytes: AtomicUsize::new(0),
            #[cfg(feature = "stats")]
            frames: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_observer(&self, observer: Observer) {
        *self.observer.lock() = Some(observer);
    }

    fn emit(&self, event: IoEvent) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }

    pub(crate) fn push(&self, frame: OutgoingFrame) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.closing {
            return Err(Error::closed("writer", None));
        }
        queue.bytes += frame.len();
        queue.frames.push_back(frame);
        if !queue.congested && queue.bytes >= self.config.queue_full_limit {
            queue.congested = true;
            queue.full_pending = true;
        }
        drop(queue);

        self.last_sent.touch();
        self.signal.notify();
        Ok(())
    }

    /// Encodes and queues a frame on `channel`.
    pub(crate) fn send(&self, channel: ChannelId, performative: Performative, payload: BufferList) -> Result<()> {
        trace!("SEND ch={channel} {} payload={}", performative.name(), payload.len());
        self.push(OutgoingFrame::new(channel, Some(&performative), payload)?)
    }

    pub(crate) fn send_header(&self, header: ProtocolHeader) -> Result<()> {
        trace!("SEND header {header}");
        self.push(OutgoingFrame::raw(header.encode().to_vec()))
    }

    /// Queues an empty keep-alive frame.
    pub(crate) fn send_empty(&self) -> Result<()> {
        trace!("SEND empty frame");
        self.push(OutgoingFrame::new(0, None, BufferList::new())?)
    }

    /// Refuses further frames. The task exits once the queue is drained.
    pub(crate) fn close(&self) {
        self.queue.lock().closing = true;
        self.signal.close();
    }

    pub(crate) fn is_congested(&self) -> bool {
        self.queue.lock().congested
    }

    /// When a frame was last queued or written, relative to the local epoch.
    pub(crate) fn last_sent(&self) -> Duration {
        self.last_sent.load()
    }

    fn take_batch(&self) -> Option<Vec<OutgoingFrame>> {
        let mut queue = self.queue.lock();
        (!queue.frames.is_empty()).then(|| queue.frames.drain(..).collect())
    }

    fn take_full_event(&self) -> bool {
        std::mem::take(&mut self.queue.lock().full_pending)
    }

    fn written(&self, bytes: usize) {
        self.last_sent.touch();
        let mut queue = self.queue.lock();
        queue.bytes = queue.bytes.saturating_sub(bytes);
        let drained = queue.congested && queue.bytes <= self.config.queue_empty_limit;
        if drained {
            queue.congested = false;
        }
        drop(queue);
        if drained {
            self.emit(IoEvent::QueueEmpty);
        }
    }
}

/// Writes queued frames to `io` until the writer is closed and drained, a
/// write fails, or `token` is cancelled. Shuts `io` down on a graceful exit.
///
/// A failed or timed out write closes the writer and is returned, so the
/// owner can tear the connection down.
pub(crate) async fn write_task<W>(mut io: W, writer: Arc<FrameWriter>, token: CancellationToken) -> Result<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut batch = BoxBuf::with_capacity(writer.config.batch_size);

    loop {
        let frames = select! {
            frames = writer.signal.wait_until(|| writer.take_batch()) => frames,
            _ = token.cancelled() => return Ok(()),
        };
        let Some(frames) = frames else {
            break;
        };
        if writer.take_full_event() {
            writer.emit(IoEvent::QueueFull);
        }

        let write = tokio::time::timeout(writer.config.write_timeout, async {
            let mut written = 0;
            for frame in &frames {
                let len = frame.len();
                if len <= writer.config.coalesce_threshold && len <= batch.capacity() {
                    if len > batch.capacity() - batch.len() {
                        io.write_all(batch.as_slice()).await?;
                        batch.clear();
                    }
                    let mut w = &mut batch;
                    // Fits: checked against the remaining capacity above.
                    let _ = w.write_exact(&frame.head);
                    for s in frame.payload.slices() {
                        let _ = w.write_exact(s);
                    }
                } else {
                    if !batch.is_empty() {
                        io.write_all(batch.as_slice()).await?;
                        batch.clear();
                    }
                    io.write_all(&frame.head).await?;
                    for s in frame.payload.slices() {
                        io.write_all(s).await?;
                    }
                }
                written += len;
            }
            if !batch.is_empty() {
                io.write_all(batch.as_slice()).await?;
                batch.clear();
            }
            io.flush().await?;
            Ok::<usize, std::io::Error>(written)
        });
        let res = select! {
            res = write => res,
            _ = token.cancelled() => return Ok(()),
        };

        match res {
            Ok(Ok(written)) => {
                #[cfg(feature = "stats")]
                {
                    writer.bytes.fetch_add(written, Ordering::Relaxed);
                    writer.frames.fetch_add(frames.len(), Ordering::Relaxed);
                }
                writer.written(written);
            }
            Ok(Err(e)) => {
                warn!("writer: {e}");
                writer.close();
                return Err(e.into());
            }
            Err(_) => {
                warn!("writer: write timed out");
                writer.close();
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out").into());
            }
        }
    }

    let _ = io.shutdown().await;
    Ok(())
}
