//! The I/O pipeline between a transport and the connection engine.
//!
//! - A reader task turns the byte stream into [`Frame`](crate::Frame)s.
//! - A writer task drains a FIFO of encoded frames, coalescing small frames
//!   into one write call.
//!
//! The writer exposes two watermarks on the bytes it has queued; crossing them
//! raises [`IoEvent`]s so producers can slow down.
pub(crate) mod reader;
pub(crate) mod writer;

use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

/// A byte stream a connection runs on.
///
/// The connection splits the transport in a read half, owned by its reader
/// task, and a write half, owned by its writer task. Aborting the connection
/// cancels both tasks, which drops the halves.
pub trait Transport: Send + 'static {
    type Read: AsyncRead + Send + Unpin + 'static;
    type Write: AsyncWrite + Send + Unpin + 'static;

    fn local_endpoint(&self) -> io::Result<String>;

    fn remote_endpoint(&self) -> io::Result<String>;

    fn split(self) -> (Self::Read, Self::Write);
}

impl Transport for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn local_endpoint(&self) -> io::Result<String> {
        self.local_addr().map(|a| a.to_string())
    }

    fn remote_endpoint(&self) -> io::Result<String> {
        self.peer_addr().map(|a| a.to_string())
    }

    fn split(self) -> (Self::Read, Self::Write) {
        self.into_split()
    }
}

impl Transport for DuplexStream {
    type Read = ReadHalf<DuplexStream>;
    type Write = WriteHalf<DuplexStream>;

    fn local_endpoint(&self) -> io::Result<String> {
        Ok("duplex".into())
    }

    fn remote_endpoint(&self) -> io::Result<String> {
        Ok("duplex".into())
    }

    fn split(self) -> (Self::Read, Self::Write) {
        tokio::io::split(self)
    }
}

/// Backpressure events raised by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// Queued bytes reached `queue_full_limit`.
    QueueFull,
    /// Queued bytes drained to `queue_empty_limit` after a [`QueueFull`](Self::QueueFull).
    QueueEmpty,
}

/// Byte and frame counters of a connection.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionStats {
    pub bytes_sent: usize,
    pub frames_sent: usize,
    pub bytes_received: usize,
    pub frames_received: usize,
}
