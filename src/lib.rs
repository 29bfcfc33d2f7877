//! An AMQP 1.0 protocol engine on tokio.
//!
//! The engine implements the connection, session and link layers of AMQP 1.0
//! over any byte stream implementing [`Transport`]: protocol header exchange,
//! frame encoding, the open/close state machines of all three object kinds,
//! session transfer windows, link credit, delivery fragmentation and
//! reassembly, and batched settlement. Message payloads are opaque bytes.
//!
//! # Overview
//!
//! ```text
//!  Connection ─┬─ Session (channel 0) ─┬─ SenderLink   (handle 0)
//!              │                       └─ ReceiverLink (handle 1)
//!              └─ Session (channel 1) ─── ...
//!
//!   ┌─────────┐  frames  ┌────────┐  frames  ┌────────┐  bytes  ┌───────────┐
//!   │  links  │ ───────▶ │ writer │ ───────▶ │  task  │ ──────▶ │ transport │
//!   └─────────┘          └────────┘          └────────┘         └───────────┘
//!        ▲                                                            │
//!        │  dispatch   ┌────────┐  frames   ┌────────┐    bytes       │
//!        └──────────── │ driver │ ◀──────── │ reader │ ◀──────────────┘
//!                      └────────┘           └────────┘
//! ```
//!
//! Each connection runs a reader task that decodes frames, a writer task that
//! drains the outgoing queue and coalesces small frames into one write, and a
//! driver task that dispatches decoded frames to sessions and links in
//! arrival order and keeps the connection alive with heartbeats.
//!
//! # Quick Start
//!
//! ```no_run
//! use amqp_engine::*;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = TcpStream::connect("127.0.0.1:5672").await?;
//!     let connection = Connection::open(stream, ConnectionSettings::new("client-1")).await?;
//!     let session = connection.begin_session(SessionSettings::default()).await?;
//!
//!     let sender = session.attach_sender(LinkSettings::sender("orders-out", "orders")).await?;
//!     let outcome = sender.send(BufferList::from(b"hello".to_vec())).await?;
//!     println!("settled with {outcome:?}");
//!
//!     let receiver = session
//!         .attach_receiver(LinkSettings::receiver("orders-in", "orders"))
//!         .await?;
//!     if let Some(delivery) = receiver.receive(std::time::Duration::from_secs(5)).await? {
//!         receiver.accept(&delivery)?;
//!     }
//!
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Flow control
//!
//! Sending a delivery waits for two things: link credit granted by the
//! receiver, and room in the session's outgoing window. A receiver link
//! replenishes credit automatically once enough deliveries are settled
//! (see [`LinkSettings::with_flow_threshold`]), or manually through
//! [`ReceiverLink::issue_credit`].
//!
//! The writer reports backpressure on its queue with [`IoEvent`]s, see
//! [`Connection::on_io_event`].
//!
//! # Buffers
//!
//! Payloads travel as [`BufferList`]s: lists of reference-counted [`Chunk`]s.
//! A delivery split over many Transfer frames is reassembled without copying
//! its fragments; the receive side allocates frame bodies from a
//! [`BufferPool`].
//!
//! # Logging
//!
//! The engine logs through [`tracing`]: state changes at `debug`, frames at
//! `trace`, protocol violations and transport failures at `warn`.
mod buffers;
mod codec;
mod collections;
mod connection;
mod endpoint;
mod error;
mod io;
mod link;
pub mod protocol;
mod session;
mod sync;

pub use buffers::{BufferError, BufferList, BufferPool, ByteBuffer, Chunk, DynBuf};
pub use connection::{Connection, ConnectionSettings, DefaultSessionFactory, SessionFactory};
pub use endpoint::{Operation, State};
pub use error::{AmqpError, Error, ErrorCondition, Result};
#[cfg(feature = "stats")]
pub use io::ConnectionStats;
pub use io::{IoEvent, Transport};
pub use link::{Delivery, DeliveryTracker, Link, LinkSettings, ReceiverLink, SenderLink};
pub use session::{DefaultLinkFactory, LinkFactory, Session, SessionSettings};
