#![allow(dead_code)]

use std::time::Duration;

use amqp_engine::{
    Chunk, Connection, ConnectionSettings,
    protocol::{Attach, Begin, ChannelId, Flow, Frame, Open, Performative, ProtocolHeader, Role, Source, Target},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::EnvFilter;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two engines connected by an in-memory pipe.
pub async fn engine_pair(client: ConnectionSettings, server: ConnectionSettings) -> (Connection, Connection) {
    let (a, b) = tokio::io::duplex(1 << 20);
    let (client, server) = tokio::join!(Connection::open(a, client), Connection::accept(b, server));
    (client.unwrap(), server.unwrap())
}

/// The far end of a connection, driven frame by frame by the test.
pub struct Peer {
    io: DuplexStream,
}

impl Peer {
    /// An engine-side transport and the peer on the other end.
    pub fn new() -> (DuplexStream, Self) {
        let (a, b) = tokio::io::duplex(1 << 20);
        (a, Self { io: b })
    }

    pub async fn read_header(&mut self) -> ProtocolHeader {
        let mut header = [0u8; ProtocolHeader::SIZE];
        self.io.read_exact(&mut header).await.unwrap();
        ProtocolHeader::decode(&header).unwrap()
    }

    pub async fn write_header(&mut self, header: ProtocolHeader) {
        self.io.write_all(&header.encode()).await.unwrap();
    }

    /// The next frame, empty frames included.
    pub async fn read_frame(&mut self) -> Frame {
        let mut size = [0u8; 4];
        self.io.read_exact(&mut size).await.unwrap();
        let size = u32::from_be_bytes(size) as usize;
        let mut frame = vec![0u8; size];
        frame[..4].copy_from_slice(&(size as u32).to_be_bytes());
        self.io.read_exact(&mut frame[4..]).await.unwrap();
        Frame::decode(Chunk::from(frame)).unwrap()
    }

    /// The next performative, skipping keep-alives.
    pub async fn read(&mut self) -> (ChannelId, Performative) {
        loop {
            let frame = tokio::time::timeout(TIMEOUT, self.read_frame())
                .await
                .expect("no frame from the engine");
            if let Some(performative) = frame.performative {
                return (frame.channel, performative);
            }
        }
    }

    /// Whatever arrives within `quiet`, stopping at the first silence.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<Performative> {
        let mut frames = Vec::new();
        while let Ok(frame) = tokio::time::timeout(quiet, self.read_frame()).await {
            frames.extend(frame.performative);
        }
        frames
    }

    /// Whether the engine closed its end of the pipe.
    pub async fn at_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            tokio::time::timeout(TIMEOUT, self.io.read(&mut byte)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    pub async fn write(&mut self, channel: ChannelId, performative: impl Into<Performative>) {
        self.write_frame(Frame::new(channel, performative)).await;
    }

    pub async fn write_frame(&mut self, frame: Frame) {
        self.io.write_all(&frame.encode().unwrap()).await.unwrap();
    }

    /// Plays the listener side of the header and Open exchange.
    pub async fn accept(&mut self, open: Open) -> Open {
        assert_eq!(self.read_header().await, ProtocolHeader::AMQP);
        self.write_header(ProtocolHeader::AMQP).await;
        let (_, performative) = self.read().await;
        let Performative::Open(theirs) = performative else {
            panic!("expected Open, got {performative:?}");
        };
        self.write(0, open).await;
        theirs
    }

    /// Answers the engine's next Begin on `channel`.
    pub async fn accept_begin(&mut self, channel: ChannelId, next_outgoing_id: u32) -> Begin {
        let (remote, performative) = self.read().await;
        let Performative::Begin(begin) = performative else {
            panic!("expected Begin, got {performative:?}");
        };
        self.write(
            channel,
            Begin {
                remote_channel: Some(remote),
                next_outgoing_id,
                incoming_window: 100,
                outgoing_window: 100,
                ..Default::default()
            },
        )
        .await;
        begin
    }

    /// Answers the engine's next Attach with the opposite role on `handle`.
    pub async fn accept_attach(&mut self, channel: ChannelId, handle: u32) -> Attach {
        let (_, performative) = self.read().await;
        let Performative::Attach(attach) = performative else {
            panic!("expected Attach, got {performative:?}");
        };
        let role = match attach.role {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        };
        let mut reply = Attach::new(attach.name.clone(), handle, role);
        reply.source = Some(attach.source.clone().unwrap_or_else(|| Source::new("peer")));
        reply.target = Some(attach.target.clone().unwrap_or_else(|| Target::new("peer")));
        if role == Role::Sender {
            reply.initial_delivery_count = Some(0);
        }
        self.write(channel, reply).await;
        attach
    }
}

pub fn open(container_id: &str) -> Open {
    Open {
        container_id: container_id.into(),
        max_frame_size: 64 * 1024,
        channel_max: 15,
        ..Default::default()
    }
}

/// A link Flow granting `link_credit` from `delivery_count`.
pub fn credit(handle: u32, delivery_count: u32, link_credit: u32, next_incoming_id: u32) -> Flow {
    Flow {
        next_incoming_id: Some(next_incoming_id),
        incoming_window: 100,
        next_outgoing_id: 0,
        outgoing_window: 100,
        handle: Some(handle),
        delivery_count: Some(delivery_count),
        link_credit: Some(link_credit),
        ..Default::default()
    }
}
