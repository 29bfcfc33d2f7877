mod common;

use std::time::Duration;

use amqp_engine::{
    AmqpError, BufferList, Connection, ConnectionSettings, Error, ErrorCondition, LinkFactory, LinkSettings,
    SessionFactory, SessionSettings, State,
    protocol::{Attach, Begin, DeliveryTag, Detach, Flow, Frame, Open, Performative, Role, Source, Transfer},
};
use common::*;
use tokio_util::sync::CancellationToken;

struct NoLinks;

impl LinkFactory for NoLinks {
    fn link_settings(&self, _attach: &Attach) -> Result<LinkSettings, AmqpError> {
        Err(AmqpError::new(ErrorCondition::NotAllowed, "no links here"))
    }
}

struct Restricted;

impl SessionFactory for Restricted {
    fn session_settings(&self, _begin: &Begin) -> SessionSettings {
        SessionSettings::default().with_link_factory(NoLinks)
    }
}

fn frame(transfer: Transfer, payload: &[u8]) -> Frame {
    Frame::new(0, transfer).with_payload(payload.to_vec())
}

/// The next Detach from the engine, skipping link Flows.
async fn read_detach(peer: &mut Peer) -> Detach {
    loop {
        match peer.read().await {
            (_, Performative::Detach(detach)) => return detach,
            (_, Performative::Flow(_)) => continue,
            (_, other) => panic!("expected Detach, got {other:?}"),
        }
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refused_link_fails_the_attach() {
    init_tracing();
    let (client, server) = engine_pair(
        ConnectionSettings::new("c"),
        ConnectionSettings::new("s").with_session_factory(Restricted),
    )
    .await;
    let session = client.begin_session(SessionSettings::default()).await.unwrap();
    let _peer = server.accept_session().await.unwrap();

    let err = session.attach_sender(LinkSettings::sender("L1", "q")).await.unwrap_err();
    assert_eq!(err.condition(), Some(&ErrorCondition::NotAllowed));
    // Only the link failed.
    assert_eq!(session.state(), State::Opened);
    client.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dynamic_source_takes_the_peer_address() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let settings = LinkSettings::receiver("reply-to", "ignored").with_source(Source::dynamic());
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), async {
        let (_, performative) = peer.read().await;
        let Performative::Attach(attach) = performative else {
            panic!("expected Attach, got {performative:?}");
        };
        assert!(attach.source.as_ref().is_some_and(|s| s.dynamic && s.address.is_none()));
        let mut reply = Attach::new(attach.name.clone(), 0, Role::Sender);
        reply.source = Some(Source {
            dynamic: true,
            ..Source::new("tmp-queue-1")
        });
        reply.target = attach.target.clone();
        reply.initial_delivery_count = Some(0);
        peer.write(0, reply).await;
    });
    let receiver = receiver.unwrap();
    assert_eq!(
        receiver.source().and_then(|s| s.address).as_deref(),
        Some("tmp-queue-1")
    );
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aborted_delivery_is_discarded() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let settings = LinkSettings::receiver("R1", "q").with_total_link_credit(10);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();
    let (_, performative) = peer.read().await;
    assert!(matches!(performative, Performative::Flow(_)));

    // First half of delivery 0, then the sender gives up on it.
    peer.write_frame(frame(
        Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            more: true,
            ..Default::default()
        },
        b"partial",
    ))
    .await;
    peer.write_frame(frame(
        Transfer {
            handle: 0,
            aborted: true,
            ..Default::default()
        },
        b"",
    ))
    .await;
    // Delivery 2 follows the two transfers of the aborted one.
    peer.write_frame(frame(
        Transfer {
            handle: 0,
            delivery_id: Some(2),
            delivery_tag: Some(DeliveryTag::from(1u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"whole",
    ))
    .await;

    let delivery = receiver.receive(TIMEOUT).await.unwrap().unwrap();
    assert_eq!(delivery.delivery_id(), 2);
    assert_eq!(delivery.payload().to_vec(), b"whole".to_vec());
    assert_eq!(receiver.queued(), 0);
    // The aborted delivery's credit came back.
    assert_eq!(receiver.credit(), 9);
    assert_eq!(receiver.state(), State::Opened);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_receive_leaves_the_delivery_queued() {
    init_tracing();
    let (client, server) = engine_pair(ConnectionSettings::new("c"), ConnectionSettings::new("s")).await;
    let session = client.begin_session(SessionSettings::default()).await.unwrap();
    let peer = server.accept_session().await.unwrap();
    let receiver = session.attach_receiver(LinkSettings::receiver("in", "q")).await.unwrap();
    let sender = peer.accept_link().await.unwrap().into_sender().unwrap();

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    });
    let err = receiver.receive_with_cancel(TIMEOUT, &token).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    sender.transfer(BufferList::from(b"after".to_vec())).await.unwrap();
    let delivery = receiver.receive(TIMEOUT).await.unwrap().unwrap();
    assert_eq!(delivery.payload().to_vec(), b"after".to_vec());
    client.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manual_credit_drain_and_deferred_total() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let settings = LinkSettings::receiver("R1", "q").with_total_link_credit(0);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();
    // No credit, no Flow.
    assert!(peer.drain(Duration::from_millis(200)).await.is_empty());

    receiver.issue_credit(5, true).unwrap();
    let (_, performative) = peer.read().await;
    let Performative::Flow(flow) = performative else {
        panic!("expected Flow, got {performative:?}");
    };
    assert_eq!((flow.link_credit, flow.delivery_count, flow.drain), (Some(5), Some(0), true));

    // The peer has nothing to send and uses the credit up.
    peer.write(
        0,
        Flow {
            drain: true,
            ..credit(0, 5, 0, 0)
        },
    )
    .await;
    wait_until(|| receiver.credit() == 0).await;

    receiver.set_total_link_credit(20, true).unwrap();
    let (_, performative) = peer.read().await;
    let Performative::Flow(flow) = performative else {
        panic!("expected Flow, got {performative:?}");
    };
    assert_eq!((flow.link_credit, flow.delivery_count), (Some(20), Some(5)));

    // A deferred change waits for the next transfer.
    receiver.set_total_link_credit(5, false).unwrap();
    assert!(peer.drain(Duration::from_millis(200)).await.is_empty());
    assert_eq!(receiver.credit(), 20);
    peer.write_frame(frame(
        Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"one",
    ))
    .await;
    receiver.receive(TIMEOUT).await.unwrap().unwrap();
    assert_eq!(receiver.total_link_credit(), 5);
    assert_eq!(receiver.credit(), 4);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_sender_gives_back_drained_credit() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let (sender, _) = tokio::join!(
        session.attach_sender(LinkSettings::sender("L1", "q")),
        peer.accept_attach(0, 0)
    );
    let sender = sender.unwrap();

    peer.write(
        0,
        Flow {
            drain: true,
            ..credit(0, 0, 5, 0)
        },
    )
    .await;
    let (_, performative) = peer.read().await;
    let Performative::Flow(flow) = performative else {
        panic!("expected Flow, got {performative:?}");
    };
    assert_eq!(flow.handle, Some(0));
    assert_eq!((flow.link_credit, flow.delivery_count), (Some(0), Some(5)));
    assert_eq!(sender.credit(), 0);
    assert_eq!(sender.delivery_count(), 5);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_delivery_closes_the_receiver() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let settings = LinkSettings::receiver("R1", "q")
        .with_max_message_size(10)
        .with_total_link_credit(10);
    let (receiver, attach) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();
    assert_eq!(attach.max_message_size, Some(10));

    peer.write_frame(frame(
        Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"thirteen-byte",
    ))
    .await;
    let detach = read_detach(&mut peer).await;
    assert!(detach.closed);
    assert_eq!(
        detach.error.map(|e| e.condition),
        Some(ErrorCondition::MessageSizeExceeded)
    );
    assert_eq!(receiver.queued(), 0);
    // The session survives its link.
    assert_eq!(session.state(), State::Opened);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_delivery_is_ignored_while_closing() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    let settings = LinkSettings::receiver("R1", "q")
        .with_max_message_size(10)
        .with_total_link_credit(10);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();

    // The transfer was in flight when the engine detached.
    let (closed, _) = tokio::join!(receiver.close(), async {
        let detach = read_detach(&mut peer).await;
        assert!(detach.closed && detach.error.is_none());
        peer.write_frame(frame(
            Transfer {
                handle: 0,
                delivery_id: Some(0),
                delivery_tag: Some(DeliveryTag::from(0u64)),
                message_format: Some(0),
                ..Default::default()
            },
            b"thirteen-byte",
        ))
        .await;
        peer.write(
            0,
            Detach {
                handle: 0,
                closed: true,
                error: None,
            },
        )
        .await;
    });
    closed.unwrap();
    assert!(receiver.is_closed());
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delivery_tag_too_large_for_the_frame() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let small = Open {
        max_frame_size: 512,
        ..open("peer")
    };
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(small));
    let connection = connection.unwrap();
    assert_eq!(connection.max_frame_size(), 512);
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();
    let (sender, _) = tokio::join!(
        session.attach_sender(LinkSettings::sender("L1", "q")),
        peer.accept_attach(0, 0)
    );
    let sender = sender.unwrap();

    let err = sender
        .transfer_with_tag(vec![7u8; 600], BufferList::from(b"body".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.condition(), Some(&ErrorCondition::FrameSizeTooSmall));
    // Nothing reached the wire and the link is still usable.
    assert!(peer.drain(Duration::from_millis(200)).await.is_empty());
    assert_eq!(sender.state(), State::Opened);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transfer_on_unattached_handle_ends_the_session() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(SessionSettings::default()), peer.accept_begin(0, 0));
    let session = session.unwrap();

    peer.write_frame(frame(
        Transfer {
            handle: 7,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"stray",
    ))
    .await;
    let (_, performative) = peer.read().await;
    let Performative::End(end) = performative else {
        panic!("expected End, got {performative:?}");
    };
    assert_eq!(end.error.map(|e| e.condition), Some(ErrorCondition::UnattachedHandle));
    assert_ne!(session.state(), State::Opened);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lenient_session_drops_frames_for_unattached_handles() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(
        connection.begin_session(SessionSettings::default().with_ignore_missing_links(true)),
        peer.accept_begin(0, 0)
    );
    let session = session.unwrap();

    peer.write_frame(frame(
        Transfer {
            handle: 7,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"stray",
    ))
    .await;
    peer.write(0, credit(7, 0, 10, 0)).await;
    assert!(peer.drain(Duration::from_millis(200)).await.is_empty());
    assert_eq!(session.state(), State::Opened);

    // A link attached afterwards works normally.
    let (receiver, _) = tokio::join!(
        session.attach_receiver(LinkSettings::receiver("R1", "q").with_total_link_credit(1)),
        peer.accept_attach(0, 0)
    );
    assert_eq!(receiver.unwrap().state(), State::Opened);
    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removed_link_gives_back_its_session_window() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(
        connection.begin_session(SessionSettings::default().with_incoming_window(1)),
        peer.accept_begin(0, 0)
    );
    let session = session.unwrap();

    let settings = LinkSettings::receiver("R1", "q").with_total_link_credit(1);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();
    peer.write_frame(frame(
        Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(DeliveryTag::from(0u64)),
            message_format: Some(0),
            ..Default::default()
        },
        b"kept",
    ))
    .await;
    // Received but never settled: it holds the only window slot.
    receiver.receive(TIMEOUT).await.unwrap().unwrap();

    let (closed, flow) = tokio::join!(receiver.close(), async {
        read_detach(&mut peer).await;
        peer.write(
            0,
            Detach {
                handle: 0,
                closed: true,
                error: None,
            },
        )
        .await;
        loop {
            if let (_, Performative::Flow(flow)) = peer.read().await
                && flow.handle.is_none()
            {
                return flow;
            }
        }
    });
    closed.unwrap();
    assert_eq!((flow.incoming_window, flow.next_incoming_id), (1, Some(1)));
    assert_eq!(session.state(), State::Opened);
    connection.abort();
}
