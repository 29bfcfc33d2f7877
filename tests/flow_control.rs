mod common;

use std::time::{Duration, Instant};

use amqp_engine::{
    AmqpError, BufferList, Connection, ConnectionSettings, ErrorCondition, LinkSettings, Session, SessionSettings,
    protocol::{Close, DeliveryState, DeliveryTag, Frame, Performative, Role, Transfer},
};
use common::*;

/// An engine connection and session talking to a scripted peer.
async fn engine_with_peer(
    settings: ConnectionSettings,
    session: SessionSettings,
    next_outgoing_id: u32,
) -> (Connection, Session, Peer) {
    let (io, mut peer) = Peer::new();
    let (connection, _) = tokio::join!(Connection::open(io, settings), peer.accept(open("peer")));
    let connection = connection.unwrap();
    let (session, _) = tokio::join!(connection.begin_session(session), peer.accept_begin(0, next_outgoing_id));
    (connection, session.unwrap(), peer)
}

fn transfer(id: u32) -> Frame {
    Frame::new(
        0,
        Transfer {
            handle: 0,
            delivery_id: Some(id),
            delivery_tag: Some(DeliveryTag::from(u64::from(id))),
            message_format: Some(0),
            settled: Some(false),
            ..Default::default()
        },
    )
    .with_payload(format!("message {id}").into_bytes())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sends_beyond_credit_wait_for_flow() {
    init_tracing();
    let (connection, session, mut peer) =
        engine_with_peer(ConnectionSettings::new("engine"), SessionSettings::default(), 0).await;

    let (sender, _) = tokio::join!(
        session.attach_sender(LinkSettings::sender("L1", "queue")),
        peer.accept_attach(0, 0)
    );
    let sender = sender.unwrap();
    peer.write(0, credit(0, 0, 10, 0)).await;

    let task = tokio::spawn({
        let sender = sender.clone();
        async move {
            let mut trackers = Vec::new();
            for i in 0..11u32 {
                trackers.push(sender.transfer(BufferList::from(i.to_be_bytes().to_vec())).await.unwrap());
            }
            trackers
        }
    });

    for id in 0..10 {
        let (_, performative) = peer.read().await;
        let Performative::Transfer(t) = performative else {
            panic!("expected Transfer, got {performative:?}");
        };
        assert_eq!(t.delivery_id, Some(id));
    }
    // The eleventh is held back until credit arrives.
    assert!(peer.drain(Duration::from_millis(300)).await.is_empty());
    assert_eq!(sender.credit(), 0);
    assert!(!task.is_finished());

    peer.write(0, credit(0, 10, 1, 10)).await;
    let (_, performative) = peer.read().await;
    let Performative::Transfer(t) = performative else {
        panic!("expected Transfer, got {performative:?}");
    };
    assert_eq!(t.delivery_id, Some(10));
    let trackers = task.await.unwrap();
    assert_eq!(trackers.len(), 11);
    assert_eq!(sender.delivery_count(), 11);

    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn credit_flows_back_at_threshold() {
    init_tracing();
    let session_settings = SessionSettings::default().with_dispatcher(Duration::ZERO, 1);
    let (connection, session, mut peer) =
        engine_with_peer(ConnectionSettings::new("engine"), session_settings, 0).await;

    let settings = LinkSettings::receiver("R1", "queue")
        .with_total_link_credit(10)
        .with_flow_threshold(7);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();

    let (_, performative) = peer.read().await;
    let Performative::Flow(flow) = performative else {
        panic!("expected Flow, got {performative:?}");
    };
    assert_eq!(flow.link_credit, Some(10));

    for id in 0..7 {
        peer.write_frame(transfer(id)).await;
    }
    let mut deliveries = Vec::new();
    for _ in 0..7 {
        deliveries.push(receiver.receive(TIMEOUT).await.unwrap().unwrap());
    }
    assert_eq!(receiver.credit(), 3);

    for delivery in &deliveries[..6] {
        receiver.accept(delivery).unwrap();
    }
    let frames = peer.drain(Duration::from_millis(300)).await;
    assert_eq!(frames.len(), 6);
    assert!(frames.iter().all(|p| matches!(p, Performative::Disposition(_))));

    receiver.accept(&deliveries[6]).unwrap();
    let frames = peer.drain(Duration::from_millis(300)).await;
    let flows: Vec<_> = frames
        .iter()
        .filter_map(|p| match p {
            Performative::Flow(flow) => Some(flow),
            _ => None,
        })
        .collect();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].handle, Some(0));
    assert_eq!(flows[0].link_credit, Some(10));
    assert_eq!(flows[0].delivery_count, Some(7));

    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contiguous_settlements_share_one_disposition() {
    init_tracing();
    let session_settings = SessionSettings::default().with_dispatcher(Duration::from_millis(50), 64);
    // The peer numbers its deliveries from 5.
    let (connection, session, mut peer) =
        engine_with_peer(ConnectionSettings::new("engine"), session_settings, 5).await;

    let (receiver, _) = tokio::join!(
        session.attach_receiver(LinkSettings::receiver("R1", "queue")),
        peer.accept_attach(0, 0)
    );
    let receiver = receiver.unwrap();
    let (_, performative) = peer.read().await;
    assert!(matches!(performative, Performative::Flow(_)));

    for id in 5..10 {
        peer.write_frame(transfer(id)).await;
    }
    let mut deliveries = Vec::new();
    for id in 5..10 {
        let delivery = receiver.receive(TIMEOUT).await.unwrap().unwrap();
        assert_eq!(delivery.delivery_id(), id);
        deliveries.push(delivery);
    }

    for delivery in &deliveries[..3] {
        receiver.accept(delivery).unwrap();
    }
    let (_, performative) = peer.read().await;
    let Performative::Disposition(d) = performative else {
        panic!("expected Disposition, got {performative:?}");
    };
    assert_eq!((d.role, d.first, d.last, d.settled), (Role::Receiver, 5, Some(7), true));
    assert_eq!(d.state, Some(DeliveryState::Accepted));

    // A different outcome closes the run: two frames.
    receiver.accept(&deliveries[3]).unwrap();
    receiver
        .reject(&deliveries[4], AmqpError::new(ErrorCondition::DecodeError, "bad body"))
        .unwrap();
    let (_, first) = peer.read().await;
    let (_, second) = peer.read().await;
    let (Performative::Disposition(first), Performative::Disposition(second)) = (first, second) else {
        panic!("expected two Dispositions");
    };
    assert_eq!((first.first, first.last), (8, None));
    assert_eq!(first.state, Some(DeliveryState::Accepted));
    assert_eq!((second.first, second.last), (9, None));
    assert!(matches!(second.state, Some(DeliveryState::Rejected { .. })));

    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transfer_without_credit_closes_the_link() {
    init_tracing();
    let (connection, session, mut peer) =
        engine_with_peer(ConnectionSettings::new("engine"), SessionSettings::default(), 0).await;

    let settings = LinkSettings::receiver("R1", "queue").with_total_link_credit(0);
    let (receiver, _) = tokio::join!(session.attach_receiver(settings), peer.accept_attach(0, 0));
    let receiver = receiver.unwrap();

    peer.write_frame(transfer(0)).await;
    let (_, performative) = peer.read().await;
    let Performative::Detach(detach) = performative else {
        panic!("expected Detach, got {performative:?}");
    };
    assert!(detach.closed);
    assert_eq!(
        detach.error.map(|e| e.condition),
        Some(ErrorCondition::TransferLimitExceeded)
    );
    assert_eq!(receiver.queued(), 0);

    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_peer_is_disconnected() {
    init_tracing();
    let settings = ConnectionSettings::new("engine").with_idle_timeout(Duration::from_millis(500));
    let (io, mut peer) = Peer::new();
    let (connection, theirs) = tokio::join!(Connection::open(io, settings), peer.accept(open("peer")));
    let connection = connection.unwrap();
    assert_eq!(theirs.idle_time_out, Some(500));

    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    connection.on_closed(move |error| {
        let _ = closed_tx.send(error.map(|e| e.condition.clone()));
    });

    let started = Instant::now();
    let (_, performative) = peer.read().await;
    let Performative::Close(close) = performative else {
        panic!("expected Close, got {performative:?}");
    };
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(close.error.map(|e| e.condition), Some(ErrorCondition::ConnectionForced));

    peer.write(0, Close::default()).await;
    let condition = tokio::time::timeout(TIMEOUT, closed_rx).await.unwrap().unwrap();
    assert_eq!(condition, Some(ErrorCondition::ConnectionForced));
    assert!(connection.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keep_alive_at_seven_eighths_of_peer_timeout() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let mut theirs = open("peer");
    theirs.idle_time_out = Some(5000);
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(theirs));
    let connection = connection.unwrap();

    let started = Instant::now();
    let frame = tokio::time::timeout(Duration::from_secs(6), peer.read_frame())
        .await
        .expect("no keep-alive");
    let elapsed = started.elapsed();
    assert!(frame.is_empty());
    assert!(elapsed >= Duration::from_millis(4000), "keep-alive after {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(4600), "keep-alive after {elapsed:?}");

    connection.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_idle_timeout_below_minimum_is_refused() {
    init_tracing();
    let (io, mut peer) = Peer::new();
    let mut theirs = open("peer");
    theirs.idle_time_out = Some(1000);
    let (connection, _) = tokio::join!(Connection::open(io, ConnectionSettings::new("engine")), peer.accept(theirs));
    let err = connection.unwrap_err();
    assert_eq!(err.condition(), Some(&ErrorCondition::NotAllowed));

    let (_, performative) = peer.read().await;
    let Performative::Close(close) = performative else {
        panic!("expected Close, got {performative:?}");
    };
    assert_eq!(close.error.map(|e| e.condition), Some(ErrorCondition::NotAllowed));
}
