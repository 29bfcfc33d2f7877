use core::fmt;
use std::{collections::HashMap, sync::Arc};

use tokio::sync::oneshot;
use tracing::trace;

use super::{
    LinkInner, LinkSettings, RoleState,
    credit::SenderCredit,
    delivery::{DeliveryTracker, OutcomeSender},
};
use crate::{
    buffers::BufferList,
    codec::frame::head_len,
    endpoint::State,
    error::{AmqpError, Error, ErrorCondition, Result},
    protocol::{DeliveryState, DeliveryTag, Handle, Performative, SenderSettleMode, Source, Target, Transfer},
    session::SessionInner,
};

pub(crate) struct SenderState {
    pub(super) credit: SenderCredit,
    next_tag: u64,
    /// Outcome slots of unsettled deliveries, by tag.
    pub(super) unsettled: HashMap<DeliveryTag, OutcomeSender>,
}

impl SenderState {
    pub(super) fn new(settings: &LinkSettings) -> Self {
        Self {
            credit: SenderCredit::new(settings.initial_delivery_count),
            next_tag: 0,
            unsettled: HashMap::new(),
        }
    }
}

/// The sending end of a link.
///
/// Cloning yields another handle to the same link. Concurrent transfers on
/// one link are serialized: the frames of a delivery are never interleaved
/// with another delivery's.
#[derive(Clone)]
pub struct SenderLink {
    inner: Arc<LinkInner>,
}

impl SenderLink {
    pub(crate) fn new(inner: Arc<LinkInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle()
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.object.is_closed()
    }

    pub fn source(&self) -> Option<Source> {
        self.inner.source()
    }

    /// The target, with a dynamic address resolved by the peer.
    pub fn target(&self) -> Option<Target> {
        self.inner.target()
    }

    /// The negotiated message size limit. Zero is unlimited.
    pub fn max_message_size(&self) -> u64 {
        self.inner.max_message_size()
    }

    /// Credit left from the receiver's last grant.
    pub fn credit(&self) -> u32 {
        self.with_state(|s| s.credit.credit())
    }

    pub fn delivery_count(&self) -> u32 {
        self.with_state(|s| s.credit.delivery_count())
    }

    /// Deliveries sent and not yet settled by the peer.
    pub fn unsettled(&self) -> usize {
        self.with_state(|s| s.unsettled.len())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SenderState) -> T) -> T {
        let mut state = self.inner.state.lock();
        match &mut state.role {
            RoleState::Sender(sender) => f(sender),
            RoleState::Receiver(_) => unreachable!("sender link with receiver state"),
        }
    }

    /// Sends `payload` as one delivery with a generated tag.
    ///
    /// Waits for link credit and session window. The returned tracker
    /// resolves with the peer's outcome.
    pub async fn transfer(&self, payload: impl Into<BufferList>) -> Result<DeliveryTracker> {
        let tag = self.with_state(|s| {
            let tag = s.next_tag;
            s.next_tag = s.next_tag.wrapping_add(1);
            DeliveryTag::from(tag)
        });
        self.transfer_with_tag(tag, payload).await
    }

    /// Sends `payload` as one delivery tagged `tag`, which must not belong to
    /// another unsettled delivery of this link.
    pub async fn transfer_with_tag(
        &self,
        tag: impl Into<DeliveryTag>,
        payload: impl Into<BufferList>,
    ) -> Result<DeliveryTracker> {
        let inner = &self.inner;
        let tag = tag.into();
        let payload = payload.into();

        let _guard = inner.send_lock.lock().await;
        inner.object.check_active()?;
        let session = inner.session()?;

        let max_message_size = inner.max_message_size();
        if max_message_size != 0 && payload.len() as u64 > max_message_size {
            return Err(Error::amqp(
                ErrorCondition::MessageSizeExceeded,
                format!("{} bytes exceed the limit of {max_message_size}", payload.len()),
            ));
        }

        let settled = inner.settings.snd_settle_mode == SenderSettleMode::Settled;
        let first = Transfer {
            handle: inner.handle,
            // Widest encoding of the id the session assigns.
            delivery_id: Some(u32::MAX),
            delivery_tag: Some(tag.clone()),
            message_format: Some(0),
            settled: Some(settled),
            more: true,
            ..Default::default()
        };
        let max_frame_size = session.max_frame_size() as usize;
        let overhead = head_len(Some(&Performative::Transfer(first.clone())));
        if overhead >= max_frame_size {
            return Err(Error::amqp(
                ErrorCondition::FrameSizeTooSmall,
                format!("a transfer needs {overhead} bytes of a {max_frame_size} byte frame"),
            ));
        }
        let room = max_frame_size - overhead;

        let admitted = inner
            .signal
            .wait_until(|| {
                if inner.object.is_closing() {
                    return Some(Err(inner.object.closed_error()));
                }
                let mut state = inner.state.lock();
                let RoleState::Sender(sender) = &mut state.role else {
                    return Some(Err(Error::amqp(ErrorCondition::IllegalState, "not a sender")));
                };
                if !settled && sender.unsettled.contains_key(&tag) {
                    return Some(Err(Error::amqp(
                        ErrorCondition::InvalidField,
                        format!("delivery tag {tag:?} is in use"),
                    )));
                }
                if !sender.credit.try_consume() {
                    return None;
                }
                if settled {
                    return Some(Ok(None));
                }
                let (tx, rx) = oneshot::channel();
                sender.unsettled.insert(tag.clone(), tx);
                Some(Ok(Some(rx)))
            })
            .await
            .unwrap_or_else(|| Err(inner.object.closed_error()))?;

        let res = self.send_frames(&session, first, payload, room).await;
        let id = match res {
            Ok(id) => id,
            Err(e) => {
                self.with_state(|s| s.unsettled.remove(&tag));
                return Err(e);
            }
        };
        trace!("{}: sent delivery {id} ({tag:?})", inner.object.name());

        self.drain_after_send();
        Ok(match admitted {
            Some(rx) => DeliveryTracker::new(id, tag, rx),
            None => DeliveryTracker::settled(id, tag),
        })
    }

    /// Streams `payload` over as many Transfer frames as it takes. Only the
    /// first frame carries the delivery's metadata.
    async fn send_frames(
        &self,
        session: &Arc<SessionInner>,
        first: Transfer,
        payload: BufferList,
        room: usize,
    ) -> Result<u32> {
        let len = payload.len();
        let mut offset = 0;
        let mut transfer = Some(first);
        let mut id = None;
        loop {
            let end = len.min(offset + room);
            let more = end < len;
            let fragment = payload.view(offset..end).unwrap_or_default();
            let mut frame = transfer.take().unwrap_or_else(|| Transfer {
                handle: self.inner.handle,
                ..Default::default()
            });
            frame.more = more;
            let transfer_id = session.send_transfer(&self.inner, frame, fragment).await?;
            id.get_or_insert(transfer_id);
            offset = end;
            if !more {
                break;
            }
        }
        Ok(id.unwrap_or_default())
    }

    /// A drain request that arrived during a send is served once it ends.
    fn drain_after_send(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let drained = match &mut state.role {
            RoleState::Sender(sender) => sender.credit.drain(),
            RoleState::Receiver(_) => false,
        };
        if drained && let Err(e) = inner.send_flow_locked(&mut state, false) {
            drop(state);
            inner.fail(e);
        }
    }

    /// Sends `payload` and waits for the peer's outcome.
    pub async fn send(&self, payload: impl Into<BufferList>) -> Result<DeliveryState> {
        self.transfer(payload).await?.outcome().await
    }

    /// Detaches the link and waits for the peer's Detach.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        self.inner.on_closed(f);
    }
}

impl fmt::Debug for SenderLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderLink")
            .field("name", &self.name())
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish()
    }
}
