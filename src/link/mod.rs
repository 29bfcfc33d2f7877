//! Links: unidirectional, credit-controlled delivery streams within a
//! session.
//!
//! A link is either a [`SenderLink`] or a [`ReceiverLink`]. Both wrap the
//! same [`LinkInner`], which carries the attach/detach lifecycle and the
//! role-specific state: credit and outcome trackers for a sender,
//! reassembly and the receive queue for a receiver.
//!
//! Lock order: a link may hold its own lock while it takes its session's
//! lock to send a frame. The session never calls into a link while it holds
//! its own lock.
mod credit;
mod delivery;
mod receiver;
mod sender;
mod settings;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

pub use delivery::{Delivery, DeliveryTracker};
pub use receiver::ReceiverLink;
pub(crate) use receiver::ReceiverState;
pub use sender::SenderLink;
pub(crate) use sender::SenderState;
pub use settings::LinkSettings;

use crate::{
    buffers::BufferList,
    endpoint::{self, AmqpObject, Lifecycle, Operation, State},
    error::{AmqpError, Error, Result},
    protocol::{
        Attach, DeliveryNumber, DeliveryState, DeliveryTag, Detach, Flow, Handle, Role, Source, Target, Transfer,
    },
    session::SessionInner,
    sync::Signal,
};

/// A link attached by the peer, as returned by
/// [`Session::accept_link`](crate::Session::accept_link).
#[derive(Debug, Clone)]
pub enum Link {
    Sender(SenderLink),
    Receiver(ReceiverLink),
}

impl Link {
    pub fn name(&self) -> &str {
        match self {
            Link::Sender(s) => s.name(),
            Link::Receiver(r) => r.name(),
        }
    }

    pub fn into_sender(self) -> Option<SenderLink> {
        match self {
            Link::Sender(s) => Some(s),
            Link::Receiver(_) => None,
        }
    }

    pub fn into_receiver(self) -> Option<ReceiverLink> {
        match self {
            Link::Receiver(r) => Some(r),
            Link::Sender(_) => None,
        }
    }
}

pub(crate) enum RoleState {
    Sender(SenderState),
    Receiver(ReceiverState),
}

pub(crate) struct LinkState {
    remote_handle: Option<Handle>,
    source: Option<Source>,
    target: Option<Target>,
    /// A dynamic terminus takes the peer's address only once.
    address_resolved: bool,
    /// Negotiated limit. Zero is unlimited.
    max_message_size: u64,
    /// The peer attached without a terminus: a Detach with the reason follows.
    refused: bool,
    role: RoleState,
}

pub(crate) struct LinkInner {
    object: AmqpObject,
    settings: LinkSettings,
    session: Weak<SessionInner>,
    handle: Handle,
    state: Mutex<LinkState>,
    /// Wakes senders waiting for credit.
    signal: Signal,
    /// Keeps the frames of one delivery contiguous.
    send_lock: async_mutex::Mutex<()>,
}

fn min_nonzero(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

impl LinkInner {
    pub(crate) fn new(session: Weak<SessionInner>, channel: u16, settings: LinkSettings, handle: Handle) -> Self {
        let role = match settings.role {
            Role::Sender => RoleState::Sender(SenderState::new(&settings)),
            Role::Receiver => RoleState::Receiver(ReceiverState::new(&settings)),
        };
        Self {
            object: AmqpObject::new(format!("{} link '{}' (ch={channel} h={handle})", settings.role, settings.name)),
            state: Mutex::new(LinkState {
                remote_handle: None,
                source: settings.source.clone(),
                target: settings.target.clone(),
                address_resolved: false,
                max_message_size: settings.max_message_size,
                refused: false,
                role,
            }),
            settings,
            session,
            handle,
            signal: Signal::new(),
            send_lock: async_mutex::Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.settings.name
    }

    pub(crate) fn role(&self) -> Role {
        self.settings.role
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn remote_handle(&self) -> Option<Handle> {
        self.state.lock().remote_handle
    }

    fn session(&self) -> Result<Arc<SessionInner>> {
        self.session.upgrade().ok_or_else(|| self.object.closed_error())
    }

    fn attach_frame(&self, state: &LinkState) -> Attach {
        let mut attach = Attach::new(self.settings.name.clone(), self.handle, self.settings.role);
        attach.snd_settle_mode = self.settings.snd_settle_mode;
        attach.rcv_settle_mode = self.settings.rcv_settle_mode;
        attach.source = state.source.clone();
        attach.target = state.target.clone();
        attach.max_message_size = (self.settings.max_message_size != 0).then_some(self.settings.max_message_size);
        attach.properties = self.settings.properties.clone();
        if let RoleState::Sender(sender) = &state.role {
            attach.initial_delivery_count = Some(sender.credit.delivery_count());
        }
        attach
    }

    /// Sends this link's flow state, carrying the session's. The link lock
    /// is held so flows leave in the order their state was computed.
    fn send_flow_locked(&self, state: &mut LinkState, echo: bool) -> Result<()> {
        let mut flow = Flow {
            handle: Some(self.handle),
            echo,
            ..Default::default()
        };
        match &mut state.role {
            RoleState::Sender(sender) => {
                flow.delivery_count = Some(sender.credit.delivery_count());
                flow.link_credit = Some(sender.credit.credit());
                flow.drain = sender.credit.is_draining();
            }
            RoleState::Receiver(receiver) => {
                flow.delivery_count = Some(receiver.credit.delivery_count());
                flow.link_credit = Some(receiver.credit.credit());
                flow.drain = receiver.credit.is_draining();
                receiver.credit.flow_sent();
            }
        }
        self.session()?.send_flow(Some(flow))
    }

    fn fail(self: &Arc<Self>, error: Error) {
        endpoint::safe_close(self, error.to_amqp());
    }

    /// The peer's Attach: a reply to ours, or a new link it initiated.
    pub(crate) fn on_attach(self: &Arc<Self>, attach: Attach) -> Result<()> {
        let (_, to) = self.object.transition(Operation::ReceiveOpen)?;
        let refused = {
            let mut state = self.state.lock();
            state.remote_handle = Some(attach.handle);
            state.max_message_size = min_nonzero(self.settings.max_message_size, attach.max_message_size.unwrap_or(0));

            let resolve = !state.address_resolved;
            state.refused = match self.settings.role {
                Role::Sender => {
                    if let (Some(local), Some(remote)) = (state.target.as_mut(), attach.target.as_ref())
                        && local.dynamic
                        && resolve
                    {
                        local.address = remote.address.clone();
                        state.address_resolved = true;
                    }
                    attach.target.is_none()
                }
                Role::Receiver => {
                    if let (Some(local), Some(remote)) = (state.source.as_mut(), attach.source.as_ref())
                        && local.dynamic
                        && resolve
                    {
                        local.address = remote.address.clone();
                        state.address_resolved = true;
                    }
                    attach.source.is_none()
                }
            };
            if let RoleState::Receiver(receiver) = &mut state.role {
                receiver.credit.on_attach(attach.initial_delivery_count);
            }
            debug!(
                "{}: attached as remote handle {}, max message size {}",
                self.object.name(),
                attach.handle,
                state.max_message_size
            );
            state.refused
        };

        if to == State::OpenReceived {
            self.open_internal()?;
        }
        if refused {
            debug!("{}: peer attached without a terminus", self.object.name());
            return Ok(());
        }
        if self.object.state() == State::Opened {
            self.object.opened().complete(None);
            let mut state = self.state.lock();
            if let RoleState::Receiver(receiver) = &state.role
                && receiver.credit.credit() > 0
            {
                self.send_flow_locked(&mut state, false)?;
            }
        }
        Ok(())
    }

    pub(crate) fn on_flow(self: &Arc<Self>, flow: Flow) {
        let res = {
            let mut state = self.state.lock();
            let mut echo = flow.echo;
            match &mut state.role {
                RoleState::Sender(sender) => {
                    sender.credit.on_flow(&flow);
                    // Nothing to send now: the unused credit is given back.
                    if self.send_lock.try_lock().is_some() && sender.credit.drain() {
                        echo = true;
                    }
                }
                RoleState::Receiver(receiver) => receiver.credit.on_flow(&flow),
            }
            if echo { self.send_flow_locked(&mut state, false) } else { Ok(()) }
        };
        self.signal.notify();
        if let Err(e) = res {
            self.fail(e);
        }
    }

    /// A frame of an incoming delivery. `id` is the delivery-id recorded by
    /// the session from the first frame.
    pub(crate) fn on_transfer(self: &Arc<Self>, id: DeliveryNumber, transfer: Transfer, payload: BufferList) {
        if let Err(e) = self.receive_transfer(id, transfer, payload) {
            self.fail(e);
        }
    }

    /// The peer's outcome for a delivery this link sent.
    pub(crate) fn on_outcome(&self, tag: &DeliveryTag, state: Option<DeliveryState>) {
        let mut link = self.state.lock();
        if let RoleState::Sender(sender) = &mut link.role
            && let Some(tx) = sender.unsettled.remove(tag)
        {
            let _ = tx.send(Ok(state.unwrap_or(DeliveryState::Accepted)));
        }
    }

    pub(crate) fn on_detach(self: &Arc<Self>, detach: Detach) {
        if let Some(error) = detach.error {
            self.object.set_terminal(error);
        }
        match self.object.transition(Operation::ReceiveClose) {
            Ok((_, State::CloseReceived)) => {
                if let Err(e) = self.close_internal() {
                    debug!("{}: detach reply failed: {e}", self.object.name());
                    endpoint::abort(self);
                    return;
                }
            }
            Ok(_) => {}
            Err(_) => {
                endpoint::abort(self);
                return;
            }
        }
        endpoint::finish_if_ended(self);
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        endpoint::close(self, self.settings.operation_timeout).await
    }

    pub(crate) fn abort(self: &Arc<Self>) {
        endpoint::abort(self);
    }

    pub(crate) fn on_closed<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        self.object.closed().on_complete(f);
    }

    pub(crate) fn state(&self) -> State {
        self.object.state()
    }

    pub(crate) fn source(&self) -> Option<Source> {
        self.state.lock().source.clone()
    }

    pub(crate) fn target(&self) -> Option<Target> {
        self.state.lock().target.clone()
    }

    pub(crate) fn max_message_size(&self) -> u64 {
        self.state.lock().max_message_size
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.settings.operation_timeout
    }
}

impl Lifecycle for LinkInner {
    fn object(&self) -> &AmqpObject {
        &self.object
    }

    fn close_timeout(&self) -> Duration {
        self.settings.operation_timeout
    }

    fn open_internal(&self) -> Result<()> {
        let session = self.session()?;
        let state = self.state.lock();
        self.object.transition(Operation::SendOpen)?;
        session.send(self.attach_frame(&state))
    }

    fn close_internal(&self) -> Result<()> {
        let session = self.session()?;
        self.object.transition(Operation::SendClose)?;
        session.send(Detach {
            handle: self.handle,
            closed: true,
            error: self.object.terminal().cloned(),
        })
    }

    fn abort_internal(&self) {
        self.signal.close();
    }

    fn release(&self) {
        if let Some(session) = self.session.upgrade() {
            session.remove_link(self.handle, self.remote_handle());
        }
        let error = self.object.closed_error();
        let mut state = self.state.lock();
        match &mut state.role {
            RoleState::Sender(sender) => {
                for (_, tx) in sender.unsettled.drain() {
                    let _ = tx.send(Err(Error::closed(self.object.name(), self.object.terminal().cloned())));
                }
            }
            // Pending receives see their reply slot dropped.
            RoleState::Receiver(receiver) => receiver.waiters.clear(),
        }
        drop(state);
        debug!("{}: released ({error})", self.object.name());
        self.signal.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_message_size_takes_smallest_limit() {
        assert_eq!(min_nonzero(0, 0), 0);
        assert_eq!(min_nonzero(0, 1024), 1024);
        assert_eq!(min_nonzero(4096, 0), 4096);
        assert_eq!(min_nonzero(4096, 1024), 1024);
    }
}
