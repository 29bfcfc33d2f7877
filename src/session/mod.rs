//! Sessions: ordered, flow-controlled frame sequences multiplexed on one
//! connection channel.
//!
//! A session owns the transfer windows shared by its links, the handle
//! tables that route Attach, Flow, Transfer and Detach frames to links, and
//! the unsettled deliveries of both directions, keyed by delivery-id.
//! Settlements are merged into Disposition ranges by a batcher whose timer
//! fires through the connection's control channel.
mod disposition;
mod settings;
mod window;

use core::fmt;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use self::{
    disposition::DispositionBatcher,
    window::{IncomingWindow, OutgoingWindow},
};
pub use self::settings::*;
use crate::{
    buffers::BufferList,
    collections::{HandleTable, UnsettledMap},
    connection::{ConnectionInner, Control},
    endpoint::{self, AmqpObject, Lifecycle, Operation, State},
    error::{AmqpError, Error, ErrorCondition, Result},
    io::writer::FrameWriter,
    link::{Link, LinkInner, LinkSettings, ReceiverLink, SenderLink},
    protocol::{
        Attach, Begin, ChannelId, DeliveryNumber, DeliveryState, DeliveryTag, Detach, Disposition, End, Flow, Handle,
        Performative, Role, Transfer, constants::MIN_MAX_FRAME_SIZE,
    },
    sync::Signal,
};

/// A delivery this session sent and the peer has not settled.
struct Outgoing {
    link: Arc<LinkInner>,
    tag: DeliveryTag,
}

/// A delivery this session received and has not settled.
struct Incoming {
    link: Arc<LinkInner>,
    /// Transfer frames it took, given back to the window on settlement.
    frames: u32,
}

/// A delivery whose frames are still arriving, by remote handle.
struct Receiving {
    id: DeliveryNumber,
    frames: u32,
    settled: bool,
}

struct SessionState {
    remote_channel: Option<ChannelId>,
    outgoing: OutgoingWindow,
    incoming: IncomingWindow,
    local_links: HandleTable<Arc<LinkInner>>,
    remote_links: HandleTable<Arc<LinkInner>>,
    /// Local handle of each link, by name.
    names: HashMap<String, Handle>,
    unsettled_out: UnsettledMap<Outgoing>,
    unsettled_in: UnsettledMap<Incoming>,
    receiving: HashMap<Handle, Receiving>,
    batcher: DispositionBatcher,
    flush_armed: bool,
}

enum TrySend {
    Sent(u32),
    Blocked(Transfer, BufferList),
}

pub(crate) struct SessionInner {
    object: AmqpObject,
    settings: SessionSettings,
    connection: Weak<ConnectionInner>,
    writer: Arc<FrameWriter>,
    control: mpsc::UnboundedSender<Control>,
    runtime: tokio::runtime::Handle,
    local_channel: ChannelId,
    state: Mutex<SessionState>,
    /// Wakes transfers waiting for outgoing window.
    capacity: Signal,
    accepted: Mutex<VecDeque<Link>>,
    accept_signal: Signal,
}

impl SessionInner {
    pub(crate) fn new(
        connection: Weak<ConnectionInner>,
        writer: Arc<FrameWriter>,
        control: mpsc::UnboundedSender<Control>,
        runtime: tokio::runtime::Handle,
        local_channel: ChannelId,
        remote_channel: Option<ChannelId>,
        settings: SessionSettings,
    ) -> Self {
        let state = SessionState {
            remote_channel,
            outgoing: OutgoingWindow::new(0, settings.outgoing_window),
            incoming: IncomingWindow::new(settings.incoming_window),
            local_links: HandleTable::new(settings.handle_max),
            remote_links: HandleTable::new(settings.handle_max),
            names: HashMap::new(),
            unsettled_out: UnsettledMap::new(),
            unsettled_in: UnsettledMap::new(),
            receiving: HashMap::new(),
            batcher: DispositionBatcher::new(settings.dispatcher_interval, settings.dispatcher_threshold),
            flush_armed: false,
        };
        Self {
            object: AmqpObject::new(format!("session {local_channel}")),
            settings,
            connection,
            writer,
            control,
            runtime,
            local_channel,
            state: Mutex::new(state),
            capacity: Signal::new(),
            accepted: Mutex::new(VecDeque::new()),
            accept_signal: Signal::new(),
        }
    }

    pub(crate) fn local_channel(&self) -> ChannelId {
        self.local_channel
    }

    pub(crate) fn remote_channel(&self) -> Option<ChannelId> {
        self.state.lock().remote_channel
    }

    pub(crate) fn set_remote_channel(&self, channel: ChannelId) {
        self.state.lock().remote_channel = Some(channel);
    }

    pub(crate) fn max_frame_size(&self) -> u32 {
        self.connection
            .upgrade()
            .map_or(MIN_MAX_FRAME_SIZE, |c| c.max_frame_size())
    }

    /// Sends a frame without payload on this session's channel.
    pub(crate) fn send(&self, performative: impl Into<Performative>) -> Result<()> {
        self.writer
            .send(self.local_channel, performative.into(), BufferList::new())
    }

    /// Sends this session's flow state, with the link fields of `flow` if
    /// any.
    pub(crate) fn send_flow(&self, flow: Option<Flow>) -> Result<()> {
        let mut state = self.state.lock();
        self.send_flow_locked(&mut state, flow.unwrap_or_default())
    }

    fn send_flow_locked(&self, state: &mut SessionState, mut flow: Flow) -> Result<()> {
        if self.object.is_closing() {
            return Ok(());
        }
        flow.next_incoming_id = state.incoming.next_incoming_id();
        flow.incoming_window = state.incoming.window();
        flow.next_outgoing_id = state.outgoing.next_outgoing_id();
        flow.outgoing_window = state.outgoing.advertised();
        state.incoming.flow_sent();
        self.writer.send(self.local_channel, flow.into(), BufferList::new())
    }

    fn try_send_transfer(&self, link: &Arc<LinkInner>, mut transfer: Transfer, payload: BufferList) -> Result<TrySend> {
        let mut state = self.state.lock();
        self.object.check_active()?;
        let Some(id) = state.outgoing.try_consume() else {
            return Ok(TrySend::Blocked(transfer, payload));
        };
        // The first frame of a delivery carries its tag and its id.
        let tag = transfer.delivery_tag.clone();
        if tag.is_some() {
            transfer.delivery_id = Some(id);
        }
        let settled = transfer.settled == Some(true);
        if let Err(e) = self.writer.send(self.local_channel, transfer.into(), payload) {
            state.outgoing.give_back(id);
            return Err(e);
        }
        if let Some(tag) = tag.filter(|_| !settled) {
            state.unsettled_out.insert(
                id,
                Outgoing {
                    link: link.clone(),
                    tag,
                },
            );
        }
        Ok(TrySend::Sent(id))
    }

    /// Sends one Transfer frame once the outgoing window allows it and
    /// returns its transfer-id.
    pub(crate) async fn send_transfer(
        &self,
        link: &Arc<LinkInner>,
        transfer: Transfer,
        payload: BufferList,
    ) -> Result<u32> {
        let mut pending = Some((transfer, payload));
        self.capacity
            .wait_until(|| {
                if link.object().is_closing() {
                    return Some(Err(link.object().closed_error()));
                }
                let (transfer, payload) = pending.take()?;
                match self.try_send_transfer(link, transfer, payload) {
                    Ok(TrySend::Sent(id)) => Some(Ok(id)),
                    Ok(TrySend::Blocked(transfer, payload)) => {
                        pending = Some((transfer, payload));
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            })
            .await
            .unwrap_or_else(|| Err(self.object.closed_error()))
    }

    /// Settles or updates a delivery this session received. Returns `false`
    /// if the delivery is no longer unsettled.
    pub(crate) fn dispose_incoming(&self, id: DeliveryNumber, state: DeliveryState, settle: bool) -> Result<bool> {
        let mut guard = self.state.lock();
        self.object.check_active()?;
        if guard.unsettled_in.get(id).is_none() {
            return Ok(false);
        }
        let mut flow_due = false;
        if settle && let Some(incoming) = guard.unsettled_in.remove(id) {
            flow_due = guard.incoming.restore(incoming.frames);
        }
        let frames = guard.batcher.add(Role::Receiver, id, settle, Some(state));
        self.write_dispositions(&mut guard, frames)?;
        if flow_due {
            self.send_flow_locked(&mut guard, Flow::default())?;
        }
        Ok(true)
    }

    fn write_dispositions(&self, state: &mut SessionState, frames: Vec<Disposition>) -> Result<()> {
        for disposition in frames {
            self.send(disposition)?;
        }
        if state.batcher.is_pending() && !state.flush_armed {
            state.flush_armed = true;
            let interval = state.batcher.interval();
            let control = self.control.clone();
            let channel = self.local_channel;
            self.runtime.spawn(async move {
                tokio::time::sleep(interval).await;
                let _ = control.send(Control::FlushDispositions(channel));
            });
        }
        Ok(())
    }

    /// Sends the pending disposition range, if any.
    pub(crate) fn flush_dispositions(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.flush_armed = false;
        if self.object.is_closed() {
            return Ok(());
        }
        match state.batcher.flush() {
            Some(disposition) => self.send(disposition),
            None => Ok(()),
        }
    }

    pub(crate) fn create_link(self: &Arc<Self>, settings: LinkSettings) -> Result<Arc<LinkInner>> {
        let mut state = self.state.lock();
        if state.names.contains_key(&settings.name) {
            return Err(Error::amqp(
                ErrorCondition::ResourceLocked,
                format!("link '{}' is already attached on {}", settings.name, self.object.name()),
            ));
        }
        let handle = state.local_links.vacant()?;
        let name = settings.name.clone();
        let link = Arc::new(LinkInner::new(
            Arc::downgrade(self),
            self.local_channel,
            settings,
            handle,
        ));
        state.local_links.insert(handle, link.clone())?;
        state.names.insert(name, handle);
        debug!("{}: link '{}' registered as handle {handle}", self.object.name(), link.name());
        Ok(link)
    }

    /// Forgets a link once it ended, with its unsettled deliveries.
    pub(crate) fn remove_link(&self, handle: Handle, remote_handle: Option<Handle>) {
        let mut state = self.state.lock();
        if let Some(link) = state.local_links.remove(handle) {
            state.names.remove(link.name());
        }
        if let Some(remote) = remote_handle {
            state.remote_links.remove(remote);
            state.receiving.remove(&remote);
        }
        state.unsettled_out.remove_where(|o| o.link.handle() == handle);
        let frames = state
            .unsettled_in
            .remove_where(|i| i.link.handle() == handle)
            .into_iter()
            .map(|(_, i)| i.frames)
            .sum();
        if state.incoming.restore(frames) {
            if let Err(e) = self.send_flow_locked(&mut state, Flow::default()) {
                debug!("{}: window update not sent: {e}", self.object.name());
            }
        }
        debug!("{}: link handle {handle} removed", self.object.name());
    }

    fn link_by_remote(&self, handle: Handle) -> Option<Arc<LinkInner>> {
        self.state.lock().remote_links.get(handle).cloned()
    }

    /// A frame for a handle no link is attached to.
    fn missing_link(&self, handle: Handle, performative: &str) -> Result<()> {
        if self.settings.ignore_missing_links {
            debug!("{}: {performative} for unattached handle {handle} dropped", self.object.name());
            return Ok(());
        }
        Err(Error::amqp(
            ErrorCondition::UnattachedHandle,
            format!("{performative} for unattached handle {handle}"),
        ))
    }

    pub(crate) fn on_frame(self: &Arc<Self>, performative: Performative, payload: BufferList) {
        let res = match performative {
            Performative::Begin(begin) => self.on_begin(begin),
            Performative::Attach(attach) => self.on_attach(attach),
            Performative::Flow(flow) => self.on_flow(flow),
            Performative::Transfer(transfer) => self.on_transfer(transfer, payload),
            Performative::Disposition(disposition) => self.on_disposition(disposition),
            Performative::Detach(detach) => {
                self.on_detach(detach);
                Ok(())
            }
            Performative::End(end) => {
                self.on_end(end);
                Ok(())
            }
            other => Err(Error::amqp(
                ErrorCondition::IllegalState,
                format!("{} received on session channel", other.name()),
            )),
        };
        if let Err(e) = res {
            endpoint::safe_close(self, e.to_amqp());
        }
    }

    pub(crate) fn on_begin(self: &Arc<Self>, begin: Begin) -> Result<()> {
        let (_, to) = self.object.transition(Operation::ReceiveOpen)?;
        {
            let mut state = self.state.lock();
            state.outgoing.on_begin(begin.incoming_window);
            state.incoming.on_begin(begin.next_outgoing_id);
            let handle_max = state.local_links.max().min(begin.handle_max);
            state.local_links.set_max(handle_max);
            debug!(
                "{}: begun, peer window {} handle max {handle_max}",
                self.object.name(),
                begin.incoming_window
            );
        }
        if to == State::OpenReceived {
            self.open_internal()?;
        }
        if self.object.state() == State::Opened {
            self.object.opened().complete(None);
        }
        self.capacity.notify();
        Ok(())
    }

    fn on_attach(self: &Arc<Self>, attach: Attach) -> Result<()> {
        let existing = {
            let state = self.state.lock();
            state
                .names
                .get(&attach.name)
                .and_then(|handle| state.local_links.get(*handle))
                .cloned()
        };
        let (link, accepted, refusal) = match existing {
            Some(link) if link.remote_handle().is_none() => (link, false, None),
            Some(_) => {
                return Err(Error::amqp(
                    ErrorCondition::HandleInUse,
                    format!("link '{}' is already attached", attach.name),
                ));
            }
            None => match self.settings.link_factory.link_settings(&attach) {
                Ok(settings) => (self.create_link(settings)?, true, None),
                Err(error) => {
                    let mut settings = LinkSettings::new(attach.name.clone(), attach.role.peer());
                    match settings.role {
                        Role::Sender => settings.target = attach.target.clone(),
                        Role::Receiver => settings.source = attach.source.clone(),
                    }
                    settings.total_link_credit = 0;
                    (self.create_link(settings)?, false, Some(error))
                }
            },
        };
        self.state
            .lock()
            .remote_links
            .insert(attach.handle, link.clone())?;

        if let Err(e) = link.on_attach(attach) {
            endpoint::safe_close(&link, e.to_amqp());
            return Ok(());
        }
        if let Some(error) = refusal {
            debug!("{}: link '{}' refused: {error}", self.object.name(), link.name());
            endpoint::safe_close(&link, error);
        } else if accepted {
            let link = match link.role() {
                Role::Sender => Link::Sender(SenderLink::new(link)),
                Role::Receiver => Link::Receiver(ReceiverLink::new(link)),
            };
            self.accepted.lock().push_back(link);
            self.accept_signal.notify();
        }
        Ok(())
    }

    fn on_flow(self: &Arc<Self>, flow: Flow) -> Result<()> {
        self.state.lock().outgoing.on_flow(&flow);
        self.capacity.notify();
        match flow.handle {
            Some(handle) => match self.link_by_remote(handle) {
                Some(link) => link.on_flow(flow),
                None => self.missing_link(handle, "flow")?,
            },
            None if flow.echo => self.send_flow(None)?,
            None => {}
        }
        Ok(())
    }

    fn on_transfer(self: &Arc<Self>, transfer: Transfer, payload: BufferList) -> Result<()> {
        let handle = transfer.handle;
        let Some(link) = self.link_by_remote(handle) else {
            return self.missing_link(handle, "transfer");
        };
        let (id, flow_due) = {
            let mut state = self.state.lock();
            state.incoming.on_transfer(transfer.delivery_id)?;
            let mut receiving = match state.receiving.remove(&handle) {
                Some(receiving) => receiving,
                None => Receiving {
                    id: transfer.delivery_id.ok_or_else(|| {
                        Error::amqp(ErrorCondition::InvalidField, "first transfer of a delivery without delivery-id")
                    })?,
                    frames: 0,
                    settled: false,
                },
            };
            receiving.frames += 1;
            receiving.settled |= transfer.settled == Some(true);

            let id = receiving.id;
            let mut flow_due = false;
            if transfer.aborted || (receiving.settled && !transfer.more) {
                flow_due = state.incoming.restore(receiving.frames);
            } else if !transfer.more {
                state.unsettled_in.insert(
                    id,
                    Incoming {
                        link: link.clone(),
                        frames: receiving.frames,
                    },
                );
            } else {
                state.receiving.insert(handle, receiving);
            }
            (id, flow_due)
        };
        trace!("{}: transfer for delivery {id} on handle {handle}", self.object.name());
        link.on_transfer(id, transfer, payload);
        if flow_due {
            self.send_flow(None)?;
        }
        Ok(())
    }

    fn on_disposition(self: &Arc<Self>, disposition: Disposition) -> Result<()> {
        let first = disposition.first;
        let last = disposition.last.unwrap_or(first);
        match disposition.role {
            // The peer received deliveries this session sent.
            Role::Receiver => {
                let terminal = disposition.state.as_ref().is_some_and(DeliveryState::is_terminal);
                if !disposition.settled && !terminal {
                    return Ok(());
                }
                let mut outcomes = Vec::new();
                {
                    let mut state = self.state.lock();
                    let mut confirm = Vec::new();
                    for id in state.unsettled_out.ids_in(first, last) {
                        let Some(outgoing) = state.unsettled_out.remove(id) else {
                            continue;
                        };
                        if !disposition.settled {
                            confirm.extend(state.batcher.add(Role::Sender, id, true, disposition.state.clone()));
                        }
                        outcomes.push(outgoing);
                    }
                    self.write_dispositions(&mut state, confirm)?;
                }
                for outgoing in outcomes {
                    outgoing.link.on_outcome(&outgoing.tag, disposition.state.clone());
                }
            }
            // The peer settled deliveries this session received.
            Role::Sender => {
                if !disposition.settled {
                    return Ok(());
                }
                let (settled, flow_due) = {
                    let mut state = self.state.lock();
                    let settled = state.unsettled_in.remove_range(first, last);
                    let frames = settled.iter().map(|(_, i)| i.frames).sum();
                    (settled, state.incoming.restore(frames))
                };
                for (_, incoming) in settled {
                    incoming.link.on_remote_settled();
                }
                if flow_due {
                    self.send_flow(None)?;
                }
            }
        }
        Ok(())
    }

    fn on_detach(self: &Arc<Self>, detach: Detach) {
        match self.link_by_remote(detach.handle) {
            Some(link) => link.on_detach(detach),
            None => debug!(
                "{}: detach for unattached handle {} dropped",
                self.object.name(),
                detach.handle
            ),
        }
    }

    fn on_end(self: &Arc<Self>, end: End) {
        if let Some(error) = end.error {
            self.object.set_terminal(error);
        }
        match self.object.transition(Operation::ReceiveClose) {
            Ok((_, State::CloseReceived)) => {
                if let Err(e) = self.close_internal() {
                    debug!("{}: end reply failed: {e}", self.object.name());
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

    fn abort_links(&self) {
        let links: Vec<_> = self.state.lock().local_links.values().cloned().collect();
        for link in links {
            endpoint::abort(&link);
        }
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        endpoint::close(self, self.settings.operation_timeout).await
    }
}

impl Lifecycle for SessionInner {
    fn object(&self) -> &AmqpObject {
        &self.object
    }

    fn close_timeout(&self) -> Duration {
        self.settings.operation_timeout
    }

    fn open_internal(&self) -> Result<()> {
        let state = self.state.lock();
        self.object.transition(Operation::SendOpen)?;
        self.send(Begin {
            remote_channel: state.remote_channel,
            next_outgoing_id: state.outgoing.next_outgoing_id(),
            incoming_window: state.incoming.window(),
            outgoing_window: state.outgoing.advertised(),
            handle_max: self.settings.handle_max,
            ..Default::default()
        })
    }

    fn close_internal(&self) -> Result<()> {
        self.abort_links();
        let mut state = self.state.lock();
        // Dispositions must not follow the End.
        if let Some(disposition) = state.batcher.flush() {
            self.send(disposition)?;
        }
        self.object.transition(Operation::SendClose)?;
        self.send(End {
            error: self.object.terminal().cloned(),
        })
    }

    fn abort_internal(&self) {
        self.abort_links();
        self.capacity.close();
        self.accept_signal.close();
    }

    fn release(&self) {
        self.abort_links();
        if let Some(connection) = self.connection.upgrade() {
            connection.remove_session(self.local_channel, self.remote_channel());
        }
        self.capacity.close();
        self.accept_signal.close();
        debug!("{}: released", self.object.name());
    }
}

/// A session on a connection.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// The local channel number.
    pub fn channel(&self) -> ChannelId {
        self.inner.local_channel
    }

    pub fn remote_channel(&self) -> Option<ChannelId> {
        self.inner.remote_channel()
    }

    pub fn state(&self) -> State {
        self.inner.object.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.object.is_closed()
    }

    /// Attaches a sending link and waits for the peer's Attach.
    pub async fn attach_sender(&self, mut settings: LinkSettings) -> Result<SenderLink> {
        settings.role = Role::Sender;
        self.attach(settings).await.map(SenderLink::new)
    }

    /// Attaches a receiving link and waits for the peer's Attach. The
    /// initial credit is granted once attached.
    pub async fn attach_receiver(&self, mut settings: LinkSettings) -> Result<ReceiverLink> {
        settings.role = Role::Receiver;
        self.attach(settings).await.map(ReceiverLink::new)
    }

    async fn attach(&self, settings: LinkSettings) -> Result<Arc<LinkInner>> {
        self.inner.object.check_active()?;
        let link = self.inner.create_link(settings)?;
        let timeout = link.operation_timeout();
        endpoint::open(&link, timeout).await?;
        Ok(link)
    }

    /// Waits for a link attached by the peer.
    pub async fn accept_link(&self) -> Result<Link> {
        let inner = &self.inner;
        inner
            .accept_signal
            .wait_until(|| inner.accepted.lock().pop_front())
            .await
            .ok_or_else(|| inner.object.closed_error())
    }

    /// Ends the session and waits for the peer's End.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Ends the session with `error`.
    pub async fn close_with_error(&self, error: impl Into<AmqpError>) -> Result<()> {
        endpoint::safe_close(&self.inner, error.into());
        self.inner.close().await
    }

    pub fn abort(&self) {
        endpoint::abort(&self.inner);
    }

    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        self.inner.object.closed().on_complete(f);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel())
            .field("remote_channel", &self.remote_channel())
            .field("state", &self.state())
            .finish()
    }
}
