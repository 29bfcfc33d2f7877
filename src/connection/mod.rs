//! Connections: the protocol header exchange, Open/Close negotiation and the
//! demultiplexing of frames to sessions by channel.
//!
//! A connection runs three tasks on the tokio runtime it was created on:
//!
//! - the reader, which decodes frames from the transport,
//! - the writer, which drains the outgoing frame queue,
//! - the driver, which dispatches decoded frames, fires the heartbeat and
//!   serves timer requests of its sessions.
//!
//! Frames of one connection are therefore dispatched in arrival order by a
//! single task.
mod heartbeat;
mod settings;

use core::fmt;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use self::heartbeat::{Beat, Heartbeat};
pub use self::settings::*;
#[cfg(feature = "stats")]
use crate::io::ConnectionStats;
use crate::{
    buffers::{BufferList, BufferPool},
    codec::performative::value_to_error,
    collections::HandleTable,
    endpoint::{self, AmqpObject, Lifecycle, Operation, State},
    error::{AmqpError, Error, ErrorCondition, Result},
    io::{
        IoEvent, Transport,
        reader::{FrameReader, ReadEvent, read_task},
        writer::{FrameWriter, write_task},
    },
    protocol::{
        Begin, ChannelId, Close, Frame, FrameType, Open, Performative, ProtocolHeader, Symbol,
        constants::{MIN_IDLE_TIMEOUT, MIN_MAX_FRAME_SIZE, OPEN_ERROR},
    },
    session::{Session, SessionInner, SessionSettings},
    sync::{Signal, time},
};

/// Requests posted to the driver task by sessions and the writer.
#[derive(Debug)]
pub(crate) enum Control {
    /// The disposition batching interval of a session elapsed.
    FlushDispositions(ChannelId),
    /// The writer task stopped on a failed write.
    WriterFailed(Error),
}

/// Values in effect once both Opens were exchanged.
struct Negotiated {
    max_frame_size: u32,
    channel_max: u16,
    heartbeat: Heartbeat,
    remote_container_id: Option<String>,
    remote_hostname: Option<String>,
    /// Capabilities we desire that the peer offers.
    capabilities: Vec<Symbol>,
}

struct Sessions {
    /// By the channel we send on.
    local: HandleTable<Arc<SessionInner>>,
    /// By the channel the peer sends on.
    remote: HandleTable<Arc<SessionInner>>,
}

pub(crate) struct ConnectionInner {
    object: AmqpObject,
    settings: ConnectionSettings,
    is_initiator: bool,
    negotiated: Mutex<Negotiated>,
    sessions: Mutex<Sessions>,
    writer: Arc<FrameWriter>,
    reader: Arc<FrameReader>,
    /// Stops the reader and the driver.
    token: CancellationToken,
    /// Stops the writer without draining its queue.
    writer_token: CancellationToken,
    control: mpsc::UnboundedSender<Control>,
    runtime: tokio::runtime::Handle,
    accepted: Mutex<VecDeque<Session>>,
    accept_signal: Signal,
    local_endpoint: String,
    remote_endpoint: String,
}

impl ConnectionInner {
    /// Splits `transport`, spawns the reader, writer and driver tasks and
    /// returns the connection in `Start`.
    fn start<T: Transport>(transport: T, settings: ConnectionSettings, is_initiator: bool) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::amqp(ErrorCondition::InternalError, format!("no tokio runtime: {e}")))?;
        let local_endpoint = transport.local_endpoint()?;
        let remote_endpoint = transport.remote_endpoint()?;
        let (read, write) = transport.split();

        let pool = BufferPool::new(settings.buffer_segment_size, settings.buffer_pool_size);
        let reader = Arc::new(FrameReader::new(MIN_MAX_FRAME_SIZE, pool));
        let writer = Arc::new(FrameWriter::new(settings.writer_config()));
        let (events_tx, events_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let channel_max = u32::from(settings.channel_max);
        let inner = Arc::new(Self {
            object: AmqpObject::new(format!("connection '{}'", settings.container_id)),
            is_initiator,
            negotiated: Mutex::new(Negotiated {
                max_frame_size: MIN_MAX_FRAME_SIZE,
                channel_max: settings.channel_max,
                heartbeat: Heartbeat::default(),
                remote_container_id: None,
                remote_hostname: None,
                capabilities: Vec::new(),
            }),
            sessions: Mutex::new(Sessions {
                local: HandleTable::new(channel_max),
                remote: HandleTable::new(channel_max),
            }),
            settings,
            writer: writer.clone(),
            reader: reader.clone(),
            token: CancellationToken::new(),
            writer_token: CancellationToken::new(),
            control: control_tx,
            runtime: runtime.clone(),
            accepted: Mutex::new(VecDeque::new()),
            accept_signal: Signal::new(),
            local_endpoint,
            remote_endpoint,
        });
        debug!(
            "{}: started on {} -> {}",
            inner.object.name(),
            inner.local_endpoint,
            inner.remote_endpoint
        );

        runtime.spawn(read_task(read, reader, events_tx, inner.token.clone()));
        runtime.spawn({
            let control = inner.control.clone();
            let task = write_task(write, writer, inner.writer_token.clone());
            async move {
                if let Err(e) = task.await {
                    let _ = control.send(Control::WriterFailed(e));
                }
            }
        });
        runtime.spawn(drive(inner.clone(), events_rx, control_rx, inner.token.clone()));
        Ok(inner)
    }

    pub(crate) fn max_frame_size(&self) -> u32 {
        self.negotiated.lock().max_frame_size
    }

    pub(crate) fn remove_session(&self, local: ChannelId, remote: Option<ChannelId>) {
        let mut sessions = self.sessions.lock();
        sessions.local.remove(u32::from(local));
        if let Some(remote) = remote {
            // The remote slot may already belong to a newer session.
            let same = sessions
                .remote
                .get(u32::from(remote))
                .is_some_and(|s| s.local_channel() == local);
            if same {
                sessions.remote.remove(u32::from(remote));
            }
        }
    }

    /// Allocates the lowest free local channel for a new session. `remote`
    /// is set for sessions the peer begins.
    fn create_session(self: &Arc<Self>, settings: SessionSettings, remote: Option<ChannelId>) -> Result<Arc<SessionInner>> {
        let mut sessions = self.sessions.lock();
        let channel = sessions.local.vacant()?;
        let channel = ChannelId::try_from(channel).map_err(|_| {
            Error::amqp(
                ErrorCondition::ResourceLimitExceeded,
                format!("channel {channel} is out of range"),
            )
        })?;
        let session = Arc::new(SessionInner::new(
            Arc::downgrade(self),
            self.writer.clone(),
            self.control.clone(),
            self.runtime.clone(),
            channel,
            remote,
            settings,
        ));
        if let Some(remote) = remote {
            sessions.remote.insert(u32::from(remote), session.clone())?;
        }
        sessions.local.insert(u32::from(channel), session.clone())?;
        trace!("{}: session on channel {channel}", self.object.name());
        Ok(session)
    }

    fn local_session(&self, channel: ChannelId) -> Option<Arc<SessionInner>> {
        self.sessions.lock().local.get(u32::from(channel)).cloned()
    }

    fn all_sessions(&self) -> Vec<Arc<SessionInner>> {
        self.sessions.lock().local.values().cloned().collect()
    }

    fn abort_sessions(&self) {
        for session in self.all_sessions() {
            endpoint::abort(&session);
        }
    }

    fn on_header(self: &Arc<Self>, header: ProtocolHeader) {
        trace!("{}: RECV header {header}", self.object.name());
        let res = if self.is_initiator {
            self.on_header_reply(header)
        } else {
            self.on_header_request(header)
        };
        if let Err(e) = res {
            self.object.set_terminal(e.to_amqp());
            endpoint::abort(self);
        }
    }

    /// The peer's answer to the header we sent.
    fn on_header_reply(&self, header: ProtocolHeader) -> Result<()> {
        if header != ProtocolHeader::AMQP {
            return Err(Error::amqp(
                ErrorCondition::NotImplemented,
                format!("peer answered with protocol header {header}"),
            ));
        }
        self.object.transition(Operation::ReceiveHeader)?;
        Ok(())
    }

    /// A header opening a connection we listen on: echo it if supported,
    /// otherwise answer with the preferred header and end.
    fn on_header_request(self: &Arc<Self>, header: ProtocolHeader) -> Result<()> {
        if self.settings.supported_headers.contains(&header) && header == ProtocolHeader::AMQP {
            self.object.transition(Operation::ReceiveHeader)?;
            self.writer.send_header(header)?;
            self.object.transition(Operation::SendHeader)?;
            return Ok(());
        }
        let preferred = self
            .settings
            .supported_headers
            .first()
            .copied()
            .unwrap_or(ProtocolHeader::AMQP);
        warn!("{}: unsupported protocol header {header}, answering {preferred}", self.object.name());
        self.writer.send_header(preferred)?;
        self.object.set_terminal(AmqpError::new(
            ErrorCondition::NotImplemented,
            format!("protocol header {header} is not supported"),
        ));
        self.object.force(State::End);
        endpoint::finish_if_ended(self);
        Ok(())
    }

    fn on_frame(self: &Arc<Self>, frame: Frame) {
        let Frame {
            channel,
            frame_type,
            performative,
            payload,
        } = frame;
        let Some(performative) = performative else {
            trace!("{}: RECV empty frame", self.object.name());
            return;
        };
        trace!("{}: RECV [{channel}] {}", self.object.name(), performative.name());

        if frame_type == FrameType::Sasl {
            let e = Error::amqp(ErrorCondition::NotAllowed, "SASL frame after the AMQP header");
            endpoint::safe_close(self, e.to_amqp());
            return;
        }
        if self.object.is_closing() && !matches!(performative, Performative::Close(_)) {
            trace!("{}: closing, dropped {}", self.object.name(), performative.name());
            return;
        }

        let res = match performative {
            Performative::Open(open) => self.on_open(open),
            Performative::Close(close) => {
                self.on_close(close);
                Ok(())
            }
            Performative::Begin(begin) => self.on_begin(channel, begin),
            other => self.route(channel, other, payload),
        };
        if let Err(e) = res {
            endpoint::safe_close(self, e.to_amqp());
        }
    }

    fn on_open(self: &Arc<Self>, open: Open) -> Result<()> {
        let (_, to) = self.object.transition(Operation::ReceiveOpen)?;

        if let Some(error) = open_error(&open) {
            self.object.opened().complete(Some(error.clone()));
            return Err(Error::Amqp(error));
        }

        let remote_idle = open.idle_time_out.filter(|ms| *ms != 0);
        let refusal = remote_idle.filter(|ms| *ms < MIN_IDLE_TIMEOUT).map(|ms| {
            Error::amqp(
                ErrorCondition::NotAllowed,
                format!("idle timeout of {ms} ms is below {MIN_IDLE_TIMEOUT} ms"),
            )
        });

        let max_frame_size = self
            .settings
            .max_frame_size
            .max(MIN_MAX_FRAME_SIZE)
            .min(open.max_frame_size.max(MIN_MAX_FRAME_SIZE));
        let channel_max = self.settings.channel_max.min(open.channel_max);
        {
            let mut negotiated = self.negotiated.lock();
            negotiated.max_frame_size = max_frame_size;
            negotiated.channel_max = channel_max;
            if refusal.is_none() {
                negotiated.heartbeat = Heartbeat::new(self.settings.idle_timeout_ms(), remote_idle);
            }
            negotiated.capabilities = self
                .settings
                .desired_capabilities
                .iter()
                .filter(|c| open.offered_capabilities.contains(c))
                .cloned()
                .collect();
            negotiated.remote_container_id = Some(open.container_id);
            negotiated.remote_hostname = open.hostname;
            debug!(
                "{}: opened by '{}', max frame {max_frame_size} channel max {channel_max} heartbeat {}",
                self.object.name(),
                negotiated.remote_container_id.as_deref().unwrap_or_default(),
                if negotiated.heartbeat.is_enabled() { "on" } else { "off" }
            );
        }
        {
            let mut sessions = self.sessions.lock();
            sessions.local.set_max(u32::from(channel_max));
            sessions.remote.set_max(u32::from(channel_max));
        }

        // A listener answers before it can refuse.
        if to == State::OpenReceived {
            self.open_internal()?;
        }
        if let Some(e) = refusal {
            self.object.opened().complete(Some(e.to_amqp()));
            return Err(e);
        }
        if self.object.state() == State::Opened {
            self.object.opened().complete(None);
        }
        Ok(())
    }

    fn on_close(self: &Arc<Self>, close: Close) {
        if let Some(error) = close.error {
            self.object.set_terminal(error);
        }
        match self.object.transition(Operation::ReceiveClose) {
            Ok((_, State::CloseReceived)) => {
                if let Err(e) = self.close_internal() {
                    warn!("{}: close reply failed: {e}", self.object.name());
                    endpoint::abort(self);
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("{}: {e}", self.object.name());
                endpoint::abort(self);
                return;
            }
        }
        endpoint::finish_if_ended(self);
    }

    fn on_begin(self: &Arc<Self>, channel: ChannelId, begin: Begin) -> Result<()> {
        let (session, accepted) = match begin.remote_channel {
            Some(local) => {
                let mut sessions = self.sessions.lock();
                let session = sessions.local.get(u32::from(local)).cloned().ok_or_else(|| {
                    Error::amqp(
                        ErrorCondition::NotFound,
                        format!("Begin answers unknown channel {local}"),
                    )
                })?;
                sessions.remote.insert(u32::from(channel), session.clone())?;
                session.set_remote_channel(channel);
                (session, false)
            }
            None => {
                let settings = self.settings.session_factory.session_settings(&begin);
                (self.create_session(settings, Some(channel))?, true)
            }
        };

        if let Err(e) = session.on_begin(begin) {
            endpoint::safe_close(&session, e.to_amqp());
            return Ok(());
        }
        if accepted && session.object().state() == State::Opened {
            self.accepted.lock().push_back(Session::new(session));
            self.accept_signal.notify();
        }
        Ok(())
    }

    fn route(&self, channel: ChannelId, performative: Performative, payload: BufferList) -> Result<()> {
        let session = self.sessions.lock().remote.get(u32::from(channel)).cloned();
        match session {
            Some(session) => {
                session.on_frame(performative, payload);
                Ok(())
            }
            None if self.settings.ignore_missing_sessions
                || matches!(performative, Performative::End(_) | Performative::Detach(_)) =>
            {
                debug!(
                    "{}: dropped {} for unknown channel {channel}",
                    self.object.name(),
                    performative.name()
                );
                Ok(())
            }
            None => Err(Error::amqp(
                ErrorCondition::NotFound,
                format!("{} received on unknown channel {channel}", performative.name()),
            )),
        }
    }

    fn on_control(self: &Arc<Self>, control: Control) {
        match control {
            Control::FlushDispositions(channel) => {
                let Some(session) = self.local_session(channel) else {
                    return;
                };
                if let Err(e) = session.flush_dispositions() {
                    endpoint::safe_close(&session, e.to_amqp());
                }
            }
            Control::WriterFailed(e) => self.on_transport_closed(e),
        }
    }

    /// The next instant the heartbeat needs attention, if it is enabled.
    fn heartbeat_deadline(&self) -> Option<Duration> {
        let heartbeat = self.negotiated.lock().heartbeat;
        heartbeat.next_deadline(self.writer.last_sent(), self.reader.last_received())
    }

    fn on_heartbeat(self: &Arc<Self>) {
        let heartbeat = self.negotiated.lock().heartbeat;
        match heartbeat.check(time::now(), self.writer.last_sent(), self.reader.last_received()) {
            Beat::Idle => {}
            Beat::SendEmpty => {
                trace!("{}: SEND empty frame", self.object.name());
                if let Err(e) = self.writer.send_empty() {
                    debug!("{}: keep-alive not sent: {e}", self.object.name());
                }
            }
            Beat::Expired => {
                warn!("{}: nothing received within the idle timeout", self.object.name());
                self.negotiated.lock().heartbeat = Heartbeat::default();
                endpoint::safe_close(
                    self,
                    AmqpError::new(ErrorCondition::ConnectionForced, "idle timeout expired"),
                );
            }
        }
    }

    fn on_transport_closed(self: &Arc<Self>, error: Error) {
        if self.object.is_closed() {
            return;
        }
        if self.object.state() == State::End {
            endpoint::finish_if_ended(self);
            return;
        }
        warn!("{}: transport closed: {error}", self.object.name());
        self.object.set_terminal(error.to_amqp());
        endpoint::abort(self);
    }

    async fn close(self: &Arc<Self>) -> Result<()> {
        endpoint::close(self, self.settings.operation_timeout).await
    }
}

impl Lifecycle for ConnectionInner {
    fn object(&self) -> &AmqpObject {
        &self.object
    }

    fn close_timeout(&self) -> Duration {
        self.settings.operation_timeout
    }

    fn open_internal(&self) -> Result<()> {
        self.object.transition(Operation::SendOpen)?;
        let settings = &self.settings;
        // Inbound frames are bounded by what we announce.
        self.reader
            .set_max_frame_size(settings.max_frame_size.max(MIN_MAX_FRAME_SIZE));
        let open = Open {
            container_id: settings.container_id.clone(),
            hostname: settings.hostname.clone(),
            max_frame_size: settings.max_frame_size.max(MIN_MAX_FRAME_SIZE),
            channel_max: settings.channel_max,
            idle_time_out: settings.idle_timeout_ms(),
            offered_capabilities: settings.offered_capabilities.clone(),
            desired_capabilities: settings.desired_capabilities.clone(),
            properties: settings.properties.clone(),
            ..Default::default()
        };
        self.writer.send(0, open.into(), BufferList::new())
    }

    fn close_internal(&self) -> Result<()> {
        for session in self.all_sessions() {
            if let Err(e) = session.flush_dispositions() {
                debug!("{}: {e}", session.object().name());
            }
            endpoint::abort(&session);
        }
        self.object.transition(Operation::SendClose)?;
        let close = Close {
            error: self.object.terminal().cloned(),
        };
        self.writer.send(0, close.into(), BufferList::new())
    }

    fn abort_internal(&self) {
        self.token.cancel();
        self.writer_token.cancel();
        self.writer.close();
        self.abort_sessions();
        self.accept_signal.close();
    }

    fn release(&self) {
        self.abort_sessions();
        // The writer drains what is queued, the Close included, then shuts
        // the transport down.
        self.writer.close();
        self.token.cancel();
        self.accept_signal.close();
        debug!("{}: released", self.object.name());
    }
}

/// The error a peer refusing the connection puts in its Open properties.
fn open_error(open: &Open) -> Option<AmqpError> {
    let value = open.properties.as_ref()?.get(OPEN_ERROR)?;
    value_to_error(value.clone()).ok()
}

/// The driver task: dispatches reader events and control requests and
/// fires the heartbeat, until the connection ends.
async fn drive(
    inner: Arc<ConnectionInner>,
    mut events: mpsc::Receiver<ReadEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
    token: CancellationToken,
) {
    loop {
        let deadline = inner.heartbeat_deadline();
        let heartbeat = async {
            match deadline {
                Some(at) => tokio::time::sleep(at.saturating_sub(time::now())).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(ReadEvent::Header(header)) => inner.on_header(header),
                Some(ReadEvent::Frame(frame)) => inner.on_frame(frame),
                Some(ReadEvent::Closed(e)) => {
                    inner.on_transport_closed(e);
                    return;
                }
                None => {
                    inner.on_transport_closed(Error::closed("transport", None));
                    return;
                }
            },
            Some(request) = control.recv() => inner.on_control(request),
            _ = heartbeat => inner.on_heartbeat(),
            _ = token.cancelled() => return,
        }
    }
}

/// An AMQP connection over a [`Transport`].
///
/// Cloning yields another handle to the same connection. The connection
/// keeps running while its tasks do, even if every handle is dropped; call
/// [`close`](Self::close) or [`abort`](Self::abort) to end it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Opens a connection as the initiator: sends the protocol header and
    /// Open, and waits for the peer's.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open<T: Transport>(transport: T, settings: ConnectionSettings) -> Result<Self> {
        let timeout = settings.operation_timeout;
        let inner = ConnectionInner::start(transport, settings, true)?;
        inner.writer.send_header(ProtocolHeader::AMQP)?;
        inner.object.transition(Operation::SendHeader)?;
        inner.open_internal()?;
        endpoint::wait_opened(&inner, timeout).await?;
        Ok(Self { inner })
    }

    /// Accepts a connection the peer initiates on `transport` and waits
    /// until the Open exchange completes.
    pub async fn accept<T: Transport>(transport: T, settings: ConnectionSettings) -> Result<Self> {
        let timeout = settings.operation_timeout;
        let inner = ConnectionInner::start(transport, settings, false)?;
        endpoint::wait_opened(&inner, timeout).await?;
        Ok(Self { inner })
    }

    /// Begins a session on the lowest free channel and waits for the peer's
    /// Begin.
    pub async fn begin_session(&self, settings: SessionSettings) -> Result<Session> {
        self.inner.object.check_active()?;
        let timeout = settings.operation_timeout;
        let session = self.inner.create_session(settings, None)?;
        endpoint::open(&session, timeout).await?;
        Ok(Session::new(session))
    }

    /// Waits for a session begun by the peer.
    pub async fn accept_session(&self) -> Result<Session> {
        let inner = &self.inner;
        inner
            .accept_signal
            .wait_until(|| inner.accepted.lock().pop_front())
            .await
            .ok_or_else(|| inner.object.closed_error())
    }

    /// Closes the connection and waits for the peer's Close. Ends every
    /// session first.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Closes the connection with `error`.
    pub async fn close_with_error(&self, error: impl Into<AmqpError>) -> Result<()> {
        endpoint::safe_close(&self.inner, error.into());
        self.inner.close().await
    }

    /// Tears the connection down without a close handshake.
    pub fn abort(&self) {
        endpoint::abort(&self.inner);
    }

    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        self.inner.object.closed().on_complete(f);
    }

    pub fn state(&self) -> State {
        self.inner.object.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.object.is_closed()
    }

    /// Whether the outgoing queue is above its full watermark.
    pub fn is_congested(&self) -> bool {
        self.inner.writer.is_congested()
    }

    /// Registers the observer of backpressure events, replacing any
    /// previous one.
    pub fn on_io_event<F>(&self, f: F)
    where
        F: Fn(IoEvent) + Send + Sync + 'static,
    {
        self.inner.writer.set_observer(Arc::new(f));
    }

    /// The negotiated max frame size.
    pub fn max_frame_size(&self) -> u32 {
        self.inner.max_frame_size()
    }

    /// The negotiated highest channel number.
    pub fn channel_max(&self) -> u16 {
        self.inner.negotiated.lock().channel_max
    }

    pub fn remote_container_id(&self) -> Option<String> {
        self.inner.negotiated.lock().remote_container_id.clone()
    }

    pub fn remote_hostname(&self) -> Option<String> {
        self.inner.negotiated.lock().remote_hostname.clone()
    }

    /// The capabilities we desired that the peer offered.
    pub fn capabilities(&self) -> Vec<Symbol> {
        self.inner.negotiated.lock().capabilities.clone()
    }

    pub fn local_endpoint(&self) -> &str {
        &self.inner.local_endpoint
    }

    pub fn remote_endpoint(&self) -> &str {
        &self.inner.remote_endpoint
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> ConnectionStats {
        use std::sync::atomic::Ordering;

        ConnectionStats {
            bytes_sent: self.inner.writer.bytes.load(Ordering::Relaxed),
            frames_sent: self.inner.writer.frames.load(Ordering::Relaxed),
            bytes_received: self.inner.reader.bytes.load(Ordering::Relaxed),
            frames_received: self.inner.reader.frames.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("container_id", &self.inner.settings.container_id)
            .field("remote", &self.inner.remote_endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::protocol::Value;

    #[test]
    fn open_error_property_is_decoded() {
        let open = Open::default();
        assert!(open_error(&open).is_none());

        let error = AmqpError::new(ErrorCondition::UnauthorizedAccess, "bad token");
        let mut properties = BTreeMap::new();
        properties.insert(Symbol::from(OPEN_ERROR), Value::from(error.clone()));
        let open = Open {
            properties: Some(properties),
            ..Default::default()
        };
        assert_eq!(open_error(&open), Some(error));
    }
}
