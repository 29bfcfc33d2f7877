use core::fmt;
use std::{sync::Arc, time::Duration};

use crate::{
    io::writer::WriterConfig,
    protocol::{
        Begin, Fields, ProtocolHeader, Symbol,
        constants::{DEFAULT_CHANNEL_MAX, DEFAULT_MAX_FRAME_SIZE},
    },
    session::SessionSettings,
};

/// Decides the settings of sessions the peer begins.
pub trait SessionFactory: Send + Sync + 'static {
    fn session_settings(&self, begin: &Begin) -> SessionSettings;
}

/// Accepts every session with default settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionFactory;

impl SessionFactory for DefaultSessionFactory {
    fn session_settings(&self, _begin: &Begin) -> SessionSettings {
        SessionSettings::default()
    }
}

/// Connection configuration.
///
/// The protocol fields are offered in the local Open; the values in effect
/// after negotiation are available on the [`Connection`](super::Connection).
#[derive(Clone)]
pub struct ConnectionSettings {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    /// Advertised idle timeout. `None` disables expiry of the peer.
    pub idle_timeout: Option<Duration>,
    pub offered_capabilities: Vec<Symbol>,
    pub desired_capabilities: Vec<Symbol>,
    pub properties: Option<Fields>,
    /// Headers a listener accepts, in order of preference.
    pub supported_headers: Vec<ProtocolHeader>,
    /// Drop frames for unknown channels instead of failing the connection.
    pub ignore_missing_sessions: bool,
    /// Bound for open and close handshakes.
    pub operation_timeout: Duration,
    /// Queued bytes at which the writer reports congestion.
    pub queue_full_limit: usize,
    /// Queued bytes at which congestion is cleared.
    pub queue_empty_limit: usize,
    /// Frames up to this size are coalesced into one write.
    pub coalesce_threshold: usize,
    /// Size of the coalescing buffer.
    pub batch_size: usize,
    pub buffer_segment_size: usize,
    pub buffer_pool_size: usize,
    pub session_factory: Arc<dyn SessionFactory>,
}

impl ConnectionSettings {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    #[must_use]
    pub fn with_channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    #[must_use]
    pub fn with_offered_capabilities(mut self, capabilities: Vec<Symbol>) -> Self {
        self.offered_capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_desired_capabilities(mut self, capabilities: Vec<Symbol>) -> Self {
        self.desired_capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Fields) -> Self {
        self.properties = Some(properties);
        self
    }

    #[must_use]
    pub fn with_supported_headers(mut self, headers: Vec<ProtocolHeader>) -> Self {
        self.supported_headers = headers;
        self
    }

    #[must_use]
    pub fn with_ignore_missing_sessions(mut self, ignore: bool) -> Self {
        self.ignore_missing_sessions = ignore;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_queue_limits(mut self, full: usize, empty: usize) -> Self {
        self.queue_full_limit = full;
        self.queue_empty_limit = empty;
        self
    }

    #[must_use]
    pub fn with_coalescing(mut self, threshold: usize, batch_size: usize) -> Self {
        self.coalesce_threshold = threshold;
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_buffer_pool(mut self, segment_size: usize, pool_size: usize) -> Self {
        self.buffer_segment_size = segment_size;
        self.buffer_pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_session_factory(mut self, factory: impl SessionFactory) -> Self {
        self.session_factory = Arc::new(factory);
        self
    }

    pub(crate) fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            queue_full_limit: self.queue_full_limit,
            queue_empty_limit: self.queue_empty_limit,
            coalesce_threshold: self.coalesce_threshold,
            batch_size: self.batch_size,
            write_timeout: self.operation_timeout,
        }
    }

    pub(crate) fn idle_timeout_ms(&self) -> Option<u32> {
        self.idle_timeout
            .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX))
            .filter(|t| *t != 0)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: DEFAULT_CHANNEL_MAX,
            idle_timeout: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
            supported_headers: vec![ProtocolHeader::AMQP],
            ignore_missing_sessions: false,
            operation_timeout: Duration::from_secs(60),
            queue_full_limit: 4 * 1024 * 1024,
            queue_empty_limit: 1024 * 1024,
            coalesce_threshold: 4 * 1024,
            batch_size: 64 * 1024,
            buffer_segment_size: 16 * 1024,
            buffer_pool_size: 64,
            session_factory: Arc::new(DefaultSessionFactory),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("container_id", &self.container_id)
            .field("hostname", &self.hostname)
            .field("max_frame_size", &self.max_frame_size)
            .field("channel_max", &self.channel_max)
            .field("idle_timeout", &self.idle_timeout)
            .field("ignore_missing_sessions", &self.ignore_missing_sessions)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}
