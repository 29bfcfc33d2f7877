use core::fmt;
use std::{sync::Arc, time::Duration};

use crate::{
    error::AmqpError,
    link::LinkSettings,
    protocol::{
        Attach,
        constants::{DEFAULT_HANDLE_MAX, DEFAULT_WINDOW},
    },
};

/// Decides the settings of links the peer attaches.
pub trait LinkFactory: Send + Sync + 'static {
    /// Returns the local end of the link, or an error to refuse it.
    fn link_settings(&self, attach: &Attach) -> Result<LinkSettings, AmqpError>;
}

/// Accepts every link, playing the opposite role and mirroring the peer's
/// source and target.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLinkFactory;

impl LinkFactory for DefaultLinkFactory {
    fn link_settings(&self, attach: &Attach) -> Result<LinkSettings, AmqpError> {
        let mut settings = LinkSettings::new(attach.name.clone(), attach.role.peer());
        settings.source = attach.source.clone();
        settings.target = attach.target.clone();
        settings.snd_settle_mode = attach.snd_settle_mode;
        settings.rcv_settle_mode = attach.rcv_settle_mode;
        Ok(settings)
    }
}

/// Session configuration.
#[derive(Clone)]
pub struct SessionSettings {
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
    /// Delay before a pending disposition range is sent. Zero sends every
    /// disposition at once.
    pub dispatcher_interval: Duration,
    /// Deliveries per disposition range that trigger an early send.
    pub dispatcher_threshold: u32,
    /// Drop frames for unknown link handles instead of ending the session.
    pub ignore_missing_links: bool,
    pub operation_timeout: Duration,
    pub link_factory: Arc<dyn LinkFactory>,
}

impl SessionSettings {
    #[must_use]
    pub fn with_incoming_window(mut self, window: u32) -> Self {
        self.incoming_window = window;
        self
    }

    #[must_use]
    pub fn with_outgoing_window(mut self, window: u32) -> Self {
        self.outgoing_window = window;
        self
    }

    #[must_use]
    pub fn with_handle_max(mut self, handle_max: u32) -> Self {
        self.handle_max = handle_max;
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, interval: Duration, threshold: u32) -> Self {
        self.dispatcher_interval = interval;
        self.dispatcher_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_ignore_missing_links(mut self, ignore: bool) -> Self {
        self.ignore_missing_links = ignore;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_link_factory(mut self, factory: impl LinkFactory) -> Self {
        self.link_factory = Arc::new(factory);
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            incoming_window: DEFAULT_WINDOW,
            outgoing_window: DEFAULT_WINDOW,
            handle_max: DEFAULT_HANDLE_MAX,
            dispatcher_interval: Duration::from_millis(20),
            dispatcher_threshold: 64,
            ignore_missing_links: false,
            operation_timeout: Duration::from_secs(60),
            link_factory: Arc::new(DefaultLinkFactory),
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("incoming_window", &self.incoming_window)
            .field("outgoing_window", &self.outgoing_window)
            .field("handle_max", &self.handle_max)
            .field("dispatcher_interval", &self.dispatcher_interval)
            .field("dispatcher_threshold", &self.dispatcher_threshold)
            .field("ignore_missing_links", &self.ignore_missing_links)
            .finish_non_exhaustive()
    }
}
