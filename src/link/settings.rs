use std::time::Duration;

use crate::protocol::{
    Fields, ReceiverSettleMode, Role, SenderSettleMode, Source, Target, constants::DEFAULT_LINK_CREDIT,
};

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub name: String,
    pub role: Role,
    pub source: Option<Source>,
    pub target: Option<Target>,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Credit a receiver keeps granted to its peer.
    pub total_link_credit: u32,
    /// Replenish credit as deliveries are settled.
    pub auto_send_flow: bool,
    /// Settlements between two credit Flows. Defaults to two thirds of
    /// `total_link_credit`.
    pub flow_threshold: Option<u32>,
    /// Largest message accepted or sent. Zero is unlimited.
    pub max_message_size: u64,
    pub initial_delivery_count: u32,
    pub properties: Option<Fields>,
    pub operation_timeout: Duration,
}

impl LinkSettings {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            source: None,
            target: None,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            total_link_credit: DEFAULT_LINK_CREDIT,
            auto_send_flow: true,
            flow_threshold: None,
            max_message_size: 0,
            initial_delivery_count: 0,
            properties: None,
            operation_timeout: Duration::from_secs(60),
        }
    }

    /// A sender to `address`.
    pub fn sender(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut settings = Self::new(name, Role::Sender);
        settings.target = Some(Target::new(address));
        settings.source = Some(Source::default());
        settings
    }

    /// A receiver from `address`.
    pub fn receiver(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut settings = Self::new(name, Role::Receiver);
        settings.source = Some(Source::new(address));
        settings.target = Some(Target::default());
        settings
    }

    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_settle_modes(mut self, snd: SenderSettleMode, rcv: ReceiverSettleMode) -> Self {
        self.snd_settle_mode = snd;
        self.rcv_settle_mode = rcv;
        self
    }

    #[must_use]
    pub fn with_total_link_credit(mut self, credit: u32) -> Self {
        self.total_link_credit = credit;
        self
    }

    #[must_use]
    pub fn with_auto_send_flow(mut self, auto: bool) -> Self {
        self.auto_send_flow = auto;
        self
    }

    #[must_use]
    pub fn with_flow_threshold(mut self, threshold: u32) -> Self {
        self.flow_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, size: u64) -> Self {
        self.max_message_size = size;
        self
    }

    #[must_use]
    pub fn with_initial_delivery_count(mut self, count: u32) -> Self {
        self.initial_delivery_count = count;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Fields) -> Self {
        self.properties = Some(properties);
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub(crate) fn flow_threshold(&self) -> u32 {
        self.flow_threshold
            .unwrap_or_else(|| (self.total_link_credit.saturating_mul(2) / 3).max(1))
            .max(1)
    }
}
