use crate::{
    error::{Error, ErrorCondition, Result},
    protocol::{Flow, SeqNum, constants::INFINITE},
};

/// Credit as seen by the sending end of a link.
#[derive(Debug, Clone)]
pub(crate) struct SenderCredit {
    initial_delivery_count: SeqNum,
    delivery_count: SeqNum,
    link_credit: u32,
    drain: bool,
}

impl SenderCredit {
    pub(crate) fn new(initial_delivery_count: u32) -> Self {
        Self {
            initial_delivery_count: SeqNum::new(initial_delivery_count),
            delivery_count: SeqNum::new(initial_delivery_count),
            link_credit: 0,
            drain: false,
        }
    }

    pub(crate) fn credit(&self) -> u32 {
        self.link_credit
    }

    pub(crate) fn delivery_count(&self) -> u32 {
        self.delivery_count.get()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.drain
    }

    /// Takes one credit for a new delivery. Returns `false`, leaving the
    /// counters untouched, when no credit is left.
    pub(crate) fn try_consume(&mut self) -> bool {
        if self.link_credit == 0 {
            return false;
        }
        if self.link_credit != INFINITE {
            self.link_credit -= 1;
        }
        self.delivery_count.post_increment();
        true
    }

    /// Recomputes the credit from the receiver's flow state.
    ///
    /// The receiver grants deliveries up to `delivery-count + link-credit`
    /// as it last saw the sender's count. Deliveries sent since then are
    /// deducted.
    pub(crate) fn on_flow(&mut self, flow: &Flow) {
        let Some(link_credit) = flow.link_credit else {
            return;
        };
        self.drain = flow.drain;
        if link_credit == INFINITE {
            self.link_credit = INFINITE;
            return;
        }
        let base = flow
            .delivery_count
            .map(SeqNum::new)
            .unwrap_or(self.initial_delivery_count);
        let limit = base.add(link_credit);
        self.link_credit = u32::try_from(limit.diff(self.delivery_count).max(0)).unwrap_or(0);
    }

    /// Consumes the remaining credit of a drain request. Returns whether any
    /// was consumed, in which case the new state must be echoed.
    pub(crate) fn drain(&mut self) -> bool {
        if !self.drain || self.link_credit == 0 {
            return false;
        }
        if self.link_credit != INFINITE {
            self.delivery_count = self.delivery_count.add(self.link_credit);
        }
        self.link_credit = 0;
        self.drain = false;
        true
    }
}

/// Credit granted by the receiving end of a link.
#[derive(Debug, Clone)]
pub(crate) struct ReceiverCredit {
    delivery_count: SeqNum,
    link_credit: u32,
    total: u32,
    /// A new total waiting for the next transfer.
    temp_total: Option<u32>,
    /// Configured threshold. `None` follows two thirds of the total.
    fixed_threshold: Option<u32>,
    threshold: u32,
    settled_since_flow: u32,
    auto_flow: bool,
    drain: bool,
}

impl ReceiverCredit {
    pub(crate) fn new(total: u32, threshold: Option<u32>, auto_flow: bool) -> Self {
        let mut credit = Self {
            delivery_count: SeqNum::new(0),
            link_credit: 0,
            total: 0,
            temp_total: None,
            fixed_threshold: threshold,
            threshold: 1,
            settled_since_flow: 0,
            auto_flow,
            drain: false,
        };
        credit.apply_total(total);
        credit
    }

    pub(crate) fn credit(&self) -> u32 {
        self.link_credit
    }

    pub(crate) fn total(&self) -> u32 {
        self.total
    }

    pub(crate) fn delivery_count(&self) -> u32 {
        self.delivery_count.get()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.drain
    }

    pub(crate) fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The sender's Attach tells where its delivery-count starts.
    pub(crate) fn on_attach(&mut self, initial_delivery_count: Option<u32>) {
        self.delivery_count = SeqNum::new(initial_delivery_count.unwrap_or(0));
    }

    /// Accounts for the first frame of an incoming delivery.
    pub(crate) fn on_transfer(&mut self) -> Result<()> {
        if let Some(total) = self.temp_total.take() {
            self.apply_total(total);
        }
        if self.link_credit == 0 {
            return Err(Error::amqp(
                ErrorCondition::TransferLimitExceeded,
                "transfer received without link credit",
            ));
        }
        if self.link_credit != INFINITE {
            self.link_credit -= 1;
        }
        self.delivery_count.post_increment();
        Ok(())
    }

    /// Accounts for the sender's flow state, which moves the delivery-count
    /// forward after a drain.
    pub(crate) fn on_flow(&mut self, flow: &Flow) {
        let Some(delivery_count) = flow.delivery_count else {
            return;
        };
        let delivery_count = SeqNum::new(delivery_count);
        if self.link_credit != INFINITE {
            let limit = self.delivery_count.add(self.link_credit);
            self.link_credit = u32::try_from(limit.diff(delivery_count).max(0)).unwrap_or(0);
        }
        self.delivery_count = delivery_count;
        if self.link_credit == 0 {
            self.drain = false;
        }
    }

    /// Gives back the credit of a settled delivery. Returns whether a Flow
    /// is due.
    pub(crate) fn on_settled(&mut self) -> bool {
        if !self.auto_flow || self.link_credit == INFINITE {
            return false;
        }
        self.link_credit = self.link_credit.saturating_add(1).min(self.total);
        self.settled_since_flow += 1;
        self.settled_since_flow >= self.threshold
    }

    /// Replaces the credit. The caller sends the Flow.
    pub(crate) fn issue(&mut self, credit: u32, drain: bool) {
        self.link_credit = credit;
        self.drain = drain;
    }

    /// Changes the total credit, now or when the next transfer arrives.
    /// Returns whether a Flow is due.
    pub(crate) fn set_total(&mut self, total: u32, apply_now: bool) -> bool {
        if apply_now {
            self.temp_total = None;
            self.apply_total(total);
            true
        } else {
            self.temp_total = Some(total);
            false
        }
    }

    fn apply_total(&mut self, total: u32) {
        if total == INFINITE || self.link_credit == INFINITE {
            self.link_credit = total;
        } else {
            let credit = i64::from(self.link_credit) + i64::from(total) - i64::from(self.total);
            self.link_credit = u32::try_from(credit.max(0)).unwrap_or(u32::MAX);
        }
        self.total = total;
        self.threshold = self
            .fixed_threshold
            .unwrap_or_else(|| total.saturating_mul(2) / 3)
            .max(1);
    }

    /// Called whenever a link Flow is sent.
    pub(crate) fn flow_sent(&mut self) {
        self.settled_since_flow = 0;
    }
}
