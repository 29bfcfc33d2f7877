use crate::{
    error::{Error, ErrorCondition, Result},
    protocol::{Flow, SeqNum, constants::INFINITE},
};

/// The sending half of a session: transfer-ids and the peer's incoming
/// window as last announced.
#[derive(Debug, Clone)]
pub(crate) struct OutgoingWindow {
    initial_outgoing_id: SeqNum,
    next_outgoing_id: SeqNum,
    /// Transfers the peer still accepts. [`INFINITE`] is never decremented.
    window: u32,
    /// The outgoing window advertised to the peer.
    advertised: u32,
}

impl OutgoingWindow {
    pub(crate) fn new(initial_outgoing_id: u32, advertised: u32) -> Self {
        Self {
            initial_outgoing_id: SeqNum::new(initial_outgoing_id),
            next_outgoing_id: SeqNum::new(initial_outgoing_id),
            window: 0,
            advertised,
        }
    }

    pub(crate) fn next_outgoing_id(&self) -> u32 {
        self.next_outgoing_id.get()
    }

    pub(crate) fn window(&self) -> u32 {
        self.window
    }

    pub(crate) fn advertised(&self) -> u32 {
        self.advertised
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.window > 0
    }

    /// The peer's Begin announces its initial incoming window.
    pub(crate) fn on_begin(&mut self, incoming_window: u32) {
        self.window = incoming_window;
    }

    /// Takes a transfer-id, or `None` if the window is exhausted.
    pub(crate) fn try_consume(&mut self) -> Option<u32> {
        if self.window == 0 {
            return None;
        }
        if self.window != INFINITE {
            self.window -= 1;
        }
        Some(self.next_outgoing_id.post_increment().get())
    }

    /// Returns `id`, the last transfer-id taken, when its frame never went out.
    pub(crate) fn give_back(&mut self, id: u32) {
        if self.next_outgoing_id.diff(SeqNum::new(id)) != 1 {
            return;
        }
        self.next_outgoing_id = SeqNum::new(id);
        if self.window != INFINITE {
            self.window += 1;
        }
    }

    /// Recomputes the window from the peer's view of its receive position.
    pub(crate) fn on_flow(&mut self, flow: &Flow) {
        if flow.incoming_window == INFINITE {
            self.window = INFINITE;
            return;
        }
        let next_incoming = flow
            .next_incoming_id
            .map(SeqNum::new)
            .unwrap_or(self.initial_outgoing_id);
        let limit = next_incoming.add(flow.incoming_window);
        let window = limit.diff(self.next_outgoing_id);
        self.window = u32::try_from(window.max(0)).unwrap_or(0);
    }
}

/// The receiving half of a session.
#[derive(Debug, Clone)]
pub(crate) struct IncomingWindow {
    next_incoming_id: Option<SeqNum>,
    seeded_by_transfer: bool,
    window: u32,
    max: u32,
    /// Transfers restored since the last Flow.
    restored: u32,
    threshold: u32,
}

impl IncomingWindow {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            next_incoming_id: None,
            seeded_by_transfer: false,
            window: max,
            max,
            restored: 0,
            threshold: (max.saturating_mul(2) / 3).max(1),
        }
    }

    pub(crate) fn next_incoming_id(&self) -> Option<u32> {
        self.next_incoming_id.map(|n| n.get())
    }

    pub(crate) fn window(&self) -> u32 {
        self.window
    }

    /// The peer's Begin tells where its transfer-ids start.
    pub(crate) fn on_begin(&mut self, next_outgoing_id: u32) {
        if !self.seeded_by_transfer {
            self.next_incoming_id = Some(SeqNum::new(next_outgoing_id));
        }
    }

    /// Accounts for one incoming transfer frame.
    ///
    /// The first transfer of the session seeds the position from its
    /// delivery-id.
    pub(crate) fn on_transfer(&mut self, delivery_id: Option<u32>) -> Result<()> {
        if self.window == 0 {
            return Err(Error::amqp(
                ErrorCondition::WindowViolation,
                "transfer received with an exhausted incoming window",
            ));
        }
        if !self.seeded_by_transfer {
            self.seeded_by_transfer = true;
            if let Some(id) = delivery_id {
                self.next_incoming_id = Some(SeqNum::new(id));
            }
        }
        if self.window != INFINITE {
            self.window -= 1;
        }
        let next = self.next_incoming_id.get_or_insert(SeqNum::new(0));
        next.post_increment();
        Ok(())
    }

    /// Gives back `transfers` slots once their delivery settled. Returns
    /// whether enough were restored to announce the window in a Flow.
    pub(crate) fn restore(&mut self, transfers: u32) -> bool {
        if self.window == INFINITE || transfers == 0 {
            return false;
        }
        self.window = self.window.saturating_add(transfers).min(self.max);
        self.restored = self.restored.saturating_add(transfers);
        if self.restored >= self.threshold {
            self.restored = 0;
            return true;
        }
        false
    }

    /// Called whenever a session Flow is sent.
    pub(crate) fn flow_sent(&mut self) {
        self.restored = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_from(incoming: &IncomingWindow) -> Flow {
        Flow {
            next_incoming_id: incoming.next_incoming_id(),
            incoming_window: incoming.window(),
            ..Default::default()
        }
    }

    #[test]
    fn outgoing_window_is_consumed_and_refilled() {
        let mut out = OutgoingWindow::new(10, INFINITE);
        assert_eq!(out.try_consume(), None);
        out.on_begin(2);
        assert_eq!(out.try_consume(), Some(10));
        assert_eq!(out.try_consume(), Some(11));
        assert_eq!(out.try_consume(), None);

        out.on_flow(&Flow {
            next_incoming_id: Some(12),
            incoming_window: 3,
            ..Default::default()
        });
        assert_eq!(out.window(), 3);

        out.on_flow(&Flow {
            incoming_window: INFINITE,
            ..Default::default()
        });
        for _ in 0..10 {
            out.try_consume().unwrap();
        }
        assert_eq!(out.window(), INFINITE);
        assert_eq!(out.next_outgoing_id(), 22);
    }

    #[test]
    fn unsent_transfer_id_is_given_back() {
        let mut out = OutgoingWindow::new(7, INFINITE);
        out.on_begin(1);
        let id = out.try_consume().unwrap();
        assert!(!out.has_capacity());
        out.give_back(id);
        assert_eq!((out.window(), out.next_outgoing_id()), (1, 7));

        // Only the latest id can be returned.
        out.on_begin(5);
        let first = out.try_consume().unwrap();
        out.try_consume().unwrap();
        out.give_back(first);
        assert_eq!((out.window(), out.next_outgoing_id()), (3, 9));
    }

    #[test]
    fn stale_flow_never_goes_negative() {
        let mut out = OutgoingWindow::new(0, INFINITE);
        out.on_begin(5);
        for _ in 0..5 {
            out.try_consume().unwrap();
        }
        // The peer has not seen the last transfers yet.
        out.on_flow(&Flow {
            next_incoming_id: Some(0),
            incoming_window: 3,
            ..Default::default()
        });
        assert_eq!(out.window(), 0);
    }

    #[test]
    fn window_conservation() {
        let mut out = OutgoingWindow::new(u32::MAX - 3, INFINITE);
        let mut inc = IncomingWindow::new(8);
        out.on_begin(inc.window());
        inc.on_begin(out.next_outgoing_id());

        for round in 0..5 {
            while let Some(id) = out.try_consume() {
                inc.on_transfer((round == 0).then_some(id)).unwrap();
            }
            assert_eq!(inc.next_incoming_id(), Some(out.next_outgoing_id()));
            assert_eq!(inc.window(), 0);
            inc.restore(8);

            // Replaying the receiver's Flow gives the sender the same window.
            out.on_flow(&flow_from(&inc));
            assert_eq!(out.window(), inc.window());
        }
    }

    #[test]
    fn exhausted_incoming_window_is_a_violation() {
        let mut inc = IncomingWindow::new(1);
        inc.on_transfer(Some(40)).unwrap();
        assert_eq!(inc.next_incoming_id(), Some(41));
        let err = inc.on_transfer(None).unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::WindowViolation));
    }

    #[test]
    fn first_transfer_seeds_position() {
        let mut inc = IncomingWindow::new(100);
        inc.on_begin(7);
        assert_eq!(inc.next_incoming_id(), Some(7));
        inc.on_transfer(Some(1000)).unwrap();
        assert_eq!(inc.next_incoming_id(), Some(1001));
        inc.on_transfer(Some(1001)).unwrap();
        assert_eq!(inc.next_incoming_id(), Some(1002));
    }

    #[test]
    fn restore_reports_threshold() {
        let mut inc = IncomingWindow::new(9);
        for _ in 0..9 {
            inc.on_transfer(None).unwrap();
        }
        assert!(!inc.restore(5));
        assert!(inc.restore(1));
        assert_eq!(inc.window(), 6);
        assert!(!inc.restore(3));
        assert_eq!(inc.window(), 9);
    }
}
