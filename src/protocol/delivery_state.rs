use crate::{error::AmqpError, protocol::Fields};

/// The state of a delivery at one end of a link.
///
/// `Received` is the only non-terminal state. The others are outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Received {
        section_number: u32,
        section_offset: u64,
    },
    Accepted,
    Rejected {
        error: Option<AmqpError>,
    },
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
        message_annotations: Option<Fields>,
    },
    /// Wraps an outcome inside a transaction.
    Transactional {
        txn_id: Vec<u8>,
        outcome: Option<Box<DeliveryState>>,
    },
}

impl DeliveryState {
    pub(crate) const RECEIVED: u64 = 0x23;
    pub(crate) const ACCEPTED: u64 = 0x24;
    pub(crate) const REJECTED: u64 = 0x25;
    pub(crate) const RELEASED: u64 = 0x26;
    pub(crate) const MODIFIED: u64 = 0x27;
    pub(crate) const TRANSACTIONAL: u64 = 0x34;

    pub fn rejected(error: impl Into<AmqpError>) -> Self {
        DeliveryState::Rejected {
            error: Some(error.into()),
        }
    }

    /// Whether this state is an outcome, after which the delivery can be
    /// settled.
    pub fn is_terminal(&self) -> bool {
        match self {
            DeliveryState::Received { .. } => false,
            DeliveryState::Transactional { outcome, .. } => outcome.is_some(),
            _ => true,
        }
    }

    /// Only dispositions with these outcomes are merged into ranges.
    pub(crate) fn is_batchable(&self) -> bool {
        matches!(self, DeliveryState::Accepted | DeliveryState::Released)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Received { .. } => "received",
            DeliveryState::Accepted => "accepted",
            DeliveryState::Rejected { .. } => "rejected",
            DeliveryState::Released => "released",
            DeliveryState::Modified { .. } => "modified",
            DeliveryState::Transactional { .. } => "transactional",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCondition;

    #[test]
    fn terminal_states() {
        assert!(
            !DeliveryState::Received {
                section_number: 0,
                section_offset: 0
            }
            .is_terminal()
        );
        assert!(DeliveryState::Accepted.is_terminal());
        assert!(DeliveryState::rejected(ErrorCondition::NotAllowed).is_terminal());
        assert!(
            !DeliveryState::Transactional {
                txn_id: vec![1],
                outcome: None
            }
            .is_terminal()
        );
    }

    #[test]
    fn only_accepted_and_released_batch() {
        assert!(DeliveryState::Accepted.is_batchable());
        assert!(DeliveryState::Released.is_batchable());
        assert!(!DeliveryState::rejected(ErrorCondition::NotAllowed).is_batchable());
        assert!(
            !DeliveryState::Modified {
                delivery_failed: true,
                undeliverable_here: false,
                message_annotations: None
            }
            .is_batchable()
        );
    }
}
