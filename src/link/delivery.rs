use core::fmt;

use tokio::sync::oneshot;

use crate::{
    buffers::BufferList,
    error::{Error, Result},
    protocol::{DeliveryNumber, DeliveryState, DeliveryTag},
};

/// A message received on a link.
///
/// The payload is opaque to the engine: it is the concatenation of the
/// payloads of every Transfer frame of the delivery, without copies.
#[derive(Clone, PartialEq)]
pub struct Delivery {
    pub(crate) id: DeliveryNumber,
    pub(crate) tag: DeliveryTag,
    pub(crate) message_format: u32,
    pub(crate) settled: bool,
    pub(crate) state: Option<DeliveryState>,
    pub(crate) payload: BufferList,
}

impl Delivery {
    pub fn delivery_id(&self) -> DeliveryNumber {
        self.id
    }

    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    pub fn message_format(&self) -> u32 {
        self.message_format
    }

    /// Whether the sender settled the delivery, in which case it needs no
    /// disposition.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// The state the sender attached to the delivery, if any.
    pub fn state(&self) -> Option<&DeliveryState> {
        self.state.as_ref()
    }

    pub fn payload(&self) -> &BufferList {
        &self.payload
    }

    pub fn into_payload(self) -> BufferList {
        self.payload
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("settled", &self.settled)
            .field("len", &self.payload.len())
            .finish()
    }
}

pub(crate) type OutcomeSender = oneshot::Sender<Result<DeliveryState>>;
pub(crate) type OutcomeReceiver = oneshot::Receiver<Result<DeliveryState>>;

/// Resolves with the outcome of a sent delivery once it is settled.
///
/// Pre-settled deliveries resolve at once with [`DeliveryState::Accepted`].
/// If the link closes first, the tracker resolves with the link's closed
/// error.
#[derive(Debug)]
#[must_use = "a tracker does nothing unless its outcome is awaited"]
pub struct DeliveryTracker {
    id: DeliveryNumber,
    tag: DeliveryTag,
    rx: OutcomeReceiver,
}

impl DeliveryTracker {
    pub(crate) fn new(id: DeliveryNumber, tag: DeliveryTag, rx: OutcomeReceiver) -> Self {
        Self { id, tag, rx }
    }

    pub(crate) fn settled(id: DeliveryNumber, tag: DeliveryTag) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(DeliveryState::Accepted));
        Self::new(id, tag, rx)
    }

    pub fn delivery_id(&self) -> DeliveryNumber {
        self.id
    }

    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    pub async fn outcome(self) -> Result<DeliveryState> {
        match self.rx.await {
            Ok(res) => res,
            Err(_) => Err(Error::closed(format!("delivery {:?}", self.tag), None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCondition;

    #[tokio::test]
    async fn tracker_resolves_with_outcome() {
        let (tx, rx) = oneshot::channel();
        let tracker = DeliveryTracker::new(3, DeliveryTag::from(3u64), rx);
        tx.send(Ok(DeliveryState::Released)).unwrap();
        assert_eq!(tracker.outcome().await.unwrap(), DeliveryState::Released);

        let presettled = DeliveryTracker::settled(4, DeliveryTag::from(4u64));
        assert_eq!(presettled.delivery_id(), 4);
        assert_eq!(presettled.outcome().await.unwrap(), DeliveryState::Accepted);
    }

    #[tokio::test]
    async fn dropped_sender_is_a_closed_error() {
        let (tx, rx) = oneshot::channel();
        let tracker = DeliveryTracker::new(0, DeliveryTag::from(vec![1, 2]), rx);
        drop(tx);
        let err = tracker.outcome().await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));

        let (tx, rx) = oneshot::channel();
        let tracker = DeliveryTracker::new(1, DeliveryTag::default(), rx);
        tx.send(Err(Error::amqp(ErrorCondition::DetachForced, "gone"))).unwrap();
        let err = tracker.outcome().await.unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::DetachForced));
    }
}
