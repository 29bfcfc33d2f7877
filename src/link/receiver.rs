use core::fmt;
use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{LinkInner, LinkSettings, RoleState, credit::ReceiverCredit, delivery::Delivery};
use crate::{
    buffers::BufferList,
    collections::OnDrop,
    endpoint::State,
    error::{AmqpError, Error, ErrorCondition, Result},
    protocol::{DeliveryNumber, DeliveryState, Fields, Handle, ReceiverSettleMode, Source, Target, Transfer},
};

pub(crate) struct ReceiverState {
    pub(super) credit: ReceiverCredit,
    /// The delivery being reassembled.
    partial: Option<Delivery>,
    /// Complete deliveries no receive is waiting for.
    queue: VecDeque<Delivery>,
    pub(super) waiters: VecDeque<(u64, oneshot::Sender<Delivery>)>,
    next_waiter: u64,
}

impl ReceiverState {
    pub(super) fn new(settings: &LinkSettings) -> Self {
        Self {
            credit: ReceiverCredit::new(settings.total_link_credit, settings.flow_threshold, settings.auto_send_flow),
            partial: None,
            queue: VecDeque::new(),
            waiters: VecDeque::new(),
            next_waiter: 0,
        }
    }

    /// Hands `delivery` to the oldest pending receive, or queues it.
    fn dispatch(&mut self, mut delivery: Delivery) {
        while let Some((_, tx)) = self.waiters.pop_front() {
            match tx.send(delivery) {
                Ok(()) => return,
                Err(d) => delivery = d,
            }
        }
        self.queue.push_back(delivery);
    }

    fn remove_waiter(&mut self, key: u64) -> bool {
        match self.waiters.iter().position(|(k, _)| *k == key) {
            Some(i) => {
                self.waiters.remove(i);
                true
            }
            None => false,
        }
    }
}

enum Wake {
    Delivered(core::result::Result<Delivery, oneshot::error::RecvError>),
    TimedOut,
    Cancelled,
}

impl LinkInner {
    pub(super) fn receive_transfer(&self, id: DeliveryNumber, transfer: Transfer, payload: BufferList) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let max_message_size = state.max_message_size;
        let RoleState::Receiver(receiver) = &mut state.role else {
            return Err(Error::amqp(
                ErrorCondition::IllegalState,
                format!("transfer received on sender link '{}'", self.settings.name),
            ));
        };

        if transfer.aborted {
            if let Some(partial) = receiver.partial.take() {
                trace!("{}: delivery {} aborted", self.object.name(), partial.id);
                if receiver.credit.on_settled() {
                    self.send_flow_locked(&mut guard, false)?;
                }
            }
            return Ok(());
        }

        if receiver.partial.is_none() {
            receiver.credit.on_transfer()?;
        }
        let delivery = receiver.partial.get_or_insert_with(|| Delivery {
            id,
            tag: transfer.delivery_tag.clone().unwrap_or_default(),
            message_format: transfer.message_format.unwrap_or(0),
            settled: false,
            state: None,
            payload: BufferList::new(),
        });
        if transfer.settled == Some(true) {
            delivery.settled = true;
        }
        if transfer.state.is_some() {
            delivery.state = transfer.state;
        }
        delivery.payload.append(payload);

        if max_message_size != 0 && delivery.payload.len() as u64 > max_message_size {
            if self.object.is_closing() {
                return Ok(());
            }
            return Err(Error::amqp(
                ErrorCondition::MessageSizeExceeded,
                format!(
                    "delivery {} exceeds the limit of {max_message_size} bytes",
                    delivery.id
                ),
            ));
        }

        if !transfer.more
            && let Some(delivery) = receiver.partial.take()
        {
            trace!(
                "{}: received delivery {} ({} bytes)",
                self.object.name(),
                delivery.id,
                delivery.payload.len()
            );
            receiver.dispatch(delivery);
        }
        Ok(())
    }

    /// The sender settled a delivery this receiver disposed unsettled.
    pub(crate) fn on_remote_settled(self: &Arc<Self>) {
        self.settled_credit();
    }

    /// Gives back the credit of one settled delivery, sending a Flow when
    /// enough settled since the last one.
    fn settled_credit(self: &Arc<Self>) {
        let mut state = self.state.lock();
        let due = match &mut state.role {
            RoleState::Receiver(receiver) => receiver.credit.on_settled(),
            RoleState::Sender(_) => false,
        };
        if due && let Err(e) = self.send_flow_locked(&mut state, false) {
            drop(state);
            self.fail(e);
        }
    }
}

/// The receiving end of a link.
#[derive(Clone)]
pub struct ReceiverLink {
    inner: Arc<LinkInner>,
}

impl ReceiverLink {
    pub(crate) fn new(inner: Arc<LinkInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle()
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.object.is_closed()
    }

    /// The source, with a dynamic address resolved by the peer.
    pub fn source(&self) -> Option<Source> {
        self.inner.source()
    }

    pub fn target(&self) -> Option<Target> {
        self.inner.target()
    }

    pub fn max_message_size(&self) -> u64 {
        self.inner.max_message_size()
    }

    pub fn properties(&self) -> Option<&Fields> {
        self.inner.settings.properties.as_ref()
    }

    /// Credit currently granted to the sender.
    pub fn credit(&self) -> u32 {
        self.with_state(|r| r.credit.credit())
    }

    pub fn total_link_credit(&self) -> u32 {
        self.with_state(|r| r.credit.total())
    }

    /// Complete deliveries waiting for a receive.
    pub fn queued(&self) -> usize {
        self.with_state(|r| r.queue.len())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ReceiverState) -> T) -> T {
        let mut state = self.inner.state.lock();
        match &mut state.role {
            RoleState::Receiver(receiver) => f(receiver),
            RoleState::Sender(_) => unreachable!("receiver link with sender state"),
        }
    }

    /// Waits up to `timeout` for the next delivery. Returns `None` on
    /// timeout.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>> {
        self.receive_with_cancel(timeout, &CancellationToken::new()).await
    }

    /// Like [`receive`](Self::receive), but fails with
    /// [`Error::Cancelled`] once `token` is cancelled.
    ///
    /// A delivery is returned by exactly one receive. If the future is
    /// dropped after a delivery was routed to it, the delivery goes back to
    /// the front of the queue.
    pub async fn receive_with_cancel(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Option<Delivery>> {
        let inner = &self.inner;
        let (key, rx) = {
            let mut state = inner.state.lock();
            let RoleState::Receiver(receiver) = &mut state.role else {
                return Err(Error::amqp(ErrorCondition::IllegalState, "not a receiver"));
            };
            if let Some(delivery) = receiver.queue.pop_front() {
                drop(state);
                return Ok(Some(self.delivered(delivery)));
            }
            if inner.object.is_closing() {
                return Err(inner.object.closed_error());
            }
            let key = receiver.next_waiter;
            receiver.next_waiter += 1;
            let (tx, rx) = oneshot::channel();
            receiver.waiters.push_back((key, tx));
            (key, rx)
        };

        let link = inner.clone();
        let mut guard = OnDrop::new(rx, move |mut rx: oneshot::Receiver<Delivery>| {
            let mut state = link.state.lock();
            if let RoleState::Receiver(receiver) = &mut state.role {
                receiver.remove_waiter(key);
                if let Ok(delivery) = rx.try_recv() {
                    receiver.queue.push_front(delivery);
                }
            }
        });

        let wake = match guard.get_mut() {
            Some(rx) => tokio::select! {
                res = rx => Wake::Delivered(res),
                _ = tokio::time::sleep(timeout) => Wake::TimedOut,
                _ = token.cancelled() => Wake::Cancelled,
            },
            None => Wake::Cancelled,
        };
        let Some(mut rx) = guard.defuse() else {
            return Err(Error::Cancelled);
        };

        match wake {
            Wake::Delivered(Ok(delivery)) => Ok(Some(self.delivered(delivery))),
            Wake::Delivered(Err(_)) => Err(inner.object.closed_error()),
            Wake::TimedOut => Ok(self.raced(key, &mut rx)),
            Wake::Cancelled => self.raced(key, &mut rx).map(Some).ok_or(Error::Cancelled),
        }
    }

    /// Withdraws waiter `key`. If a delivery was routed to it first, that
    /// delivery is the result.
    fn raced(&self, key: u64, rx: &mut oneshot::Receiver<Delivery>) -> Option<Delivery> {
        if self.with_state(|r| r.remove_waiter(key)) {
            return None;
        }
        rx.try_recv().ok().map(|delivery| self.delivered(delivery))
    }

    /// A pre-settled delivery gives its credit back as it leaves the queue.
    fn delivered(&self, delivery: Delivery) -> Delivery {
        if delivery.settled {
            self.inner.settled_credit();
        }
        delivery
    }

    /// Sends `state` as the outcome of `delivery`.
    ///
    /// In [`ReceiverSettleMode::First`] the delivery is settled at once and
    /// its credit goes back to the sender. In
    /// [`ReceiverSettleMode::Second`] it stays unsettled until the sender
    /// settles it.
    pub fn dispose(&self, delivery: &Delivery, state: DeliveryState) -> Result<()> {
        if delivery.settled {
            return Ok(());
        }
        let inner = &self.inner;
        inner.object.check_active()?;
        let settle = inner.settings.rcv_settle_mode == ReceiverSettleMode::First;
        let found = inner.session()?.dispose_incoming(delivery.id, state, settle)?;
        if found && settle {
            inner.settled_credit();
        } else if !found {
            debug!("{}: delivery {} is already settled", inner.object.name(), delivery.id);
        }
        Ok(())
    }

    pub fn accept(&self, delivery: &Delivery) -> Result<()> {
        self.dispose(delivery, DeliveryState::Accepted)
    }

    pub fn reject(&self, delivery: &Delivery, error: impl Into<AmqpError>) -> Result<()> {
        self.dispose(delivery, DeliveryState::rejected(error))
    }

    pub fn release(&self, delivery: &Delivery) -> Result<()> {
        self.dispose(delivery, DeliveryState::Released)
    }

    pub fn modify(&self, delivery: &Delivery, delivery_failed: bool, undeliverable_here: bool) -> Result<()> {
        self.dispose(
            delivery,
            DeliveryState::Modified {
                delivery_failed,
                undeliverable_here,
                message_annotations: None,
            },
        )
    }

    /// Grants `credit` to the sender, replacing the current grant. With
    /// `drain`, the sender uses or gives back all of it at once.
    pub fn issue_credit(&self, credit: u32, drain: bool) -> Result<()> {
        let inner = &self.inner;
        inner.object.check_active()?;
        let mut state = inner.state.lock();
        if let RoleState::Receiver(receiver) = &mut state.role {
            receiver.credit.issue(credit, drain);
        }
        inner.send_flow_locked(&mut state, false)
    }

    /// Changes the credit kept granted to the sender. Unless `apply_now`,
    /// the change waits for the next transfer.
    pub fn set_total_link_credit(&self, credit: u32, apply_now: bool) -> Result<()> {
        let inner = &self.inner;
        inner.object.check_active()?;
        let mut state = inner.state.lock();
        let due = match &mut state.role {
            RoleState::Receiver(receiver) => receiver.credit.set_total(credit, apply_now),
            RoleState::Sender(_) => false,
        };
        if due && inner.object.state() == State::Opened {
            inner.send_flow_locked(&mut state, false)?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        self.inner.on_closed(f);
    }
}

impl fmt::Debug for ReceiverLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverLink")
            .field("name", &self.name())
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish()
    }
}
