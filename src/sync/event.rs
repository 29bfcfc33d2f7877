use std::sync::atomic::{AtomicBool, Ordering};

use event_listener::Event;

/// Wakes every task waiting for a condition on shared state to change.
///
/// Waiters re-check their condition after registering a listener, so a
/// notification that races with the registration is never lost.
pub(crate) struct Signal {
    event: Event,
    closed: AtomicBool,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            event: Event::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Wakes all current waiters so they re-check their condition.
    pub(crate) fn notify(&self) {
        self.event.notify(usize::MAX);
    }

    /// Wakes all waiters and makes every later wait return `None`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.event.notify(usize::MAX);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits until `check` returns `Some`, or until the signal is closed.
    ///
    /// `check` runs at least once, and again after every notification.
    pub(crate) async fn wait_until<T, F>(&self, mut check: F) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        loop {
            if let Some(t) = check() {
                return Some(t);
            }
            if self.is_closed() {
                return None;
            }

            let listener = self.event.listen();

            if let Some(t) = check() {
                return Some(t);
            }
            if self.is_closed() {
                return None;
            }

            listener.await;
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
