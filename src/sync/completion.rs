use std::{mem, sync::OnceLock};

use event_listener::Event;
use parking_lot::Mutex;

use crate::error::AmqpError;

type Observer = Box<dyn FnOnce(Option<&AmqpError>) + Send>;

/// A one-shot latch that completes once, successfully or with an error.
///
/// Observers registered with [`on_complete`](Self::on_complete) run exactly
/// once: immediately if the latch already completed, otherwise on the thread
/// that completes it.
pub(crate) struct Completion {
    result: OnceLock<Option<AmqpError>>,
    event: Event,
    observers: Mutex<Vec<Observer>>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            result: OnceLock::new(),
            event: Event::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Completes the latch. Returns `false` if it had already completed, in
    /// which case `error` is discarded.
    pub(crate) fn complete(&self, error: Option<AmqpError>) -> bool {
        if self.result.set(error).is_err() {
            return false;
        }
        let observers = mem::take(&mut *self.observers.lock());
        let result = self.result.get().and_then(Option::as_ref);
        for observer in observers {
            observer(result);
        }
        self.event.notify(usize::MAX);
        true
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.result.get().is_some()
    }

    /// The outcome, once completed: `Some(None)` on success.
    pub(crate) fn outcome(&self) -> Option<Option<&AmqpError>> {
        self.result.get().map(Option::as_ref)
    }

    pub(crate) fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Option<&AmqpError>) + Send + 'static,
    {
        let mut observers = self.observers.lock();
        match self.result.get() {
            Some(result) => {
                drop(observers);
                f(result.as_ref());
            }
            None => observers.push(Box::new(f)),
        }
    }

    /// Waits for completion and returns the error it completed with, if any.
    pub(crate) async fn wait(&self) -> Option<AmqpError> {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            let listener = self.event.listen();
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            listener.await;
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::error::ErrorCondition;

    #[test]
    fn observers_fire_once() {
        let completion = Completion::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        completion.on_complete(move |e| {
            assert!(e.is_none());
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(completion.complete(None));
        assert!(!completion.complete(Some(ErrorCondition::InternalError.into())));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(completion.outcome(), Some(None));

        // Late observers run immediately.
        let f = fired.clone();
        completion.on_complete(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn racing_completions_notify_once() {
        let completion = Arc::new(Completion::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        completion.on_complete(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let completion = completion.clone();
                tokio::spawn(async move {
                    let error = (i % 2 == 0).then(|| AmqpError::from(ErrorCondition::ConnectionForced));
                    completion.complete(error)
                })
            })
            .collect();
        let mut winners = 0;
        for task in tasks {
            winners += usize::from(task.await.unwrap());
        }
        assert_eq!(winners, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_returns_error() {
        let completion = Arc::new(Completion::new());
        let waiter = tokio::spawn({
            let completion = completion.clone();
            async move { completion.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        completion.complete(Some(ErrorCondition::NotAllowed.into()));
        let error = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(error.map(|e| e.condition), Some(ErrorCondition::NotAllowed));
    }
}
