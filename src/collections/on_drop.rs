/// Runs a cleanup function on a value when the guard is dropped, unless the
/// value is taken back first with [`OnDrop::defuse`].
///
/// A pending receive keeps its reply slot in a guard: if the receive future
/// is dropped before it resolves, the guard hands back any delivery that was
/// already routed to it.
pub(crate) struct OnDrop<T, D>
where
    D: FnOnce(T),
{
    inner: Option<(T, D)>,
}

impl<T, D> OnDrop<T, D>
where
    D: FnOnce(T),
{
    pub(crate) fn new(t: T, drop: D) -> Self {
        Self { inner: Some((t, drop)) }
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut().map(|(t, _)| t)
    }

    /// Takes the value back without running the cleanup function.
    pub(crate) fn defuse(mut self) -> Option<T> {
        self.inner.take().map(|(t, _)| t)
    }
}

impl<T, D> Drop for OnDrop<T, D>
where
    D: FnOnce(T),
{
    fn drop(&mut self) {
        if let Some((t, d)) = self.inner.take() {
            d(t)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::channel,
    };

    use super::*;

    #[test]
    fn cleanup_runs_on_drop() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let value = 42;
        let guard = OnDrop::new(value, move |v| {
            COUNTER.store(v, Ordering::SeqCst);
        });
        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(COUNTER.load(Ordering::SeqCst), value);

        let (sender, receiver) = channel();
        let data = vec![1u8, 2, 3, 4, 5];
        let guard = OnDrop::new(data.clone(), move |v| {
            sender.send(v).unwrap();
        });
        drop(guard);
        assert_eq!(data, receiver.try_recv().unwrap())
    }

    #[test]
    fn defused_guard_skips_cleanup() {
        let (sender, receiver) = channel::<u8>();
        let mut guard = OnDrop::new(1u8, move |v| sender.send(v).unwrap());
        *guard.get_mut().unwrap() += 1;
        assert_eq!(guard.defuse(), Some(2));
        assert!(receiver.try_recv().is_err());
    }
}
