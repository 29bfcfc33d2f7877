use std::{
    sync::{
        LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub(crate) static LOCAL_EPOCH: LazyLock<quanta::Instant> = LazyLock::new(quanta::Instant::now);

/// Time elapsed since [`LOCAL_EPOCH`].
pub(crate) fn now() -> Duration {
    LOCAL_EPOCH.elapsed()
}

/// A point in time, stored as microseconds since [`LOCAL_EPOCH`].
pub(crate) struct AtomicInstant(AtomicU64);

impl AtomicInstant {
    pub(crate) fn now() -> Self {
        Self(AtomicU64::new(now().as_micros() as u64))
    }

    pub(crate) fn touch(&self) {
        self.store(now());
    }

    pub(crate) fn store(&self, at: Duration) {
        self.0.store(at.as_micros() as u64, Ordering::Release);
    }

    pub(crate) fn load(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Acquire))
    }
}
