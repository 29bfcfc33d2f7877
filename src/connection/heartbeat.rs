use std::time::Duration;

/// What the heartbeat timer should do at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    Idle,
    /// Nothing was sent for 7/8 of the peer's idle timeout.
    SendEmpty,
    /// Nothing was received within the local idle timeout.
    Expired,
}

/// Keep-alive schedule derived from the negotiated idle timeouts.
///
/// All instants are durations since the local epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Heartbeat {
    send_interval: Option<Duration>,
    expiry: Option<Duration>,
}

impl Heartbeat {
    /// `local_idle` is the timeout this end advertised, `remote_idle` the
    /// peer's. Zero or absent disables the corresponding side.
    pub(crate) fn new(local_idle: Option<u32>, remote_idle: Option<u32>) -> Self {
        let enabled = |ms: Option<u32>| ms.filter(|ms| *ms != 0).map(|ms| u64::from(ms));
        Self {
            send_interval: enabled(remote_idle).map(|ms| Duration::from_millis(ms * 7 / 8)),
            expiry: enabled(local_idle).map(Duration::from_millis),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.send_interval.is_some() || self.expiry.is_some()
    }

    pub(crate) fn send_interval(&self) -> Option<Duration> {
        self.send_interval
    }

    /// The next instant [`check`](Self::check) can return something else than
    /// [`Beat::Idle`].
    pub(crate) fn next_deadline(&self, last_sent: Duration, last_received: Duration) -> Option<Duration> {
        let send = self.send_interval.map(|i| last_sent + i);
        let expire = self.expiry.map(|e| last_received + e + Duration::from_millis(1));
        match (send, expire) {
            (Some(s), Some(e)) => Some(s.min(e)),
            (s, e) => s.or(e),
        }
    }

    pub(crate) fn check(&self, now: Duration, last_sent: Duration, last_received: Duration) -> Beat {
        if let Some(expiry) = self.expiry
            && now.saturating_sub(last_received) > expiry
        {
            return Beat::Expired;
        }
        if let Some(interval) = self.send_interval
            && now.saturating_sub(last_sent) >= interval
        {
            return Beat::SendEmpty;
        }
        Beat::Idle
    }
}
