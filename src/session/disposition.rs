use std::time::Duration;

use crate::protocol::{DeliveryState, Disposition, Role, SeqNum};

/// A run of settlements that goes out as one Disposition.
#[derive(Debug)]
struct Run {
    role: Role,
    first: SeqNum,
    last: SeqNum,
    settled: bool,
    state: DeliveryState,
    count: u32,
}

impl Run {
    fn extends(&self, role: Role, id: u32, settled: bool, state: &DeliveryState) -> bool {
        self.role == role && self.last.next().get() == id && self.settled == settled && &self.state == state
    }

    fn into_disposition(self) -> Disposition {
        Disposition {
            role: self.role,
            first: self.first.get(),
            last: (self.first != self.last).then_some(self.last.get()),
            settled: self.settled,
            state: Some(self.state),
            batchable: false,
        }
    }
}

/// Merges settlements of contiguous delivery-ids into ranges.
///
/// Only Accepted and Released outcomes are merged, and only while the role,
/// the settled flag and the outcome stay the same. Anything else flushes the
/// run in progress first, so dispositions keep delivery-id order.
#[derive(Debug)]
pub(crate) struct DispositionBatcher {
    interval: Duration,
    threshold: u32,
    run: Option<Run>,
}

impl DispositionBatcher {
    pub(crate) fn new(interval: Duration, threshold: u32) -> Self {
        Self {
            interval,
            threshold: threshold.max(1),
            run: None,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.run.is_some()
    }

    /// Records the settlement of `id` and returns what must be sent now.
    pub(crate) fn add(
        &mut self,
        role: Role,
        id: u32,
        settled: bool,
        state: Option<DeliveryState>,
    ) -> Vec<Disposition> {
        let mut out = Vec::new();
        let batchable = match &state {
            Some(state) => !self.interval.is_zero() && state.is_batchable(),
            None => false,
        };

        if let Some(run) = &mut self.run {
            if let Some(state) = state.as_ref().filter(|_| batchable)
                && run.extends(role, id, settled, state)
            {
                run.last = SeqNum::new(id);
                run.count += 1;
                if run.count >= self.threshold {
                    out.extend(self.flush());
                }
                return out;
            }
            out.extend(self.flush());
        }

        match state {
            Some(state) if batchable => {
                self.run = Some(Run {
                    role,
                    first: SeqNum::new(id),
                    last: SeqNum::new(id),
                    settled,
                    state,
                    count: 1,
                });
                if self.threshold == 1 {
                    out.extend(self.flush());
                }
            }
            state => out.push(Disposition {
                role,
                first: id,
                last: None,
                settled,
                state,
                batchable: false,
            }),
        }
        out
    }

    /// Takes the run in progress.
    pub(crate) fn flush(&mut self) -> Option<Disposition> {
        self.run.take().map(Run::into_disposition)
    }
}
