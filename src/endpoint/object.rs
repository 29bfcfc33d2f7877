use std::sync::{
    OnceLock,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::debug;

use super::state::{Operation, State};
use crate::{
    error::{AmqpError, Error, ErrorCondition, Result},
    sync::Completion,
};

/// Lifecycle bookkeeping embedded in every connection, session and link.
pub(crate) struct AmqpObject {
    name: String,
    state: Mutex<State>,
    terminal: OnceLock<AmqpError>,
    finished: AtomicBool,
    opened: Completion,
    closed: Completion,
}

impl AmqpObject {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::Start),
            terminal: OnceLock::new(),
            finished: AtomicBool::new(false),
            opened: Completion::new(),
            closed: Completion::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock()
    }

    /// Applies `op` and returns the `(from, to)` pair.
    ///
    /// Fails with `IllegalState`, leaving the state untouched, if the current
    /// state has no entry for `op`.
    pub(crate) fn transition(&self, op: Operation) -> Result<(State, State)> {
        let mut state = self.state.lock();
        let from = *state;
        let to = from.transition(op).ok_or_else(|| {
            Error::amqp(
                ErrorCondition::IllegalState,
                format!("{}: {op} is not allowed in state {from}", self.name),
            )
        })?;
        *state = to;
        drop(state);
        debug!("{}: {op} {from} -> {to}", self.name);
        Ok((from, to))
    }

    /// Like [`transition`](Self::transition), but only if the current state is
    /// one of `from`. Returns `None` without changing anything otherwise.
    pub(crate) fn transition_if(&self, op: Operation, from: &[State]) -> Option<State> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return None;
        }
        let to = state.transition(op)?;
        debug!("{}: {op} {} -> {to}", self.name, *state);
        *state = to;
        Some(to)
    }

    pub(crate) fn force(&self, to: State) {
        let mut state = self.state.lock();
        if *state != to {
            debug!("{}: forced {} -> {to}", self.name, *state);
            *state = to;
        }
    }

    /// Records the reason for abnormal termination. The first error wins.
    pub(crate) fn set_terminal(&self, error: AmqpError) -> bool {
        self.terminal.set(error).is_ok()
    }

    pub(crate) fn terminal(&self) -> Option<&AmqpError> {
        self.terminal.get()
    }

    pub(crate) fn opened(&self) -> &Completion {
        &self.opened
    }

    pub(crate) fn closed(&self) -> &Completion {
        &self.closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire) || matches!(self.state(), State::End)
    }

    /// Whether a local close has started or finished.
    pub(crate) fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            State::CloseSent
                | State::CloseReceived
                | State::ClosePipe
                | State::OpenClosePipe
                | State::End
                | State::Faulted
        ) || self.is_closed()
    }

    /// The error handed to operations pending on this object once it closes.
    pub(crate) fn closed_error(&self) -> Error {
        Error::closed(self.name.clone(), self.terminal.get().cloned())
    }

    /// Fails with [`closed_error`](Self::closed_error) once closing started.
    pub(crate) fn check_active(&self) -> Result<()> {
        if self.is_closing() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// Marks the object finished. Only the first call returns `true`.
    pub(crate) fn begin_finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        let object = AmqpObject::new("link 'a'");
        object.transition(Operation::SendOpen).unwrap();
        let err = object.transition(Operation::SendOpen).unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::IllegalState));
        assert_eq!(object.state(), State::OpenSent);
        assert_eq!(
            object.transition(Operation::ReceiveOpen).unwrap(),
            (State::OpenSent, State::Opened)
        );
    }

    #[test]
    fn terminal_error_is_set_once() {
        let object = AmqpObject::new("session 0");
        assert!(object.set_terminal(ErrorCondition::WindowViolation.into()));
        assert!(!object.set_terminal(ErrorCondition::InternalError.into()));
        assert_eq!(object.terminal().map(|e| &e.condition), Some(&ErrorCondition::WindowViolation));

        let err = object.closed_error();
        assert_eq!(err.condition(), Some(&ErrorCondition::WindowViolation));
    }

    #[test]
    fn finish_happens_once() {
        let object = AmqpObject::new("connection");
        assert!(object.begin_finish());
        assert!(!object.begin_finish());
        assert!(object.is_closed());
        assert!(object.check_active().is_err());
    }
}
