//! The open/close lifecycle shared by connections, sessions and links.
//!
//! Each protocol object embeds an [`AmqpObject`] and implements
//! [`Lifecycle`] to supply the frames it sends on open and close and the
//! teardown it performs on abort. The free functions in this module drive the
//! common part: waiting for completion, idempotent close and abort, and the
//! conversion of protocol violations into a close with an error.
mod object;
mod state;

use std::{sync::Arc, time::Duration};

pub(crate) use object::AmqpObject;
pub use state::{Operation, State};
use tracing::warn;

use crate::error::{AmqpError, Error, ErrorCondition, Result};

pub(crate) trait Lifecycle: Send + Sync + 'static {
    fn object(&self) -> &AmqpObject;

    /// How long a graceful close may wait for the peer before aborting.
    fn close_timeout(&self) -> Duration;

    /// Sends the performatives that start the open handshake.
    fn open_internal(&self) -> Result<()>;

    /// Applies `SendClose` and sends the closing performative, carrying the
    /// terminal error if there is one. An error makes the caller abort.
    fn close_internal(&self) -> Result<()>;

    /// Abrupt teardown: abort children, stop I/O. Runs at most once.
    fn abort_internal(&self);

    /// Detaches the object from its parent and fails pending work once it
    /// has ended. Runs at most once.
    fn release(&self);
}

/// Opens `obj` and waits until it reaches `Opened`.
///
/// Completes at once if the peer's open already arrived and was answered.
pub(crate) async fn open<T: Lifecycle>(obj: &Arc<T>, timeout: Duration) -> Result<()> {
    if obj.object().state() == State::Start {
        obj.open_internal()?;
    }
    wait_opened(obj, timeout).await
}

/// Waits for an open started elsewhere, such as by the peer.
pub(crate) async fn wait_opened<T: Lifecycle>(obj: &Arc<T>, timeout: Duration) -> Result<()> {
    let object = obj.object();
    match tokio::time::timeout(timeout, object.opened().wait()).await {
        Ok(None) => Ok(()),
        Ok(Some(_)) if object.is_closed() => Err(object.closed_error()),
        Ok(Some(e)) => Err(Error::Amqp(e)),
        Err(_) => {
            abort(obj);
            Err(Error::Timeout)
        }
    }
}

/// Closes `obj` gracefully and waits for the peer's confirmation.
///
/// Closing an object that already ended is a no-op.
pub(crate) async fn close<T: Lifecycle>(obj: &Arc<T>, timeout: Duration) -> Result<()> {
    let object = obj.object();
    if object.is_closed() {
        return Ok(());
    }
    if !object.is_closing() {
        if !object.state().is_open_sent() {
            abort(obj);
            return Ok(());
        }
        if let Err(e) = obj.close_internal() {
            warn!("{}: close failed, aborting: {e}", object.name());
            abort(obj);
            return Err(e);
        }
        finish_if_ended(obj);
    }
    match tokio::time::timeout(timeout, object.closed().wait()).await {
        Ok(None) => Ok(()),
        Ok(Some(e)) => Err(Error::Amqp(e)),
        Err(_) => {
            abort(obj);
            Err(Error::Timeout)
        }
    }
}

/// Forces `obj` to `End` without a close handshake.
pub(crate) fn abort<T: Lifecycle>(obj: &Arc<T>) {
    let object = obj.object();
    if !object.begin_finish() {
        return;
    }
    object.force(State::End);
    obj.abort_internal();
    complete(obj);
}

/// Records `error` as the terminal cause of `obj` and closes it with that
/// error, aborting if no graceful close is possible.
pub(crate) fn safe_close<T: Lifecycle>(obj: &Arc<T>, error: AmqpError) {
    let object = obj.object();
    if object.is_closed() {
        return;
    }
    warn!("{}: closing on error: {error}", object.name());
    object.set_terminal(error);

    let state = object.state();
    if matches!(
        state,
        State::CloseSent | State::ClosePipe | State::OpenClosePipe | State::Faulted
    ) {
        return;
    }
    if state.transition(Operation::SendClose).is_none() {
        object.force(State::Faulted);
        if !state.is_open_sent() {
            abort(obj);
            return;
        }
    }
    if let Err(e) = obj.close_internal() {
        warn!("{}: close failed, aborting: {e}", object.name());
        abort(obj);
        return;
    }
    if finish_if_ended(obj) {
        return;
    }

    // The peer gets a bounded time to confirm.
    let obj = obj.clone();
    tokio::spawn(async move {
        let timeout = obj.close_timeout();
        if tokio::time::timeout(timeout, obj.object().closed().wait()).await.is_err() {
            abort(&obj);
        }
    });
}

/// Completes the close of `obj` if its state reached `End`.
pub(crate) fn finish_if_ended<T: Lifecycle>(obj: &Arc<T>) -> bool {
    let object = obj.object();
    if object.state() != State::End {
        return false;
    }
    if object.begin_finish() {
        complete(obj);
    }
    true
}

fn complete<T: Lifecycle>(obj: &Arc<T>) {
    let object = obj.object();
    obj.release();
    let terminal = object.terminal().cloned();
    let not_opened = terminal
        .clone()
        .unwrap_or_else(|| AmqpError::new(ErrorCondition::IllegalState, format!("{} closed", object.name())));
    object.opened().complete(Some(not_opened));
    object.closed().complete(terminal);
}
