//! Error types surfaced to callers and to peers.
//!
//! Protocol failures carry an [`ErrorCondition`]: the same condition is sent
//! to the peer in the `error` field of Close, End or Detach, and returned to
//! local callers wrapped in [`Error::Amqp`].
use core::fmt;

use thiserror::Error;

use crate::protocol::{Fields, Symbol};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// AMQP error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    InternalError,
    NotFound,
    UnauthorizedAccess,
    DecodeError,
    ResourceLimitExceeded,
    NotAllowed,
    InvalidField,
    NotImplemented,
    ResourceLocked,
    PreconditionFailed,
    ResourceDeleted,
    IllegalState,
    FrameSizeTooSmall,
    ConnectionForced,
    FramingError,
    ConnectionRedirect,
    WindowViolation,
    ErrantLink,
    HandleInUse,
    UnattachedHandle,
    DetachForced,
    TransferLimitExceeded,
    MessageSizeExceeded,
    LinkRedirect,
    Stolen,
    /// A condition this engine does not know, kept verbatim.
    Custom(Symbol),
}

const CONDITIONS: &[(ErrorCondition, &str)] = &[
    (ErrorCondition::InternalError, "amqp:internal-error"),
    (ErrorCondition::NotFound, "amqp:not-found"),
    (ErrorCondition::UnauthorizedAccess, "amqp:unauthorized-access"),
    (ErrorCondition::DecodeError, "amqp:decode-error"),
    (ErrorCondition::ResourceLimitExceeded, "amqp:resource-limit-exceeded"),
    (ErrorCondition::NotAllowed, "amqp:not-allowed"),
    (ErrorCondition::InvalidField, "amqp:invalid-field"),
    (ErrorCondition::NotImplemented, "amqp:not-implemented"),
    (ErrorCondition::ResourceLocked, "amqp:resource-locked"),
    (ErrorCondition::PreconditionFailed, "amqp:precondition-failed"),
    (ErrorCondition::ResourceDeleted, "amqp:resource-deleted"),
    (ErrorCondition::IllegalState, "amqp:illegal-state"),
    (ErrorCondition::FrameSizeTooSmall, "amqp:frame-size-too-small"),
    (ErrorCondition::ConnectionForced, "amqp:connection:forced"),
    (ErrorCondition::FramingError, "amqp:connection:framing-error"),
    (ErrorCondition::ConnectionRedirect, "amqp:connection:redirect"),
    (ErrorCondition::WindowViolation, "amqp:session:window-violation"),
    (ErrorCondition::ErrantLink, "amqp:session:errant-link"),
    (ErrorCondition::HandleInUse, "amqp:session:handle-in-use"),
    (ErrorCondition::UnattachedHandle, "amqp:session:unattached-handle"),
    (ErrorCondition::DetachForced, "amqp:link:detach-forced"),
    (ErrorCondition::TransferLimitExceeded, "amqp:link:transfer-limit-exceeded"),
    (ErrorCondition::MessageSizeExceeded, "amqp:link:message-size-exceeded"),
    (ErrorCondition::LinkRedirect, "amqp:link:redirect"),
    (ErrorCondition::Stolen, "amqp:link:stolen"),
];

impl ErrorCondition {
    /// The wire symbol of this condition.
    pub fn as_str(&self) -> &str {
        if let Self::Custom(symbol) = self {
            return symbol.as_str();
        }
        CONDITIONS
            .iter()
            .find(|(c, _)| c == self)
            .map_or("amqp:internal-error", |(_, s)| *s)
    }

    pub fn from_symbol(symbol: &str) -> Self {
        CONDITIONS
            .iter()
            .find(|(_, s)| *s == symbol)
            .map_or_else(|| Self::Custom(Symbol::from(symbol)), |(c, _)| c.clone())
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The AMQP `error` record: a condition, an optional description and an
/// optional info map.
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpError {
    pub condition: ErrorCondition,
    pub description: Option<String>,
    pub info: Option<Fields>,
}

impl AmqpError {
    pub fn new(condition: ErrorCondition, description: impl Into<String>) -> Self {
        Self {
            condition,
            description: Some(description.into()),
            info: None,
        }
    }

    pub fn condition(&self) -> &ErrorCondition {
        &self.condition
    }
}

impl From<ErrorCondition> for AmqpError {
    fn from(condition: ErrorCondition) -> Self {
        Self {
            condition,
            description: None,
            info: None,
        }
    }
}

impl fmt::Display for AmqpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(d) => write!(f, "{}: {d}", self.condition),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl std::error::Error for AmqpError {}

fn closed_reason(reason: &Option<AmqpError>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A protocol error, either detected locally or received from the peer.
    #[error("{0}")]
    Amqp(#[from] AmqpError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The object the operation was pending on closed or aborted before the
    /// operation completed.
    ///
    /// `reason` is the object's terminal error, if it ended abnormally.
    #[error("{object} is closed{}", closed_reason(.reason))]
    Closed { object: String, reason: Option<AmqpError> },

    /// The operation did not complete within its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A frame or value could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame or value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

impl Error {
    pub(crate) fn amqp(condition: ErrorCondition, description: impl Into<String>) -> Self {
        Self::Amqp(AmqpError::new(condition, description))
    }

    pub(crate) fn closed(object: impl Into<String>, reason: Option<AmqpError>) -> Self {
        Self::Closed {
            object: object.into(),
            reason,
        }
    }

    /// The protocol condition behind this error, if any.
    pub fn condition(&self) -> Option<&ErrorCondition> {
        match self {
            Self::Amqp(e) => Some(&e.condition),
            Self::Closed { reason: Some(e), .. } => Some(&e.condition),
            Self::Decode(_) => Some(&ErrorCondition::DecodeError),
            _ => None,
        }
    }

    /// Converts this error into the record sent to the peer when it becomes an
    /// object's terminal cause.
    pub fn to_amqp(&self) -> AmqpError {
        match self {
            Self::Amqp(e) => e.clone(),
            Self::Closed { reason: Some(e), .. } => e.clone(),
            Self::Decode(d) => AmqpError::new(ErrorCondition::DecodeError, d.clone()),
            Self::Io(e) => AmqpError::new(ErrorCondition::ConnectionForced, e.to_string()),
            other => AmqpError::new(ErrorCondition::InternalError, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_symbols_round_trip() {
        for (condition, symbol) in CONDITIONS {
            assert_eq!(condition.as_str(), *symbol);
            assert_eq!(&ErrorCondition::from_symbol(symbol), condition);
        }
        let custom = ErrorCondition::from_symbol("com.example:throttled");
        assert_eq!(custom, ErrorCondition::Custom(Symbol::from("com.example:throttled")));
        assert_eq!(custom.as_str(), "com.example:throttled");
    }

    #[test]
    fn closed_error_carries_terminal_message() {
        let reason = AmqpError::new(ErrorCondition::ConnectionForced, "idle timeout expired");
        let err = Error::closed("receiver link 'orders'", Some(reason));
        assert_eq!(
            err.to_string(),
            "receiver link 'orders' is closed: amqp:connection:forced: idle timeout expired"
        );
        assert_eq!(err.condition(), Some(&ErrorCondition::ConnectionForced));
        assert_eq!(Error::closed("session 0", None).to_string(), "session 0 is closed");
    }
}
