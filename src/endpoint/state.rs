use core::fmt;

/// Lifecycle state shared by connections, sessions and links.
///
/// Sessions and links never exchange protocol headers, so they only visit
/// the states reachable through the open and close operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    HeaderSent,
    /// Header and Open sent before the peer's header arrived.
    OpenPipe,
    /// Header, Open and Close sent before the peer's header arrived.
    OpenClosePipe,
    HeaderReceived,
    HeaderExchanged,
    OpenSent,
    OpenReceived,
    /// Open and Close sent before the peer's Open arrived.
    ClosePipe,
    Opened,
    CloseSent,
    CloseReceived,
    End,
    Faulted,
}

/// An event that moves a protocol object through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SendHeader,
    ReceiveHeader,
    SendOpen,
    ReceiveOpen,
    SendClose,
    ReceiveClose,
}

impl State {
    /// The state reached by applying `op`, or `None` if the table has no
    /// entry for this pair.
    pub fn transition(self, op: Operation) -> Option<State> {
        use Operation::*;
        use State::*;

        let next = match (op, self) {
            (SendHeader, Start) => HeaderSent,
            (SendHeader, HeaderReceived) => HeaderExchanged,

            (SendOpen, Start) => OpenSent,
            (SendOpen, OpenReceived) => Opened,
            (SendOpen, HeaderSent) => OpenPipe,
            (SendOpen, HeaderExchanged) => OpenSent,

            (SendClose, Opened) => CloseSent,
            (SendClose, CloseReceived) => End,
            (SendClose, OpenSent) => ClosePipe,
            (SendClose, OpenPipe) => OpenClosePipe,
            (SendClose, Faulted) => Faulted,

            (ReceiveHeader, Start) => HeaderReceived,
            (ReceiveHeader, HeaderSent) => HeaderExchanged,
            (ReceiveHeader, OpenPipe) => OpenSent,
            (ReceiveHeader, OpenClosePipe) => ClosePipe,

            (ReceiveOpen, Start) => OpenReceived,
            (ReceiveOpen, OpenSent) => Opened,
            (ReceiveOpen, HeaderReceived) => OpenReceived,
            (ReceiveOpen, HeaderExchanged) => OpenReceived,
            (ReceiveOpen, ClosePipe) => CloseSent,

            (ReceiveClose, Opened) => CloseReceived,
            (ReceiveClose, CloseSent) => End,
            (ReceiveClose, OpenReceived) => CloseReceived,
            (ReceiveClose, Faulted) => End,

            _ => return None,
        };
        Some(next)
    }

    /// Whether the local Open has been sent in this state.
    pub fn is_open_sent(self) -> bool {
        matches!(
            self,
            State::OpenPipe
                | State::OpenClosePipe
                | State::OpenSent
                | State::ClosePipe
                | State::Opened
                | State::CloseSent
                | State::CloseReceived
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
