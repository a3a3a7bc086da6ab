//! Observer events.
//!
//! Everything the client learns asynchronously is delivered as a
//! [`SessionEvent`] over one bounded channel, in receive order. No
//! callbacks, no global handlers; the consumer owns the receiver and decides
//! its own threading.

use tally_proto::{Address, Amount, SessionHandle};

/// Asynchronous client events, in receive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport link came up.
    Connected,
    /// The link went down.
    Disconnected {
        /// Transport-supplied reason.
        reason: String,
        /// Whether automatic reconnection has given up. A terminal
        /// disconnect requires a fresh caller-initiated connect.
        terminal: bool,
    },
    /// The authentication handshake completed.
    Authenticated,
    /// The clearing service confirmed the session.
    SessionConfirmed {
        /// Remote session handle.
        session: SessionHandle,
    },
    /// The counterparty recorded a payment in the session.
    PaymentObserved {
        /// Paying participant.
        sender: Address,
        /// Payment amount.
        amount: Amount,
        /// State version after the payment.
        version: u64,
    },
    /// The clearing service closed the session on its own initiative.
    SessionClosedByRemote {
        /// Closed session.
        session: SessionHandle,
        /// Service-supplied reason.
        reason: String,
    },
    /// The service reported an error outside any request.
    ProtocolError {
        /// Service-defined error code.
        code: u16,
        /// Service-supplied message.
        message: String,
    },
}
