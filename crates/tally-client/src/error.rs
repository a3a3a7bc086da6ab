//! Error types for session operations.
//!
//! One enum per operation family so callers match only on failures their
//! call can actually produce. Remote rejections carry the service's code and
//! message verbatim; nothing here is retried automatically.

use std::time::Duration;

use tally_core::{connection::ConnectionState, signer::SignerError};
use tally_proto::{CodecError, RemoteError};
use thiserror::Error;

/// Session open and lifecycle failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The connection is not authenticated; session operations are illegal.
    #[error("not authenticated (connection is {state:?})")]
    NotAuthenticated {
        /// Connection state at the time of the call.
        state: ConnectionState,
    },

    /// A session is already open or being opened on this client.
    #[error("a session is already open")]
    AlreadyOpen,

    /// The clearing service rejected the session request.
    #[error("rejected by remote ({code}): {message}")]
    RejectedByRemote {
        /// Service-defined error code.
        code: u16,
        /// Service-supplied message.
        message: String,
    },

    /// The request did not resolve within its bound. No session exists.
    #[error("session request timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// The external signer could not sign the session request.
    #[error("signer unavailable: {reason}")]
    SignerUnavailable {
        /// What the key-holder reported.
        reason: String,
    },

    /// The connection dropped while the request was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// Envelope construction failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Payment failures.
///
/// Local validation failures (`InvalidRecipient`, `AmountOverflow`) are
/// guaranteed to leave the ledger and state version untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The connection is not authenticated.
    #[error("not authenticated (connection is {state:?})")]
    NotAuthenticated {
        /// Connection state at the time of the call.
        state: ConnectionState,
    },

    /// No active session to pay within.
    #[error("no active session")]
    NoActiveSession,

    /// The recipient is not the session counterparty.
    #[error("recipient {recipient} is not the session counterparty")]
    InvalidRecipient {
        /// The rejected recipient.
        recipient: String,
    },

    /// The cumulative total would overflow the amount domain.
    #[error("cumulative amount overflow")]
    AmountOverflow,

    /// Confirm-first mode: a previous state update is still awaiting the
    /// remote acknowledgement. It must resolve before the next payment.
    #[error("a state update is already awaiting acknowledgement")]
    UpdateInFlight,

    /// The external signer could not sign the state update.
    #[error("signer unavailable: {reason}")]
    SignerUnavailable {
        /// What the key-holder reported.
        reason: String,
    },

    /// The transport refused the signed update; the ledger was rolled back.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The clearing service rejected the state update (confirm-first mode).
    #[error("rejected by remote ({code}): {message}")]
    RejectedByRemote {
        /// Service-defined error code.
        code: u16,
        /// Service-supplied message.
        message: String,
    },

    /// Envelope construction failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Session close failures.
///
/// Every variant leaves the session `Active` with the ledger intact, so
/// close is retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    /// No active session to close.
    #[error("no active session")]
    NoActiveSession,

    /// The external signer could not sign the final state.
    #[error("signer unavailable: {reason}")]
    SignerUnavailable {
        /// What the key-holder reported.
        reason: String,
    },

    /// The transport refused the signed close.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Envelope construction failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<SignerError> for SessionError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unavailable { reason } => Self::SignerUnavailable { reason },
        }
    }
}

impl From<SignerError> for PaymentError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unavailable { reason } => Self::SignerUnavailable { reason },
        }
    }
}

impl From<SignerError> for CloseError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unavailable { reason } => Self::SignerUnavailable { reason },
        }
    }
}

/// Internal failure of one correlated request/response exchange.
///
/// The facade maps this onto the operation-specific error enums above.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallFailure {
    /// The service answered with an explicit error.
    #[error("{0}")]
    Remote(RemoteError),

    /// No response within the request timeout.
    #[error("request timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// The connection dropped before the response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The response payload did not match the method called.
    #[error("unexpected response payload: {0}")]
    UnexpectedPayload(&'static str),
}

impl From<CallFailure> for SessionError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Remote(remote) => {
                Self::RejectedByRemote { code: remote.code, message: remote.message }
            },
            CallFailure::Timeout { elapsed } => Self::Timeout { elapsed },
            CallFailure::ConnectionClosed => Self::ConnectionClosed,
            CallFailure::UnexpectedPayload(what) => {
                Self::Codec(CodecError::Decode(format!("unexpected response payload: {what}")))
            },
        }
    }
}
