//! Typed RPC payloads.
//!
//! Every method call, response, and notification has a concrete struct here.
//! The clearing service's wire shapes are duck-typed JSON-ish maps; we close
//! them into tagged enums so every branch in message handling is exhaustive
//! and compiler-checked. Adding a variant breaks compilation at each match
//! site instead of silently falling through.

pub mod auth;
pub mod session;

use serde::{Deserialize, Serialize};

use crate::types::{Address, Amount, SessionHandle};

/// Successful response bodies, one variant per method.
///
/// Correlated to the originating request by envelope id, so no method tag is
/// repeated here beyond the variant itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Reply to `AuthRequest`: the ephemeral challenge to sign. Consumed
    /// immediately by the handshake, never persisted.
    AuthChallenge(auth::AuthChallenge),
    /// Reply to `AuthVerify`: the connection now speaks for the address.
    Authenticated,
    /// Reply to `CreateSession`: the remote session handle.
    SessionCreated(session::CreateSessionResult),
    /// Reply to `SubmitState`: the accepted state version.
    StateAccepted {
        /// Version the clearing service recorded.
        version: u64,
    },
    /// Reply to `CloseSession`.
    SessionClosed,
    /// Reply to `Ping`.
    Pong,
}

/// An explicit error returned by the clearing service for a request.
///
/// Surfaced verbatim to the caller; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Service-defined error code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error {}: {}", self.code, self.message)
    }
}

/// Unsolicited messages from the clearing service.
///
/// These carry no request id; the client routes them to the event observer
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The counterparty recorded a payment in a session we participate in.
    PaymentObserved {
        /// Session the payment belongs to.
        session: SessionHandle,
        /// Paying participant.
        sender: Address,
        /// Payment amount.
        amount: Amount,
        /// State version after the payment.
        version: u64,
    },
    /// The clearing service closed a session on its own initiative.
    SessionClosed {
        /// Closed session.
        session: SessionHandle,
        /// Service-supplied reason.
        reason: String,
    },
    /// Out-of-band error notification not tied to any request.
    ServerError {
        /// Service-defined error code.
        code: u16,
        /// Human-readable message.
        message: String,
    },
}
