//! Error types for the connection and handshake layers.
//!
//! Strongly typed per layer so callers can distinguish "retry the whole
//! connect+auth sequence" from "the remote said no". Nothing here is retried
//! automatically; retry policy belongs to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::{connection::ConnectionState, signer::SignerError};

/// Network-level connection failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The underlying transport failed to establish or maintain the link.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The connection attempt did not resolve within its bound.
    #[error("connect timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// Automatic reconnection exhausted its attempt budget. A fresh
    /// caller-initiated connect is required to resume.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    GaveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Authentication handshake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The external signer could not produce a signature.
    #[error("signer unavailable: {reason}")]
    SignerUnavailable {
        /// What the key-holder reported.
        reason: String,
    },

    /// The exchange violated the handshake protocol (malformed challenge,
    /// response out of phase, unexpected payload).
    #[error("handshake protocol error: {0}")]
    Protocol(String),

    /// The clearing service explicitly rejected the authentication.
    #[error("rejected by remote ({code}): {message}")]
    RejectedByRemote {
        /// Service-defined error code.
        code: u16,
        /// Service-supplied message.
        message: String,
    },

    /// The handshake did not complete within its hard bound.
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// A handshake is already in flight; await its outcome instead of
    /// starting a duplicate exchange.
    #[error("handshake already in flight")]
    AlreadyInFlight,

    /// The connection is not in a state that permits authentication.
    #[error("cannot authenticate while {state:?}")]
    NotConnected {
        /// Connection state at the time of the call.
        state: ConnectionState,
    },
}

impl From<SignerError> for AuthError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unavailable { reason } => Self::SignerUnavailable { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_error_maps_to_auth_variant() {
        let err: AuthError =
            SignerError::Unavailable { reason: "wallet locked".to_string() }.into();
        assert!(matches!(err, AuthError::SignerUnavailable { .. }));
    }

    #[test]
    fn errors_render_with_context() {
        let err = ConnectError::GaveUp { attempts: 3 };
        assert_eq!(err.to_string(), "reconnect attempts exhausted after 3 tries");

        let err = AuthError::RejectedByRemote { code: 401, message: "bad signature".to_string() };
        assert_eq!(err.to_string(), "rejected by remote (401): bad signature");
    }
}
