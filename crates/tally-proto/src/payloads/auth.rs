//! Authentication handshake payloads.
//!
//! The handshake is challenge-response: a signed `AuthRequest` announces the
//! address and requested scope, the service replies with an ephemeral
//! challenge, and `AuthVerify` returns the challenge signature.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Signature};

/// Parameters of the initial signed authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    /// Address the connection claims to speak for.
    pub address: Address,
    /// Requested scope, e.g. `"payments"`.
    pub scope: String,
    /// Unix timestamp (seconds) after which the grant expires.
    pub expires_at_unix: u64,
}

/// Ephemeral challenge issued by the clearing service.
///
/// Received once per handshake and consumed immediately by signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Opaque challenge bytes to sign.
    pub challenge: Vec<u8>,
}

/// Parameters of the challenge verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    /// Signature over the challenge bytes.
    pub signature: Signature,
}
