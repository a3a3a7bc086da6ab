//! Session lifecycle and state update payloads.

use serde::{Deserialize, Serialize};

use crate::types::{Allocation, SessionDescriptor, SessionHandle};

/// Parameters of a session creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionParams {
    /// The bilateral session descriptor, immutable once sent.
    pub descriptor: SessionDescriptor,
}

/// Confirmation of a created session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResult {
    /// Remote handle for all post-confirmation operations.
    pub session: SessionHandle,
}

/// Parameters of a signed state update (one per payment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdateParams {
    /// Session being updated.
    pub session: SessionHandle,
    /// Strictly increasing state version; exactly one per ledger append.
    pub version: u64,
    /// Allocation pair: payer zero, payee cumulative total.
    pub allocations: Vec<Allocation>,
}

/// Parameters of a signed close request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionParams {
    /// Session being closed.
    pub session: SessionHandle,
    /// Final allocations, exactly as accumulated in the ledger.
    pub final_allocations: Vec<Allocation>,
}
