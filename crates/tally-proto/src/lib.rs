//! Wire types and RPC envelope codec for the tally clearing protocol.
//!
//! The clearing service speaks a versioned RPC contract: every message is an
//! [`Envelope`] carrying a request, a response, or an unsolicited
//! notification. Payloads are CBOR for forward compatibility (additive fields
//! are tolerated; unknown methods and versions are rejected, never guessed
//! at). This crate is transport-independent: it never touches sockets and
//! performs no I/O.
//!
//! Layering (matching the crate split):
//! - `tally-proto` (this crate): envelopes, typed payloads, shared wire types
//! - `tally-core`: sans-IO connection and handshake state machines
//! - `tally-client`: payment session state machine and async facade

pub mod envelope;
pub mod errors;
pub mod payloads;
pub mod types;

pub use envelope::{Body, Call, Envelope, Outcome, PROTOCOL_VERSION, Request, Response};
pub use errors::CodecError;
pub use payloads::{NotificationKind, RemoteError, ResponsePayload};
pub use types::{Address, Allocation, Amount, RequestId, SessionDescriptor, SessionHandle, Signature};
