//! Sans-IO protocol state machines for the tally clearing client.
//!
//! Everything in this crate is pure: methods take the current time as input
//! and return actions for a driver to execute. No sockets, no timers, no
//! global state. This keeps the protocol logic deterministic and directly
//! testable; the async driver lives in `tally-client`.
//!
//! - [`connection`]: connection lifecycle, heartbeats, reconnect backoff
//! - [`handshake`]: signed challenge-response authentication
//! - [`signer`]: the external key-holder boundary
//! - [`env`]: time and randomness abstraction for deterministic tests

pub mod connection;
pub mod env;
pub mod error;
pub mod handshake;
pub mod signer;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState, ReconnectPolicy};
pub use env::Environment;
pub use error::{AuthError, ConnectError};
pub use handshake::{Handshake, HandshakePhase};
pub use signer::{Signer, SignerError};
