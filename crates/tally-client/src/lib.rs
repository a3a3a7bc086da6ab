//! Payment session client for the tally clearing protocol.
//!
//! Layers, bottom up:
//! - [`ledger`]: append-only payment records and the settlement snapshot
//! - [`session`]: the pure payment session state machine
//! - [`client`]: the async facade: correlation, events, timers
//! - [`link`]: the channel boundary to the transport
//! - `transport` (feature `transport`): quinn/rustls QUIC driver
//!
//! The facade is the only place that touches the wire. Everything below it
//! is deterministic and tested without I/O.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod link;
pub mod session;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::SessionClient;
pub use config::ClientConfig;
pub use error::{CloseError, PaymentError, SessionError};
pub use event::SessionEvent;
pub use ledger::{PaymentRecord, SessionLedger, SettlementLedger};
pub use link::{Link, LinkCommand, LinkEvent};
pub use session::{AckPolicy, PaymentSession, SessionState};
