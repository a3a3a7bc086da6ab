//! Client configuration.

use std::time::Duration;

use tally_core::connection::{ConnectionConfig, ReconnectPolicy};

use crate::session::AckPolicy;

/// Default bound on correlated request/response exchanges.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the whole authentication handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default scope requested during authentication.
pub const DEFAULT_AUTH_SCOPE: &str = "payments";

/// Client configuration.
///
/// All timing knobs in one place; everything has a working default.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection lifecycle knobs (heartbeat interval, reconnect backoff).
    pub connection: ConnectionConfig,
    /// Bound on every correlated request/response exchange.
    pub request_timeout: Duration,
    /// Bound on the authentication handshake as a whole.
    pub handshake_timeout: Duration,
    /// Scope requested during authentication.
    pub auth_scope: String,
    /// Application identifier placed in session descriptors.
    pub application_id: String,
    /// When payment records become visible in the ledger.
    pub ack_policy: AckPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                heartbeat_interval: tally_core::connection::DEFAULT_HEARTBEAT_INTERVAL,
                reconnect: ReconnectPolicy::default(),
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            auth_scope: DEFAULT_AUTH_SCOPE.to_string(),
            application_id: "tally".to_string(),
            ack_policy: AckPolicy::Optimistic,
        }
    }
}
