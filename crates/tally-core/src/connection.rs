//! Connection lifecycle state machine.
//!
//! Manages the single logical connection to the clearing endpoint:
//! connect/disconnect transitions, heartbeat scheduling, and bounded
//! exponential reconnect backoff. Uses the action pattern: methods take time
//! as input and return actions for the driver to execute, keeping the
//! machine pure (no I/O) and directly testable.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ begin_connect ┌────────────┐ established ┌───────────┐
//! │ Disconnected │──────────────>│ Connecting │────────────>│ Connected │
//! └──────────────┘               └────────────┘             └───────────┘
//!        ↑                             │                          │ auth_started
//!        │  remote_closed /            ↓                          ↓
//!        │  local_disconnect     connect_failed          ┌────────────────┐
//!        └─────────────────────  (backoff, capped)       │ Authenticating │
//!                                                        └────────────────┘
//!                                                                 │ auth_succeeded
//!                                                                 ↓
//!                                                        ┌───────────────┐
//!                                                        │ Authenticated │
//!                                                        └───────────────┘
//! ```
//!
//! A remote-initiated close schedules reconnects with doubling delay until
//! the attempt budget is spent, then emits [`ConnectionAction::GiveUp`]. A
//! caller-initiated disconnect suppresses reconnection entirely.

use std::{ops::Sub, time::Duration};

/// Default interval between heartbeat pings while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Default base delay for reconnect backoff (doubles per attempt).
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on automatic reconnect attempts.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 3;

/// Connection state.
///
/// Owned exclusively by this machine (plus the handshake for the two auth
/// states); transitions are the only way connection-dependent operations
/// become legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link to the clearing endpoint.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport link is up, not yet authenticated.
    Connected,
    /// Challenge-response handshake in progress.
    Authenticating,
    /// Handshake complete; session operations are legal.
    Authenticated,
}

/// Automatic reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// First retry delay; doubles on each subsequent attempt.
    pub base_delay: Duration,
    /// Attempts before giving up and requiring a caller-initiated connect.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Interval between liveness pings while connected.
    pub heartbeat_interval: Duration,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectPolicy,
}

impl ConnectionConfig {
    /// Configuration with the default heartbeat interval and backoff.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Actions returned by the connection state machine.
///
/// The driver executes these: dial/redial the transport, start a backoff
/// timer, send a heartbeat ping, or surface the terminal give-up event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Dial the clearing endpoint now.
    Dial,
    /// A heartbeat ping is due.
    Heartbeat,
    /// Wait `delay`, then call [`Connection::reconnect_due`].
    ScheduleReconnect {
        /// Which attempt this will be (1-based).
        attempt: u32,
        /// Backoff delay before dialing.
        delay: Duration,
    },
    /// Reconnect budget exhausted; only a caller-initiated connect resumes.
    GiveUp,
    /// State changed; observers should be notified.
    StateChanged(ConnectionState),
}

/// Connection state machine.
///
/// Pure: no I/O, no timers. Time is passed as a parameter. Generic over the
/// instant type to support virtual clocks in tests.
#[derive(Debug, Clone)]
pub struct Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    /// Reconnect attempts made since the link last came up.
    attempts: u32,
    /// Set by a caller-initiated disconnect; cleared by `begin_connect`.
    reconnect_suppressed: bool,
    /// When the last heartbeat ping was sent.
    last_heartbeat: Option<I>,
    /// A ping is outstanding without a matching pong.
    awaiting_pong: bool,
    /// Pings sent while a previous ping was still unanswered.
    heartbeat_misses: u32,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new machine in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            attempts: 0,
            reconnect_suppressed: false,
            last_heartbeat: None,
            awaiting_pong: false,
            heartbeat_misses: 0,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the link is up (any state from Connected onward).
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected
                | ConnectionState::Authenticating
                | ConnectionState::Authenticated
        )
    }

    /// Pings sent while a previous ping was still unanswered.
    ///
    /// A miss never forces a disconnect by itself; it is observability for
    /// the driver to log.
    #[must_use]
    pub fn heartbeat_misses(&self) -> u32 {
        self.heartbeat_misses
    }

    /// Caller-initiated connect.
    ///
    /// From Disconnected this starts a fresh attempt (resetting the backoff
    /// budget and clearing any disconnect suppression). While Connecting or
    /// already up it is a no-op: exactly one attempt may be in flight, and
    /// the caller shares its outcome.
    pub fn begin_connect(&mut self) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                self.attempts = 0;
                self.reconnect_suppressed = false;
                vec![
                    ConnectionAction::StateChanged(ConnectionState::Connecting),
                    ConnectionAction::Dial,
                ]
            },
            _ => vec![],
        }
    }

    /// The backoff timer fired; dial again.
    ///
    /// No-op unless a reconnect is actually pending (a caller disconnect in
    /// the meantime cancels it).
    pub fn reconnect_due(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Disconnected || self.reconnect_suppressed {
            return vec![];
        }
        self.state = ConnectionState::Connecting;
        vec![
            ConnectionAction::StateChanged(ConnectionState::Connecting),
            ConnectionAction::Dial,
        ]
    }

    /// Transport reports the link is up.
    pub fn established(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_heartbeat = Some(now);
        self.awaiting_pong = false;
        vec![ConnectionAction::StateChanged(ConnectionState::Connected)]
    }

    /// Transport reports the dial attempt failed.
    pub fn connect_failed(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }
        self.state = ConnectionState::Disconnected;
        let mut actions = vec![ConnectionAction::StateChanged(ConnectionState::Disconnected)];
        actions.extend(self.schedule_or_give_up());
        actions
    }

    /// Transport reports a close that was not caller-initiated.
    pub fn remote_closed(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }
        self.state = ConnectionState::Disconnected;
        self.awaiting_pong = false;
        let mut actions = vec![ConnectionAction::StateChanged(ConnectionState::Disconnected)];
        actions.extend(self.schedule_or_give_up());
        actions
    }

    /// Caller-initiated disconnect. Idempotent; suppresses reconnection.
    pub fn local_disconnect(&mut self) -> Vec<ConnectionAction> {
        self.reconnect_suppressed = true;
        self.awaiting_pong = false;
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }
        self.state = ConnectionState::Disconnected;
        vec![ConnectionAction::StateChanged(ConnectionState::Disconnected)]
    }

    /// The handshake started on this connection.
    pub fn auth_started(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connected {
            return vec![];
        }
        self.state = ConnectionState::Authenticating;
        vec![ConnectionAction::StateChanged(ConnectionState::Authenticating)]
    }

    /// The handshake completed successfully.
    pub fn auth_succeeded(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Authenticating {
            return vec![];
        }
        self.state = ConnectionState::Authenticated;
        vec![ConnectionAction::StateChanged(ConnectionState::Authenticated)]
    }

    /// The handshake failed; the transport link itself is still up.
    pub fn auth_failed(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Authenticating {
            return vec![];
        }
        self.state = ConnectionState::Connected;
        vec![ConnectionAction::StateChanged(ConnectionState::Connected)]
    }

    /// A pong arrived for the outstanding heartbeat ping.
    pub fn pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    /// Periodic maintenance: emit a heartbeat when the interval elapsed.
    ///
    /// If the previous ping is still unanswered, the miss counter increments
    /// but the connection stays up.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        if !self.is_link_up() {
            return vec![];
        }

        let due = match self.last_heartbeat {
            None => true,
            Some(last) => now - last >= self.config.heartbeat_interval,
        };
        if !due {
            return vec![];
        }

        if self.awaiting_pong {
            self.heartbeat_misses = self.heartbeat_misses.saturating_add(1);
        }
        self.awaiting_pong = true;
        self.last_heartbeat = Some(now);
        vec![ConnectionAction::Heartbeat]
    }

    fn schedule_or_give_up(&mut self) -> Vec<ConnectionAction> {
        if self.reconnect_suppressed {
            return vec![];
        }
        if self.attempts >= self.config.reconnect.max_attempts {
            // A stale backoff timer firing after this must not redial.
            self.reconnect_suppressed = true;
            return vec![ConnectionAction::GiveUp];
        }
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self.config.reconnect.base_delay.saturating_mul(factor);
        self.attempts += 1;
        vec![ConnectionAction::ScheduleReconnect { attempt: self.attempts, delay }]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval: Duration::from_secs(20),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_secs(1),
                max_attempts: 3,
            },
        }
    }

    fn up(conn: &mut Connection<Instant>, now: Instant) {
        conn.begin_connect();
        conn.established(now);
    }

    #[test]
    fn default_config_matches_standard() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.reconnect.base_delay, DEFAULT_RECONNECT_BASE_DELAY);
        assert_eq!(config.reconnect.max_attempts, DEFAULT_RECONNECT_MAX_ATTEMPTS);
    }

    #[test]
    fn connect_lifecycle() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.begin_connect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(actions.contains(&ConnectionAction::Dial));

        conn.established(t0);
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.auth_started();
        conn.auth_succeeded();
        assert_eq!(conn.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn second_connect_while_connecting_is_noop() {
        let mut conn: Connection<Instant> = Connection::new(config());
        conn.begin_connect();

        let actions = conn.begin_connect();
        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn remote_close_schedules_backoff_with_doubling_delay() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        // Attempt 1: base delay.
        let actions = conn.remote_closed();
        assert!(actions.contains(&ConnectionAction::ScheduleReconnect {
            attempt: 1,
            delay: Duration::from_secs(1),
        }));

        // Attempt fails -> attempt 2 at doubled delay.
        conn.reconnect_due();
        let actions = conn.connect_failed();
        assert!(actions.contains(&ConnectionAction::ScheduleReconnect {
            attempt: 2,
            delay: Duration::from_secs(2),
        }));

        // Attempt 3 at quadrupled delay.
        conn.reconnect_due();
        let actions = conn.connect_failed();
        assert!(actions.contains(&ConnectionAction::ScheduleReconnect {
            attempt: 3,
            delay: Duration::from_secs(4),
        }));
    }

    #[test]
    fn backoff_gives_up_after_capped_attempts() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        conn.remote_closed();
        for _ in 0..2 {
            conn.reconnect_due();
            conn.connect_failed();
        }

        // Third failure exhausts the budget.
        conn.reconnect_due();
        let actions = conn.connect_failed();
        assert!(actions.contains(&ConnectionAction::GiveUp));

        // A stray timer firing after give-up must not redial.
        assert!(conn.reconnect_due().is_empty());
    }

    #[test]
    fn successful_reconnect_resets_attempt_budget() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        conn.remote_closed();
        conn.reconnect_due();
        conn.established(t0);

        // Next drop starts again from attempt 1 at the base delay.
        let actions = conn.remote_closed();
        assert!(actions.contains(&ConnectionAction::ScheduleReconnect {
            attempt: 1,
            delay: Duration::from_secs(1),
        }));
    }

    #[test]
    fn local_disconnect_suppresses_reconnect() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        let actions = conn.local_disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::ScheduleReconnect { .. })));

        // Idempotent.
        assert!(conn.local_disconnect().is_empty());

        // A stale backoff timer firing after disconnect does nothing.
        assert!(conn.reconnect_due().is_empty());
    }

    #[test]
    fn explicit_connect_after_give_up_resumes() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        conn.remote_closed();
        for _ in 0..3 {
            conn.reconnect_due();
            conn.connect_failed();
        }

        let actions = conn.begin_connect();
        assert!(actions.contains(&ConnectionAction::Dial));
        conn.established(t0);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn heartbeat_fires_on_interval_while_connected() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        // Too early: nothing due.
        assert!(conn.tick(t0 + Duration::from_secs(5)).is_empty());

        let actions = conn.tick(t0 + Duration::from_secs(20));
        assert_eq!(actions, vec![ConnectionAction::Heartbeat]);

        conn.pong_received();
        assert_eq!(conn.heartbeat_misses(), 0);
    }

    #[test]
    fn unanswered_ping_counts_as_miss_without_disconnect() {
        let t0 = Instant::now();
        let mut conn = Connection::new(config());
        up(&mut conn, t0);

        conn.tick(t0 + Duration::from_secs(20));
        // No pong; next interval records a miss and pings again.
        let actions = conn.tick(t0 + Duration::from_secs(40));
        assert_eq!(actions, vec![ConnectionAction::Heartbeat]);
        assert_eq!(conn.heartbeat_misses(), 1);
        assert!(conn.is_link_up());
    }

    #[test]
    fn no_heartbeat_while_disconnected() {
        let t0 = Instant::now();
        let mut conn: Connection<Instant> = Connection::new(config());
        assert!(conn.tick(t0 + Duration::from_secs(60)).is_empty());
    }
}
