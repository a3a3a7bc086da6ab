//! Async client facade.
//!
//! [`SessionClient`] ties the pure machines together and drives them over a
//! [`Link`]: it owns the request/response correlation table, the connection
//! and handshake machines, the payment session behind an async mutex (the
//! single serialization point for mutating operations), and the observer
//! event channel. A background driver task demultiplexes inbound traffic
//! and runs the heartbeat and reconnect timers, independent of in-flight
//! calls.
//!
//! Correlation ids are never reused, so a stale response can never resolve
//! a different logical call; unmatched responses are logged and dropped.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tally_core::{
    Environment,
    connection::{Connection, ConnectionAction, ConnectionState},
    env::SystemEnv,
    error::{AuthError, ConnectError},
    handshake::Handshake,
    signer::Signer,
};
use tally_proto::{
    Address, Amount, Envelope, RemoteError, Request, RequestId, ResponsePayload, SessionHandle,
    envelope::{Body, Call, Response},
    payloads::NotificationKind,
};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::{CallFailure, CloseError, PaymentError, SessionError},
    event::SessionEvent,
    ledger::SettlementLedger,
    link::{Link, LinkCommand, LinkEvent},
    session::{AckPolicy, PaymentSession, SessionState},
};

/// Capacity of the observer event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type PendingSender = oneshot::Sender<Result<ResponsePayload, RemoteError>>;

/// Outcome bookkeeping behind the handshake gate.
#[derive(Default)]
struct AuthFlight {
    /// Completed-attempt counter, mirrored into `Shared::auth_epoch`.
    epoch: u64,
    /// Failure of the most recent attempt, shared with queued callers.
    last_failure: Option<AuthError>,
}

/// Async client for the clearing service.
///
/// Cheap to share via the methods' `&self` receivers; mutating session
/// operations serialize behind an internal async mutex. Dropping the client
/// stops the driver task.
pub struct SessionClient<S, E = SystemEnv>
where
    S: Signer,
    E: Environment,
{
    shared: Arc<Shared<S, E>>,
    driver: tokio::task::JoinHandle<()>,
}

struct Shared<S, E>
where
    S: Signer,
    E: Environment,
{
    config: ClientConfig,
    env: E,
    signer: S,
    conn: StdMutex<Connection<E::Instant>>,
    state_tx: watch::Sender<ConnectionState>,
    pending: StdMutex<HashMap<u64, PendingSender>>,
    next_id: AtomicU64,
    session: AsyncMutex<PaymentSession>,
    /// Single-flight gate for the handshake: concurrent `authenticate`
    /// calls queue here and the losers observe the winner's outcome.
    auth_gate: AsyncMutex<AuthFlight>,
    /// Bumped (under the gate) each time a handshake attempt completes, so
    /// queued callers can tell an attempt ran while they waited.
    auth_epoch: AtomicU64,
    to_remote: mpsc::Sender<Envelope>,
    control: mpsc::Sender<LinkCommand>,
    events_tx: mpsc::Sender<SessionEvent>,
    /// Id of the outstanding heartbeat ping, if any.
    ping_in_flight: StdMutex<Option<u64>>,
}

impl<S> SessionClient<S, SystemEnv>
where
    S: Signer,
{
    /// Create a client over the given link with the system clock.
    ///
    /// Returns the client and the observer event receiver. Spawns the
    /// driver task on the current runtime.
    #[must_use]
    pub fn new(
        link: Link,
        signer: S,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::with_env(link, signer, config, SystemEnv)
    }
}

impl<S, E> SessionClient<S, E>
where
    S: Signer,
    E: Environment,
{
    /// Create a client with an explicit environment (virtual clocks in
    /// tests).
    #[must_use]
    pub fn with_env(
        link: Link,
        signer: S,
        config: ClientConfig,
        env: E,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let Link { to_remote, events, control } = link;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            conn: StdMutex::new(Connection::new(config.connection.clone())),
            session: AsyncMutex::new(PaymentSession::new(config.ack_policy)),
            config,
            env,
            signer,
            state_tx,
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            auth_gate: AsyncMutex::new(AuthFlight::default()),
            auth_epoch: AtomicU64::new(0),
            to_remote,
            control,
            events_tx,
            ping_in_flight: StdMutex::new(None),
        });

        let driver = tokio::spawn(run_driver(Arc::clone(&shared), events));
        (Self { shared, driver }, events_rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch channel for connection state changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Current session lifecycle state.
    pub async fn session_state(&self) -> SessionState {
        self.shared.session.lock().await.state()
    }

    /// Connect to the clearing endpoint and wait for the link to come up.
    ///
    /// A second call while connected or connecting shares the in-flight
    /// attempt instead of starting another.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let actions = self.shared.with_conn(Connection::begin_connect);
        self.shared.apply(actions);

        let mut state_rx = self.shared.state_tx.subscribe();
        let wait = state_rx.wait_for(|s| {
            matches!(
                s,
                ConnectionState::Connected
                    | ConnectionState::Authenticating
                    | ConnectionState::Authenticated
            )
        });
        let bound = self.shared.config.request_timeout;
        match tokio::time::timeout(bound, wait).await {
            Err(_) => Err(ConnectError::Timeout { elapsed: bound }),
            Ok(Err(_)) => Err(ConnectError::Transport("client stopped".into())),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Disconnect. Caller-initiated: suppresses automatic reconnection and
    /// rejects every in-flight request with a connection-closed failure.
    pub async fn disconnect(&self) {
        let actions = self.shared.with_conn(Connection::local_disconnect);
        self.shared.apply(actions);
        self.shared.reject_pending();
        if self.shared.control.send(LinkCommand::Close).await.is_err() {
            debug!("transport already stopped");
        }
    }

    /// Run the challenge-response handshake.
    ///
    /// Concurrent calls produce exactly one exchange on the wire: the first
    /// caller runs it, later callers wait and observe the shared outcome.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        let epoch_before = self.shared.auth_epoch.load(Ordering::Acquire);
        let mut flight = self.shared.auth_gate.lock().await;

        match self.connection_state() {
            ConnectionState::Authenticated => return Ok(()),
            ConnectionState::Connected => {},
            state => return Err(AuthError::NotConnected { state }),
        }

        // An attempt that completed while we queued on the gate overlapped
        // this call; a failure is shared rather than retried on the wire.
        if flight.epoch != epoch_before
            && let Some(err) = flight.last_failure.clone()
        {
            return Err(err);
        }

        let actions = self.shared.with_conn(Connection::auth_started);
        self.shared.apply(actions);

        let bound = self.shared.config.handshake_timeout;
        let outcome = match tokio::time::timeout(bound, self.run_handshake()).await {
            Err(_) => Err(AuthError::Timeout { elapsed: bound }),
            Ok(result) => result,
        };

        flight.epoch = flight.epoch.wrapping_add(1);
        self.shared.auth_epoch.store(flight.epoch, Ordering::Release);

        match outcome {
            Ok(()) => {
                flight.last_failure = None;
                let actions = self.shared.with_conn(Connection::auth_succeeded);
                self.shared.apply(actions);
                self.shared.emit(SessionEvent::Authenticated);
                info!(address = %self.shared.signer.address().abbreviated(), "authenticated");
                Ok(())
            },
            Err(err) => {
                flight.last_failure = Some(err.clone());
                let actions = self.shared.with_conn(Connection::auth_failed);
                self.shared.apply(actions);
                Err(err)
            },
        }
    }

    async fn run_handshake(&self) -> Result<(), AuthError> {
        let shared = &self.shared;
        let mut handshake: Handshake<E::Instant> =
            Handshake::new(shared.config.auth_scope.clone(), shared.config.handshake_timeout);

        let params = handshake.start(
            shared.env.now(),
            shared.env.unix_time(),
            shared.signer.address(),
        )?;
        let request = shared
            .signed_request(Call::AuthRequest(params))
            .map_err(|e| AuthError::Protocol(e.to_string()))?;
        let challenge = match shared.dispatch(request).await.map_err(auth_failure)? {
            ResponsePayload::AuthChallenge(challenge) => challenge,
            other => {
                return Err(AuthError::Protocol(format!("expected challenge, got {other:?}")));
            },
        };

        let verify = handshake.on_challenge(&shared.signer, &challenge)?;
        let request = shared
            .signed_request(Call::AuthVerify(verify))
            .map_err(|e| AuthError::Protocol(e.to_string()))?;
        match shared.dispatch(request).await {
            Ok(ResponsePayload::Authenticated) => handshake.on_verdict(Ok(())),
            Ok(other) => Err(AuthError::Protocol(format!("expected verdict, got {other:?}"))),
            Err(CallFailure::Remote(remote)) => handshake.on_verdict(Err(remote)),
            Err(other) => Err(auth_failure(other)),
        }
    }

    /// Open a payment session with the counterparty.
    ///
    /// Requires an authenticated connection and no existing session. On
    /// rejection or timeout no session exists and a retry generates a fresh
    /// descriptor nonce.
    pub async fn open_session(&self, partner: Address) -> Result<SessionHandle, SessionError> {
        match self.connection_state() {
            ConnectionState::Authenticated => {},
            state => return Err(SessionError::NotAuthenticated { state }),
        }

        let shared = &self.shared;
        let mut session = shared.session.lock().await;
        // A closed session or an open attempt abandoned mid-flight does not
        // block a fresh open.
        match session.state() {
            SessionState::Closed | SessionState::AwaitingConfirmation => session.abandon(),
            _ => {},
        }

        let nonce = shared.env.random_u64();
        let id = shared.allocate_id();
        let request =
            session.open(partner, &shared.config.application_id, nonce, id, &shared.signer)?;

        match shared.dispatch(request).await {
            Ok(ResponsePayload::SessionCreated(result)) => {
                session.on_session_confirmed(result.session.clone())?;
                shared.emit(SessionEvent::SessionConfirmed { session: result.session.clone() });
                info!(session = %result.session.0, "session confirmed");
                Ok(result.session)
            },
            Ok(other) => {
                session.on_open_failed();
                Err(CallFailure::UnexpectedPayload(payload_name(&other)).into())
            },
            Err(failure) => {
                session.on_open_failed();
                Err(failure.into())
            },
        }
    }

    /// Pay the counterparty within the active session.
    ///
    /// Returns the new state version. Optimistic mode resolves when the
    /// signed update is handed to the transport; confirm-first mode awaits
    /// the remote acknowledgement.
    pub async fn pay(&self, recipient: &Address, amount: Amount) -> Result<u64, PaymentError> {
        match self.connection_state() {
            ConnectionState::Authenticated => {},
            state => return Err(PaymentError::NotAuthenticated { state }),
        }

        let shared = &self.shared;
        let mut session = shared.session.lock().await;
        let id = shared.allocate_id();
        let request =
            session.pay(recipient, amount, id, &shared.signer, shared.env.unix_time())?;
        let version = session.version();

        match shared.config.ack_policy {
            AckPolicy::Optimistic => {
                // try_send keeps append+dispatch atomic with respect to
                // cancellation: no await between them.
                if let Err(err) = shared.to_remote.try_send(Envelope::request(request)) {
                    session.rollback_unsent(version);
                    return Err(PaymentError::TransportFailure(err.to_string()));
                }
                debug!(version, amount = %amount, "payment dispatched");
                Ok(version)
            },
            AckPolicy::ConfirmFirst => {
                // The guard discards the staged record if this await is
                // abandoned before the acknowledgement is applied.
                let staged = StagedDispatch { session, version, armed: true };
                match shared.dispatch(request).await {
                    Ok(ResponsePayload::StateAccepted { .. }) => {
                        staged.confirm();
                        debug!(version, amount = %amount, "payment confirmed");
                        Ok(version)
                    },
                    Ok(_) => {
                        staged.discard();
                        Err(PaymentError::TransportFailure("unexpected acknowledgement".into()))
                    },
                    Err(CallFailure::Remote(remote)) => {
                        staged.discard();
                        Err(PaymentError::RejectedByRemote {
                            code: remote.code,
                            message: remote.message,
                        })
                    },
                    Err(failure) => {
                        staged.discard();
                        Err(PaymentError::TransportFailure(failure.to_string()))
                    },
                }
            },
        }
    }

    /// Close the active session and return the settlement snapshot.
    ///
    /// Resolves once the signed final state is handed to the transport. A
    /// dispatch failure leaves the session active with the ledger intact,
    /// so close can be retried.
    pub async fn close_session(&self) -> Result<SettlementLedger, CloseError> {
        let shared = &self.shared;
        let mut session = shared.session.lock().await;
        let id = shared.allocate_id();
        let request = session.close(id, &shared.signer)?;

        match shared.to_remote.try_send(Envelope::request(request)) {
            Ok(()) => {
                let settlement = session.finish_close().ok_or(CloseError::NoActiveSession)?;
                info!(total = %settlement.total_sent, "session closed");
                Ok(settlement)
            },
            Err(err) => {
                session.abort_close();
                Err(CloseError::TransportFailure(err.to_string()))
            },
        }
    }
}

impl<S, E> Drop for SessionClient<S, E>
where
    S: Signer,
    E: Environment,
{
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl<S, E> Shared<S, E>
where
    S: Signer,
    E: Environment,
{
    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Run a closure under the connection lock, surviving poison.
    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection<E::Instant>) -> R) -> R {
        match self.conn.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn signed_request(&self, call: Call) -> Result<Request, tally_proto::CodecError> {
        let mut request = Request::unsigned(self.allocate_id(), call);
        let bytes = request.signing_bytes()?;
        let signature = self
            .signer
            .sign(&bytes)
            .map_err(|e| tally_proto::CodecError::Encode(e.to_string()))?;
        request.signature = Some(signature);
        Ok(request)
    }

    /// Send a request and await its correlated response.
    ///
    /// Cancel-safe: abandoning the returned future removes the pending
    /// entry, and a late response routes as unsolicited.
    async fn dispatch(&self, request: Request) -> Result<ResponsePayload, CallFailure> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.with_pending(|pending| pending.insert(id.0, tx));
        let _guard = PendingGuard { shared: self, id };

        if self.to_remote.send(Envelope::request(request)).await.is_err() {
            return Err(CallFailure::ConnectionClosed);
        }

        let bound = self.config.request_timeout;
        match tokio::time::timeout(bound, rx).await {
            Err(_) => Err(CallFailure::Timeout { elapsed: bound }),
            Ok(Err(_closed)) => Err(CallFailure::ConnectionClosed),
            Ok(Ok(outcome)) => outcome.map_err(CallFailure::Remote),
        }
    }

    fn with_pending<R>(&self, f: impl FnOnce(&mut HashMap<u64, PendingSender>) -> R) -> R {
        match self.pending.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Drop every pending sender; their awaiters resolve as closed.
    fn reject_pending(&self) {
        let count = self.with_pending(|pending| {
            let count = pending.len();
            pending.clear();
            count
        });
        if count > 0 {
            debug!(count, "rejected pending requests");
        }
    }

    fn emit(&self, event: SessionEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping event");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {},
        }
    }

    /// Execute connection machine actions.
    fn apply(self: &Arc<Self>, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::StateChanged(state) => {
                    debug!(?state, "connection state changed");
                    self.state_tx.send_replace(state);
                },
                ConnectionAction::Dial => {
                    if self.control.try_send(LinkCommand::Dial).is_err() {
                        warn!("transport not accepting dial commands");
                    }
                },
                ConnectionAction::Heartbeat => self.send_heartbeat(),
                ConnectionAction::ScheduleReconnect { attempt, delay } => {
                    info!(attempt, ?delay, "scheduling reconnect");
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        shared.env.sleep(delay).await;
                        let actions = shared.with_conn(Connection::reconnect_due);
                        shared.apply(actions);
                    });
                },
                ConnectionAction::GiveUp => {
                    warn!("reconnect attempts exhausted");
                    self.reject_pending();
                    self.emit(SessionEvent::Disconnected {
                        reason: "reconnect attempts exhausted".into(),
                        terminal: true,
                    });
                },
            }
        }
    }

    fn send_heartbeat(&self) {
        let id = self.allocate_id();
        let envelope = Envelope::request(Request::unsigned(id, Call::Ping));
        match self.to_remote.try_send(envelope) {
            Ok(()) => {
                if let Ok(mut ping) = self.ping_in_flight.lock() {
                    *ping = Some(id.0);
                }
            },
            Err(_) => debug!("heartbeat skipped, transport not accepting"),
        }
    }

    /// Whether this response answers the outstanding heartbeat ping.
    fn resolve_ping(&self, id: u64) -> bool {
        match self.ping_in_flight.lock() {
            Ok(mut ping) => {
                if *ping == Some(id) {
                    *ping = None;
                    return true;
                }
                false
            },
            Err(_) => false,
        }
    }
}

/// Holds the session lock across a confirm-first acknowledgement await.
///
/// While armed, dropping the guard discards the staged record, so a caller
/// cancelled mid-await never leaves a dangling update that the next payment
/// would silently overwrite.
struct StagedDispatch<'a> {
    session: MutexGuard<'a, PaymentSession>,
    version: u64,
    armed: bool,
}

impl StagedDispatch<'_> {
    fn confirm(mut self) {
        self.armed = false;
        self.session.confirm(self.version);
    }

    fn discard(mut self) {
        self.armed = false;
        self.session.discard_staged(self.version);
    }
}

impl Drop for StagedDispatch<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.discard_staged(self.version);
        }
    }
}

struct PendingGuard<'a, S, E>
where
    S: Signer,
    E: Environment,
{
    shared: &'a Shared<S, E>,
    id: RequestId,
}

impl<S, E> Drop for PendingGuard<'_, S, E>
where
    S: Signer,
    E: Environment,
{
    fn drop(&mut self) {
        self.shared.with_pending(|pending| pending.remove(&self.id.0));
    }
}

async fn run_driver<S, E>(shared: Arc<Shared<S, E>>, mut events: mpsc::Receiver<LinkEvent>)
where
    S: Signer,
    E: Environment,
{
    // One timer across iterations: inbound traffic must not reset it, or a
    // busy link would starve the heartbeat entirely.
    let heartbeat_interval = shared.config.connection.heartbeat_interval;
    let mut tick = std::pin::pin!(shared.env.sleep(heartbeat_interval));
    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                None => {
                    debug!("transport channel closed, stopping driver");
                    shared.reject_pending();
                    break;
                },
                Some(LinkEvent::Up) => {
                    let actions = shared.with_conn(|conn| conn.established(shared.env.now()));
                    shared.apply(actions);
                    shared.emit(SessionEvent::Connected);
                },
                Some(LinkEvent::Envelope(envelope)) => {
                    handle_envelope(&shared, envelope).await;
                },
                Some(LinkEvent::Down { reason }) => {
                    let was_up = shared.with_conn(|conn| {
                        conn.state() != ConnectionState::Disconnected
                    });
                    shared.reject_pending();
                    let actions = shared.with_conn(Connection::remote_closed);
                    let terminal = actions.iter().any(|a| matches!(a, ConnectionAction::GiveUp));
                    shared.apply(actions);
                    if was_up {
                        shared.emit(SessionEvent::Disconnected { reason, terminal });
                    }
                },
            },
            () = &mut tick => {
                let misses_before = shared.with_conn(|conn| conn.heartbeat_misses());
                let actions = shared.with_conn(|conn| conn.tick(shared.env.now()));
                let misses = shared.with_conn(|conn| conn.heartbeat_misses());
                if misses > misses_before {
                    warn!(misses, "heartbeat ping unanswered");
                }
                shared.apply(actions);
                tick.set(shared.env.sleep(heartbeat_interval));
            },
        }
    }
}

async fn handle_envelope<S, E>(shared: &Arc<Shared<S, E>>, envelope: Envelope)
where
    S: Signer,
    E: Environment,
{
    match envelope.body {
        Body::Response(Response { id, outcome }) => {
            if shared.resolve_ping(id.0) {
                shared.with_conn(|conn| conn.pong_received());
                return;
            }
            match shared.with_pending(|pending| pending.remove(&id.0)) {
                Some(sender) => {
                    if sender.send(outcome.into()).is_err() {
                        debug!(id = id.0, "caller abandoned before response arrived");
                    }
                },
                None => debug!(id = id.0, "unsolicited response dropped"),
            }
        },
        Body::Notification(kind) => handle_notification(shared, kind).await,
        Body::Request(request) => {
            debug!(method = request.call.method_name(), "ignoring inbound request");
        },
    }
}

async fn handle_notification<S, E>(shared: &Arc<Shared<S, E>>, kind: NotificationKind)
where
    S: Signer,
    E: Environment,
{
    match kind {
        NotificationKind::PaymentObserved { session, sender, amount, version } => {
            debug!(session = %session.0, %amount, version, "payment observed");
            shared.emit(SessionEvent::PaymentObserved { sender, amount, version });
        },
        NotificationKind::SessionClosed { session, reason } => {
            let mut current = shared.session.lock().await;
            if current.handle() == Some(&session) {
                current.abandon();
            }
            drop(current);
            shared.emit(SessionEvent::SessionClosedByRemote { session, reason });
        },
        NotificationKind::ServerError { code, message } => {
            warn!(code, %message, "server error notification");
            shared.emit(SessionEvent::ProtocolError { code, message });
        },
    }
}

fn auth_failure(failure: CallFailure) -> AuthError {
    match failure {
        CallFailure::Remote(remote) => {
            AuthError::RejectedByRemote { code: remote.code, message: remote.message }
        },
        CallFailure::Timeout { elapsed } => AuthError::Timeout { elapsed },
        CallFailure::ConnectionClosed => {
            AuthError::Protocol("connection closed during handshake".into())
        },
        CallFailure::UnexpectedPayload(what) => {
            AuthError::Protocol(format!("unexpected response payload: {what}"))
        },
    }
}

fn payload_name(payload: &ResponsePayload) -> &'static str {
    match payload {
        ResponsePayload::AuthChallenge(_) => "auth_challenge",
        ResponsePayload::Authenticated => "authenticated",
        ResponsePayload::SessionCreated(_) => "session_created",
        ResponsePayload::StateAccepted { .. } => "state_accepted",
        ResponsePayload::SessionClosed => "session_closed",
        ResponsePayload::Pong => "pong",
    }
}
