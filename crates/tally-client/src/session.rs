//! Payment session state machine.
//!
//! Pure (sans-IO) machine for the bilateral session lifecycle: open,
//! signed per-payment state updates, close with a settlement snapshot.
//! Operations build fully signed requests; the facade dispatches them and
//! feeds outcomes back. Signing happens before any state mutation, so a
//! signer failure never leaves a half-applied transition.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ open ┌──────────────────────┐ confirmed ┌────────┐
//! │ Idle │─────>│ AwaitingConfirmation │──────────>│ Active │<─── pay (loops)
//! └──────┘      └──────────────────────┘           └────────┘
//!    ↑                   │ rejected / timeout        │    ↑
//!    │                   ↓                     close │    │ abort_close
//!    │                 Idle                          ↓    │
//!    │                                          ┌─────────┐ finish_close ┌────────┐
//!    └── abandon (any state) ────────────────── │ Closing │─────────────>│ Closed │
//!                                               └─────────┘              └────────┘
//! ```
//!
//! Invariants:
//! - State version and ledger length move in lockstep (optimistic mode) or
//!   converge on confirmation (confirm-first mode).
//! - The remote handle is set at most once, cleared only by close or
//!   acknowledged abandonment.
//! - Local validation failures mutate nothing.

use tally_core::signer::Signer;
use tally_proto::{
    Address, Allocation, Amount, Request, RequestId, SessionDescriptor, SessionHandle,
    envelope::Call,
    payloads::session::{CloseSessionParams, CreateSessionParams, StateUpdateParams},
};

use crate::{
    error::{CloseError, PaymentError, SessionError},
    ledger::{PaymentRecord, SessionLedger, SettlementLedger},
};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; `open` is legal.
    Idle,
    /// Creation request dispatched; waiting for the remote handle.
    AwaitingConfirmation,
    /// Session confirmed; payments and close are legal.
    Active,
    /// Close request built; waiting for dispatch to resolve.
    Closing,
    /// Session closed; the settlement snapshot has been taken.
    Closed,
    /// Unrecoverable protocol violation; absorbing.
    Errored,
}

/// When a payment becomes visible in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Append before dispatch; roll back only if the transport refuses the
    /// send. Once on the wire the record stands.
    #[default]
    Optimistic,
    /// Stage the record and append only on remote acknowledgement. A
    /// rejected or timed-out update drops the staged record.
    ConfirmFirst,
}

/// Bilateral payment session.
///
/// Owns the ledger, the state version, and the settlement convention. All
/// methods are synchronous and I/O-free; requests they return are already
/// signed and ready to dispatch.
#[derive(Debug)]
pub struct PaymentSession {
    state: SessionState,
    ack_policy: AckPolicy,
    /// Counterparty, fixed at open.
    partner: Option<Address>,
    /// Locally generated nonce identifying the open attempt.
    nonce: Option<u64>,
    /// Remote handle, set exactly once on confirmation.
    handle: Option<SessionHandle>,
    version: u64,
    ledger: SessionLedger,
    /// Confirm-first mode: the record awaiting remote acknowledgement.
    staged: Option<PaymentRecord>,
}

impl PaymentSession {
    /// New idle session.
    #[must_use]
    pub fn new(ack_policy: AckPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            ack_policy,
            partner: None,
            nonce: None,
            handle: None,
            version: 0,
            ledger: SessionLedger::new(),
            staged: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current state version (0 until the first payment).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Remote handle, if confirmed.
    #[must_use]
    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    /// The session ledger.
    #[must_use]
    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Build the signed session creation request.
    ///
    /// Legal from `Idle` only; anything else is [`SessionError::AlreadyOpen`]
    /// (or a protocol violation for terminal states). The descriptor is
    /// immutable once built; `nonce` must be fresh per attempt.
    pub fn open<S: Signer>(
        &mut self,
        partner: Address,
        application_id: &str,
        nonce: u64,
        id: RequestId,
        signer: &S,
    ) -> Result<Request, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyOpen);
        }
        let descriptor = SessionDescriptor {
            local_participant: signer.address().clone(),
            remote_participant: partner.clone(),
            application_id: application_id.to_string(),
            nonce,
        };
        let request = sign(
            Request::unsigned(id, Call::CreateSession(CreateSessionParams { descriptor })),
            signer,
        )?;
        self.state = SessionState::AwaitingConfirmation;
        self.partner = Some(partner);
        self.nonce = Some(nonce);
        Ok(request)
    }

    /// The clearing service confirmed the session.
    ///
    /// Sets the remote handle (at most once) and activates the session.
    pub fn on_session_confirmed(&mut self, handle: SessionHandle) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingConfirmation || self.handle.is_some() {
            self.state = SessionState::Errored;
            return Err(SessionError::AlreadyOpen);
        }
        self.handle = Some(handle);
        self.state = SessionState::Active;
        Ok(())
    }

    /// The open attempt failed (rejection, timeout, or dispatch failure).
    ///
    /// No session ever existed; the machine returns to `Idle` and a fresh
    /// `open` with a new nonce is legal.
    pub fn on_open_failed(&mut self) {
        if self.state == SessionState::AwaitingConfirmation {
            self.state = SessionState::Idle;
            self.partner = None;
            self.nonce = None;
        }
    }

    /// Build the signed state update for one payment.
    ///
    /// Validation order: active session, recipient is the counterparty, no
    /// update still awaiting acknowledgement (confirm-first mode), checked
    /// cumulative addition. Any failure mutates nothing. On success
    /// the version increments by exactly one and the record is appended
    /// (optimistic) or staged (confirm-first).
    pub fn pay<S: Signer>(
        &mut self,
        recipient: &Address,
        amount: Amount,
        id: RequestId,
        signer: &S,
        unix_now: u64,
    ) -> Result<Request, PaymentError> {
        if self.state != SessionState::Active {
            return Err(PaymentError::NoActiveSession);
        }
        let (partner, handle) = match (&self.partner, &self.handle) {
            (Some(p), Some(h)) => (p, h),
            _ => return Err(PaymentError::NoActiveSession),
        };
        if recipient != partner {
            return Err(PaymentError::InvalidRecipient { recipient: recipient.abbreviated() });
        }
        // One outstanding state update at a time: an unresolved staged
        // record must be confirmed or discarded before the next payment,
        // never silently overwritten.
        if self.staged.is_some() {
            return Err(PaymentError::UpdateInFlight);
        }

        let cumulative = self
            .ledger
            .cumulative_for(recipient)
            .and_then(|c| c.checked_add(amount))
            .ok_or(PaymentError::AmountOverflow)?;
        // Bound the grand total too, so the later append cannot fail.
        self.ledger
            .total_sent()
            .checked_add(amount)
            .ok_or(PaymentError::AmountOverflow)?;

        let next_version = self.version + 1;
        let params = StateUpdateParams {
            session: handle.clone(),
            version: next_version,
            allocations: allocation_pair(signer.address(), recipient, cumulative),
        };
        let request = sign(Request::unsigned(id, Call::SubmitState(params)), signer)
            .map_err(payment_sign_error)?;

        let record = PaymentRecord {
            recipient: recipient.clone(),
            amount,
            sequence: next_version,
            recorded_at_unix: unix_now,
        };
        match self.ack_policy {
            AckPolicy::Optimistic => {
                if self.ledger.append(record).is_err() {
                    // Checked above; keep the machine consistent regardless.
                    return Err(PaymentError::AmountOverflow);
                }
            },
            AckPolicy::ConfirmFirst => self.staged = Some(record),
        }
        self.version = next_version;
        Ok(request)
    }

    /// Roll back an optimistically appended payment whose dispatch failed.
    ///
    /// Only the most recent, never-sent version can be rolled back; anything
    /// else is ignored (once on the wire, the record stands).
    pub fn rollback_unsent(&mut self, version: u64) {
        if self.ack_policy != AckPolicy::Optimistic || version != self.version {
            return;
        }
        if self.ledger.records().last().map(|r| r.sequence) == Some(version) {
            self.ledger.pop_last();
            self.version -= 1;
        }
    }

    /// Confirm-first mode: the remote acknowledged the staged update.
    pub fn confirm(&mut self, version: u64) {
        if let Some(record) = self.staged.take_if(|r| r.sequence == version) {
            // Cannot overflow: pay() bounded the total before staging.
            let _ = self.ledger.append(record);
        }
    }

    /// Confirm-first mode: the staged update was rejected or timed out.
    pub fn discard_staged(&mut self, version: u64) {
        if self.staged.take_if(|r| r.sequence == version).is_some() {
            self.version -= 1;
        }
    }

    /// Build the signed close request with the final allocations.
    ///
    /// Legal from `Active` only. The machine moves to `Closing`; the caller
    /// must resolve it with [`PaymentSession::finish_close`] on successful
    /// dispatch or [`PaymentSession::abort_close`] on failure.
    pub fn close<S: Signer>(&mut self, id: RequestId, signer: &S) -> Result<Request, CloseError> {
        if self.state != SessionState::Active {
            return Err(CloseError::NoActiveSession);
        }
        let (partner, handle) = match (&self.partner, &self.handle) {
            (Some(p), Some(h)) => (p.clone(), h.clone()),
            _ => return Err(CloseError::NoActiveSession),
        };
        let final_total = self.ledger.cumulative_for(&partner).unwrap_or(Amount::ZERO);
        let params = CloseSessionParams {
            session: handle,
            final_allocations: allocation_pair(signer.address(), &partner, final_total),
        };
        let request = sign(Request::unsigned(id, Call::CloseSession(params)), signer)
            .map_err(close_sign_error)?;
        self.state = SessionState::Closing;
        Ok(request)
    }

    /// The close request was handed to the transport; resolve the session.
    ///
    /// Clears the ledger, version, and handle together and returns the
    /// settlement snapshot. `None` if not closing.
    pub fn finish_close(&mut self) -> Option<SettlementLedger> {
        if self.state != SessionState::Closing {
            return None;
        }
        self.state = SessionState::Closed;
        self.partner = None;
        self.nonce = None;
        self.handle = None;
        self.version = 0;
        self.staged = None;
        Some(std::mem::take(&mut self.ledger).into_settlement())
    }

    /// The close dispatch failed; return to `Active` with the ledger intact.
    pub fn abort_close(&mut self) {
        if self.state == SessionState::Closing {
            self.state = SessionState::Active;
        }
    }

    /// The session ended without a local close (remote-initiated close or a
    /// terminal connection loss). Clears everything; no settlement snapshot.
    pub fn abandon(&mut self) {
        self.state = SessionState::Idle;
        self.partner = None;
        self.nonce = None;
        self.handle = None;
        self.version = 0;
        self.ledger = SessionLedger::new();
        self.staged = None;
    }
}

/// The allocation pair convention: payer zero, payee cumulative total.
fn allocation_pair(payer: &Address, payee: &Address, cumulative: Amount) -> Vec<Allocation> {
    vec![
        Allocation { participant: payer.clone(), amount: Amount::ZERO },
        Allocation { participant: payee.clone(), amount: cumulative },
    ]
}

fn sign<S: Signer>(mut request: Request, signer: &S) -> Result<Request, SessionError> {
    let bytes = request.signing_bytes()?;
    let signature = signer.sign(&bytes)?;
    request.signature = Some(signature);
    Ok(request)
}

fn payment_sign_error(err: SessionError) -> PaymentError {
    match err {
        SessionError::SignerUnavailable { reason } => PaymentError::SignerUnavailable { reason },
        SessionError::Codec(codec) => PaymentError::Codec(codec),
        // sign() produces only the two variants above.
        other => PaymentError::Codec(tally_proto::CodecError::Encode(other.to_string())),
    }
}

fn close_sign_error(err: SessionError) -> CloseError {
    match err {
        SessionError::SignerUnavailable { reason } => CloseError::SignerUnavailable { reason },
        SessionError::Codec(codec) => CloseError::Codec(codec),
        other => CloseError::Codec(tally_proto::CodecError::Encode(other.to_string())),
    }
}
