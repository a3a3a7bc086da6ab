//! Challenge-response authentication handshake.
//!
//! Pure state machine for the three-step auth exchange: send an auth
//! request, sign the challenge the clearing endpoint returns, await the
//! verdict. The driver owns the wire; this machine owns the phase ordering,
//! the single-flight guarantee, and the timeout.

use std::{ops::Sub, time::Duration};

use tally_proto::{
    payloads::auth::{AuthChallenge, AuthRequestParams, AuthVerifyParams},
    RemoteError,
    types::Address,
};

use crate::{error::AuthError, signer::Signer};

/// Default deadline for the whole handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime requested for the authenticated scope, in seconds.
const AUTH_EXPIRY_SECS: u64 = 3600;

/// Handshake phases, in exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No handshake attempted on this connection.
    Idle,
    /// Auth request sent; waiting for the challenge.
    AwaitingChallenge,
    /// Signed challenge sent; waiting for the verdict.
    AwaitingVerdict,
    /// Verdict was positive; the connection is authenticated.
    Authenticated,
    /// The exchange failed; a fresh `start` may retry.
    Failed,
}

/// Challenge-response handshake state machine.
///
/// Generic over the instant type so tests can drive it with a virtual clock.
#[derive(Debug, Clone)]
pub struct Handshake<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    phase: HandshakePhase,
    timeout: Duration,
    started_at: Option<I>,
    scope: String,
}

impl<I> Handshake<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an idle handshake for the given application scope.
    #[must_use]
    pub fn new(scope: impl Into<String>, timeout: Duration) -> Self {
        Self {
            phase: HandshakePhase::Idle,
            timeout,
            started_at: None,
            scope: scope.into(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether an exchange is in flight.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            HandshakePhase::AwaitingChallenge | HandshakePhase::AwaitingVerdict
        )
    }

    /// Begin the exchange; returns the auth request parameters to send.
    ///
    /// Legal from `Idle` or `Failed`. A second call while an exchange is in
    /// flight returns [`AuthError::AlreadyInFlight`]; callers wanting to
    /// share an in-flight outcome must do so above this machine.
    pub fn start(
        &mut self,
        now: I,
        unix_now: u64,
        address: &Address,
    ) -> Result<AuthRequestParams, AuthError> {
        if self.in_flight() {
            return Err(AuthError::AlreadyInFlight);
        }
        self.phase = HandshakePhase::AwaitingChallenge;
        self.started_at = Some(now);
        Ok(AuthRequestParams {
            address: address.clone(),
            scope: self.scope.clone(),
            expires_at_unix: unix_now + AUTH_EXPIRY_SECS,
        })
    }

    /// The challenge arrived; sign it and return the verify parameters.
    ///
    /// An empty challenge or a signer failure moves the machine to `Failed`.
    pub fn on_challenge<S: Signer>(
        &mut self,
        signer: &S,
        challenge: &AuthChallenge,
    ) -> Result<AuthVerifyParams, AuthError> {
        if self.phase != HandshakePhase::AwaitingChallenge {
            return Err(AuthError::Protocol(format!(
                "challenge received in phase {:?}",
                self.phase
            )));
        }
        if challenge.challenge.is_empty() {
            self.phase = HandshakePhase::Failed;
            return Err(AuthError::Protocol("empty challenge".into()));
        }
        match signer.sign(&challenge.challenge) {
            Ok(signature) => {
                self.phase = HandshakePhase::AwaitingVerdict;
                Ok(AuthVerifyParams { signature })
            },
            Err(err) => {
                self.phase = HandshakePhase::Failed;
                Err(err.into())
            },
        }
    }

    /// The verdict arrived.
    pub fn on_verdict(&mut self, outcome: Result<(), RemoteError>) -> Result<(), AuthError> {
        if self.phase != HandshakePhase::AwaitingVerdict {
            return Err(AuthError::Protocol(format!(
                "verdict received in phase {:?}",
                self.phase
            )));
        }
        match outcome {
            Ok(()) => {
                self.phase = HandshakePhase::Authenticated;
                Ok(())
            },
            Err(remote) => {
                self.phase = HandshakePhase::Failed;
                Err(AuthError::RejectedByRemote {
                    code: remote.code,
                    message: remote.message,
                })
            },
        }
    }

    /// Fail the exchange if it has exceeded its deadline.
    ///
    /// Returns the timeout error once; the machine moves to `Failed`.
    pub fn check_timeout(&mut self, now: I) -> Option<AuthError> {
        if !self.in_flight() {
            return None;
        }
        let started = self.started_at?;
        let elapsed = now - started;
        if elapsed < self.timeout {
            return None;
        }
        self.phase = HandshakePhase::Failed;
        Some(AuthError::Timeout { elapsed })
    }

    /// Reset to `Idle`. Called when the underlying connection drops.
    pub fn reset(&mut self) {
        self.phase = HandshakePhase::Idle;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        env::{Environment, test_utils::MockEnv},
        signer::test_utils::{FailingSigner, StubSigner},
    };

    const ADDR: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    fn address() -> Address {
        Address::parse(ADDR).expect("valid address")
    }

    fn handshake() -> Handshake<Instant> {
        Handshake::new("clearing.app", DEFAULT_HANDSHAKE_TIMEOUT)
    }

    #[test]
    fn full_exchange_authenticates() {
        let t0 = Instant::now();
        let signer = StubSigner::new(ADDR);
        let mut hs = handshake();

        let params = hs.start(t0, 1_700_000_000, &address()).expect("start");
        assert_eq!(params.scope, "clearing.app");
        assert_eq!(params.expires_at_unix, 1_700_000_000 + 3600);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingChallenge);

        let challenge = AuthChallenge { challenge: vec![7; 32] };
        let verify = hs.on_challenge(&signer, &challenge).expect("sign");
        assert!(!verify.signature.0.is_empty());
        assert_eq!(hs.phase(), HandshakePhase::AwaitingVerdict);

        hs.on_verdict(Ok(())).expect("verdict");
        assert_eq!(hs.phase(), HandshakePhase::Authenticated);
    }

    #[test]
    fn second_start_while_in_flight_is_rejected() {
        let t0 = Instant::now();
        let mut hs = handshake();
        hs.start(t0, 0, &address()).expect("start");

        let err = hs.start(t0, 0, &address()).expect_err("must reject");
        assert!(matches!(err, AuthError::AlreadyInFlight));
        assert_eq!(hs.phase(), HandshakePhase::AwaitingChallenge);
    }

    #[test]
    fn empty_challenge_fails_the_exchange() {
        let t0 = Instant::now();
        let signer = StubSigner::new(ADDR);
        let mut hs = handshake();
        hs.start(t0, 0, &address()).expect("start");

        let err = hs
            .on_challenge(&signer, &AuthChallenge { challenge: vec![] })
            .expect_err("must fail");
        assert!(matches!(err, AuthError::Protocol(_)));
        assert_eq!(hs.phase(), HandshakePhase::Failed);
    }

    #[test]
    fn signer_failure_fails_the_exchange() {
        let t0 = Instant::now();
        let signer = FailingSigner::new(ADDR);
        let mut hs = handshake();
        hs.start(t0, 0, &address()).expect("start");

        let err = hs
            .on_challenge(&signer, &AuthChallenge { challenge: vec![1, 2, 3] })
            .expect_err("must fail");
        assert!(matches!(err, AuthError::SignerUnavailable { .. }));
        assert_eq!(hs.phase(), HandshakePhase::Failed);
    }

    #[test]
    fn rejection_carries_the_remote_code() {
        let t0 = Instant::now();
        let signer = StubSigner::new(ADDR);
        let mut hs = handshake();
        hs.start(t0, 0, &address()).expect("start");
        hs.on_challenge(&signer, &AuthChallenge { challenge: vec![9; 16] })
            .expect("sign");

        let err = hs
            .on_verdict(Err(RemoteError {
                code: 401,
                message: "signature mismatch".into(),
            }))
            .expect_err("must reject");
        match err {
            AuthError::RejectedByRemote { code, message } => {
                assert_eq!(code, 401);
                assert_eq!(message, "signature mismatch");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hs.phase(), HandshakePhase::Failed);

        // A fresh start may retry after failure.
        hs.start(t0, 0, &address()).expect("retry");
    }

    #[test]
    fn exchange_times_out() {
        let env = MockEnv::new();
        let mut hs = handshake();
        hs.start(env.now(), env.unix_time(), &address()).expect("start");

        env.advance(Duration::from_secs(29));
        assert!(hs.check_timeout(env.now()).is_none());

        env.advance(Duration::from_secs(1));
        let err = hs.check_timeout(env.now()).expect("timed out");
        assert!(matches!(err, AuthError::Timeout { .. }));
        assert_eq!(hs.phase(), HandshakePhase::Failed);

        // Reported once.
        env.advance(Duration::from_secs(30));
        assert!(hs.check_timeout(env.now()).is_none());
    }

    #[test]
    fn reset_returns_to_idle() {
        let t0 = Instant::now();
        let mut hs = handshake();
        hs.start(t0, 0, &address()).expect("start");
        hs.reset();
        assert_eq!(hs.phase(), HandshakePhase::Idle);
        hs.start(t0, 0, &address()).expect("start again");
    }
}
