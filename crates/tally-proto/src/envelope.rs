//! The versioned RPC envelope.
//!
//! Every wire message is an [`Envelope`]: a protocol version byte plus one of
//! request / response / notification. Requests carry a locally generated
//! [`RequestId`] and an optional detached signature over the canonical
//! encoding of `(id, call)`; responses correlate back by id; notifications
//! carry none.
//!
//! # Invariants
//!
//! - Each [`Call`] variant maps to exactly one method name (enforced by
//!   match exhaustiveness in [`Call::method_name`]).
//! - [`Request::signing_bytes`] is stable across re-encoding and excludes
//!   the signature itself.
//! - Decoding validates the version before anything else; an envelope from
//!   a future major version is rejected, not guessed at.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{CodecError, Result},
    payloads::{
        NotificationKind, RemoteError, ResponsePayload,
        auth::{AuthRequestParams, AuthVerifyParams},
        session::{CloseSessionParams, CreateSessionParams, StateUpdateParams},
    },
    types::{RequestId, Signature},
};

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version.
    pub version: u8,
    /// Message body.
    pub body: Body,
}

impl Envelope {
    /// Wrap a request at the current protocol version.
    #[must_use]
    pub fn request(request: Request) -> Self {
        Self { version: PROTOCOL_VERSION, body: Body::Request(request) }
    }

    /// Wrap a response at the current protocol version.
    #[must_use]
    pub fn response(response: Response) -> Self {
        Self { version: PROTOCOL_VERSION, body: Body::Response(response) }
    }

    /// Wrap a notification at the current protocol version.
    #[must_use]
    pub fn notification(kind: NotificationKind) -> Self {
        Self { version: PROTOCOL_VERSION, body: Body::Notification(kind) }
    }

    /// Encode to CBOR bytes.
    ///
    /// # Errors
    ///
    /// `CodecError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes, validating the protocol version.
    ///
    /// # Errors
    ///
    /// - `CodecError::Decode` on malformed CBOR, missing required fields, or
    ///   an unknown method/notification tag
    /// - `CodecError::UnsupportedVersion` on a version mismatch
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Self =
            ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Request, response, or unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    /// Client-initiated call.
    Request(Request),
    /// Service reply correlated by request id.
    Response(Response),
    /// Unsolicited service message.
    Notification(NotificationKind),
}

/// A client-initiated call with optional detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, never reused within a client instance.
    pub id: RequestId,
    /// Method and typed parameters.
    pub call: Call,
    /// Signature over [`Request::signing_bytes`]; `None` for unsigned
    /// methods (`Ping`).
    pub signature: Option<Signature>,
}

impl Request {
    /// Build an unsigned request.
    #[must_use]
    pub fn unsigned(id: RequestId, call: Call) -> Self {
        Self { id, call, signature: None }
    }

    /// Canonical bytes the external signer signs: CBOR of `(id, call)`.
    ///
    /// The signature field is excluded, so attaching a signature does not
    /// change the signed content.
    ///
    /// # Errors
    ///
    /// `CodecError::Encode` if serialization fails.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&(self.id, &self.call), &mut buf)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// A service reply correlated by request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: RequestId,
    /// Success payload or explicit remote error.
    pub outcome: Outcome,
}

/// Success or explicit error outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The request succeeded.
    Ok(ResponsePayload),
    /// The service rejected the request.
    Err(RemoteError),
}

impl From<Outcome> for std::result::Result<ResponsePayload, RemoteError> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(payload) => Ok(payload),
            Outcome::Err(err) => Err(err),
        }
    }
}

/// Method and typed parameters, one variant per RPC method.
///
/// An unknown method tag fails decoding with `CodecError::Decode`; the
/// client never dispatches on strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    /// Begin the challenge-response handshake.
    AuthRequest(AuthRequestParams),
    /// Return the signed challenge.
    AuthVerify(AuthVerifyParams),
    /// Negotiate a bilateral payment session.
    CreateSession(CreateSessionParams),
    /// Record one payment as a signed state update.
    SubmitState(StateUpdateParams),
    /// Close the session with final allocations.
    CloseSession(CloseSessionParams),
    /// Liveness ping.
    Ping,
}

impl Call {
    /// Stable method name for logging and diagnostics.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::AuthRequest(_) => "auth_request",
            Self::AuthVerify(_) => "auth_verify",
            Self::CreateSession(_) => "create_session",
            Self::SubmitState(_) => "submit_state",
            Self::CloseSession(_) => "close_session",
            Self::Ping => "ping",
        }
    }
}
