//! Codec error types.
//!
//! Decoding is strict where it matters for safety: an unsupported envelope
//! version or an unknown method tag is an error, never a silent
//! reinterpretation. Unknown *additive* fields inside payload maps are
//! tolerated, which is what keeps the client forward-compatible with the
//! clearing service's contract.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced by envelope encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed (malformed bytes, missing required
    /// fields, or an unknown method/notification tag).
    #[error("decode failed: {0}")]
    Decode(String),

    /// Envelope carries a protocol version this client does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A wire string failed structural validation (e.g. a malformed
    /// participant address).
    #[error("invalid field: {0}")]
    InvalidField(String),
}
