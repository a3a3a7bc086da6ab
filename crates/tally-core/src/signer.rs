//! External signer boundary.
//!
//! The client never reads or stores key material. Signing is delegated to a
//! wallet or key-holder behind this trait; the client hands it canonical
//! payload bytes and carries the returned signature verbatim.

use tally_proto::{Address, Signature};
use thiserror::Error;

/// Failure reported by the external signer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The key-holder could not produce a signature (locked wallet, IPC
    /// failure, user rejection).
    #[error("signer unavailable: {reason}")]
    Unavailable {
        /// What the key-holder reported.
        reason: String,
    },
}

/// Signs protocol payloads with the user's key.
///
/// Implemented by the external wallet layer; the local participant's address
/// is supplied by the same boundary and used verbatim in protocol messages.
pub trait Signer: Send + Sync + 'static {
    /// The local participant's address.
    fn address(&self) -> &Address;

    /// Sign the payload bytes.
    ///
    /// # Errors
    ///
    /// `SignerError::Unavailable` if the key-holder cannot sign.
    fn sign(&self, payload: &[u8]) -> Result<Signature, SignerError>;
}

pub mod test_utils {
    //! Deterministic signers for unit tests.

    use tally_proto::{Address, Signature};

    use super::{Signer, SignerError};

    /// Signer producing a stable fake signature: a one-byte tag followed by
    /// a truncated copy of the payload. Enough to assert that the right
    /// bytes were signed without real cryptography.
    pub struct StubSigner {
        address: Address,
    }

    impl StubSigner {
        /// Stub signature tag byte.
        pub const TAG: u8 = 0x5a;

        /// Create a stub signer for the given address.
        ///
        /// # Panics
        ///
        /// Panics if `address` is not a structurally valid address.
        #[must_use]
        #[allow(clippy::panic, clippy::unwrap_used)]
        pub fn new(address: &str) -> Self {
            Self { address: Address::parse(address).unwrap() }
        }
    }

    impl Signer for StubSigner {
        fn address(&self) -> &Address {
            &self.address
        }

        fn sign(&self, payload: &[u8]) -> Result<Signature, SignerError> {
            let mut bytes = vec![Self::TAG];
            bytes.extend_from_slice(&payload[..payload.len().min(16)]);
            Ok(Signature(bytes))
        }
    }

    /// Signer that always fails, for exercising `SignerUnavailable` paths.
    pub struct FailingSigner {
        address: Address,
    }

    impl FailingSigner {
        /// Create a failing signer for the given address.
        ///
        /// # Panics
        ///
        /// Panics if `address` is not a structurally valid address.
        #[must_use]
        #[allow(clippy::panic, clippy::unwrap_used)]
        pub fn new(address: &str) -> Self {
            Self { address: Address::parse(address).unwrap() }
        }
    }

    impl Signer for FailingSigner {
        fn address(&self) -> &Address {
            &self.address
        }

        fn sign(&self, _payload: &[u8]) -> Result<Signature, SignerError> {
            Err(SignerError::Unavailable { reason: "wallet locked".to_string() })
        }
    }
}
