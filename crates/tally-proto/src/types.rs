//! Shared wire types: participants, amounts, identifiers.
//!
//! Amounts cross the wire as decimal strings (large-number safe regardless of
//! the peer's integer width) and live in memory as `u128` smallest-unit
//! integers. All summation over amounts is checked; overflow is a hard error
//! at the call site, never wraparound.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

/// A participant address: `0x` followed by 40 hex characters.
///
/// The address is supplied by the external wallet layer and used verbatim in
/// protocol messages; this type only enforces the structural format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidField` if the string is not `0x` + 40 hex chars.
    pub fn parse(s: impl Into<String>) -> Result<Self, CodecError> {
        let s = s.into();
        let hex = s
            .strip_prefix("0x")
            .ok_or_else(|| CodecError::InvalidField(format!("address missing 0x prefix: {s}")))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidField(format!("malformed address: {s}")));
        }
        Ok(Self(s))
    }

    /// The address string exactly as supplied by the wallet layer.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs: `0xd8dA...6045`.
    #[must_use]
    pub fn abbreviated(&self) -> String {
        // Validated on construction, so the slice bounds always hold.
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl FromStr for Address {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A payment amount in the smallest unit of the settled asset.
///
/// Serialized as a decimal string on the wire. Arithmetic is checked:
/// [`Amount::checked_add`] returns `None` on overflow and callers surface
/// that as a hard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u128);

impl Amount {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Construct from a smallest-unit integer.
    #[must_use]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    /// The raw smallest-unit value.
    #[must_use]
    pub const fn units(self) -> u128 {
        self.0
    }

    /// Checked addition. `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Checked subtraction. `None` on underflow.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Amount {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let units = value
            .parse::<u128>()
            .map_err(|e| CodecError::InvalidField(format!("malformed amount {value:?}: {e}")))?;
        Ok(Self(units))
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.0.to_string()
    }
}

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

/// Locally generated request correlation identifier.
///
/// Strictly increasing per client instance and never reused, so a stale
/// response can never resolve a different logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session identifier assigned by the clearing service on
/// confirmation.
///
/// Distinct from the locally generated descriptor nonce: pre-confirmation
/// traffic correlates on the request id, post-confirmation operations carry
/// this handle. The two are never conflated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque signature produced by the external signer.
///
/// The client never inspects signature bytes; they are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub Vec<u8>);

/// Bilateral session parameters, created locally when a session is requested
/// and immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// The local participant (payer).
    pub local_participant: Address,
    /// The counterparty (payee).
    pub remote_participant: Address,
    /// Application identifier agreed with the clearing service.
    pub application_id: String,
    /// Fresh random nonce distinguishing this descriptor from prior sessions
    /// between the same pair.
    pub nonce: u64,
}

/// One participant's entitlement in a state update.
///
/// The session's settlement convention: the payer's entry is always zero and
/// the payee's entry is the running cumulative total, i.e. the payer
/// pre-commits its full balance to the payee over the life of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Entitled participant.
    pub participant: Address,
    /// Entitlement amount.
    pub amount: Amount,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn address_accepts_canonical_form() {
        let addr = Address::parse("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap();
        assert_eq!(addr.as_str(), "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        assert_eq!(addr.abbreviated(), "0xd8dA...6045");
    }

    #[test]
    fn address_rejects_malformed_input() {
        assert!(Address::parse("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045").is_err());
        assert!(Address::parse("0xinvalid").is_err());
        assert!(Address::parse("0x1234").is_err());
    }

    #[test]
    fn amount_wire_form_is_decimal_string() {
        let amount = Amount::new(340_282_366_920_938_463_463);
        assert_eq!(String::from(amount), "340282366920938463463");
        assert_eq!(Amount::try_from("340282366920938463463".to_string()).unwrap(), amount);
    }

    #[test]
    fn amount_defaults_to_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
    }

    #[test]
    fn amount_rejects_non_numeric_strings() {
        assert!(Amount::try_from("12.5".to_string()).is_err());
        assert!(Amount::try_from("-3".to_string()).is_err());
        assert!(Amount::try_from("1e18".to_string()).is_err());
    }

    #[test]
    fn amount_addition_is_checked() {
        assert_eq!(
            Amount::new(100).checked_add(Amount::new(250)),
            Some(Amount::new(350))
        );
        assert_eq!(Amount::new(u128::MAX).checked_add(Amount::new(1)), None);
    }
}
