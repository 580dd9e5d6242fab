//! Core identifier types for xnat-jupyter.
//!
//! Config identifiers are sequence-allocated integers, user identifiers mirror the
//! XNAT user primary key, and tracking identifiers are opaque strings chosen by the
//! caller (or generated) to correlate lifecycle events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a persisted configuration record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(u64);

impl ConfigId {
    /// Create a `ConfigId` from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian bytes, used for ordered storage keys.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from big-endian key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 8 bytes long.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 8,
            got: bytes.len(),
        })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigId({})", self.0)
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConfigId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| IdError::InvalidNumber(s.to_string()))
    }
}

impl From<u64> for ConfigId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// XNAT user primary key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// Create a `UserId` from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Big-endian bytes, used for ordered storage keys.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates every event emitted for one start or stop request.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingId(String);

impl TrackingId {
    /// Generate a fresh random tracking ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TrackingId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(IdError::Blank);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackingId({})", self.0)
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TrackingId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrackingId> for String {
    fn from(id: TrackingId) -> Self {
        id.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a non-negative integer.
    #[error("invalid numeric identifier: {0}")]
    InvalidNumber(String),

    /// The identifier is empty or whitespace.
    #[error("identifier cannot be blank")]
    Blank,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_id_key_bytes_roundtrip() {
        let id = ConfigId::new(0x0102_0304);
        let parsed = ConfigId::from_be_slice(&id.to_be_bytes()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn config_id_key_bytes_preserve_order() {
        let low = ConfigId::new(9).to_be_bytes();
        let high = ConfigId::new(256).to_be_bytes();
        assert!(low < high);
    }

    #[test]
    fn config_id_wrong_length() {
        let result = ConfigId::from_be_slice(&[1, 2, 3]);
        assert!(matches!(result, Err(IdError::InvalidLength { expected: 8, got: 3 })));
    }

    #[test]
    fn config_id_parse() {
        assert_eq!("42".parse::<ConfigId>().unwrap(), ConfigId::new(42));
        assert!(matches!(
            "forty-two".parse::<ConfigId>(),
            Err(IdError::InvalidNumber(_))
        ));
    }

    #[test]
    fn config_id_serde_is_plain_number() {
        let json = serde_json::to_string(&ConfigId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn tracking_id_unique() {
        assert_ne!(TrackingId::generate(), TrackingId::generate());
    }

    #[test]
    fn tracking_id_rejects_blank() {
        assert!(matches!("  ".parse::<TrackingId>(), Err(IdError::Blank)));
        let result: Result<TrackingId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn tracking_id_serde_json() {
        let id: TrackingId = "1700000000000_cull-inactive".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TrackingId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
