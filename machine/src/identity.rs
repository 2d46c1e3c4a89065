//! # Identity — Who Signed This
//!
//! Signers are identified by their Ed25519 verifying key, nothing more.
//! The core never verifies signatures itself — handlers own that decision —
//! but every request and every role membership is keyed by an `Identity`.

use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid identity hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("identity must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A signer identity: the 32 raw bytes of an Ed25519 verifying key.
///
/// Printable as lowercase hex; the hex form doubles as the storage key in
/// the user registry and role sets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);

impl Identity {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Identity(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(bytes.len()))?;
        Ok(Identity(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let raw = hex::decode(s)?;
        Self::from_slice(&raw)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<&VerifyingKey> for Identity {
    fn from(key: &VerifyingKey) -> Self {
        Identity(key.to_bytes())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_hex())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identity::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn hex_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let id = Identity::from(&key.verifying_key());
        let back = Identity::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(matches!(
            Identity::from_slice(&[0u8; 16]),
            Err(IdentityError::InvalidLength(16))
        ));
    }

    #[test]
    fn distinct_keys_distinct_identities() {
        let a = Identity::from(&SigningKey::generate(&mut OsRng).verifying_key());
        let b = Identity::from(&SigningKey::generate(&mut OsRng).verifying_key());
        assert_ne!(a, b);
    }
}
