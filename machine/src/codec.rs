//! # Codec — The Serialization Context
//!
//! One explicit serialization context, constructed at bootstrap and passed
//! into every store that needs to encode values. No global codec registry,
//! no `init()`-time type registration: the callers that serialize are the
//! callers that hold a `Codec`.
//!
//! Two encodings, two jobs:
//!
//! - **JSON** (`serde_json`) for typed values stored inside the datastore.
//!   Struct fields serialize in declaration order, so the byte form of a
//!   value is stable across replicas — which is what the hash tree folds.
//! - **bincode** for the opaque on-disk blob a `StoredDataStore` writes.
//!   Compact, fast, and internal-only; the file format is not a
//!   cross-implementation contract.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blob encoding failed: {0}")]
    Blob(#[from] bincode::Error),
}

/// The serialization context.
///
/// Stateless and trivially copyable; holding one is a statement of intent
/// (this component serializes values) rather than a cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Codec
    }

    /// Encode a typed value to its canonical stored byte form.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode a typed value from its stored byte form.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a value into the opaque persistence blob format.
    pub fn encode_blob<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(value)?)
    }

    /// Decode a value from the opaque persistence blob format.
    pub fn decode_blob<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
