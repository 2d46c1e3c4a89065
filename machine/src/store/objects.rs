//! Typed save/retrieve over the keyed store.
//!
//! `Objects` is a thin layer: values go through the injected [`Codec`] on
//! the way in and out, and everything else — integrity trees, aggregate
//! head, deep copies — is the underlying [`Keys`] behavior.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Keys, StoreError};
use crate::codec::Codec;
use crate::hashtree::{Hash, HashTree};

#[derive(Clone, Serialize, Deserialize)]
pub struct Objects {
    keys: Keys,
    #[serde(skip)]
    codec: Codec,
}

impl Objects {
    pub fn new(codec: Codec) -> Self {
        Objects {
            keys: Keys::new(),
            codec,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Encode and store a typed value at `key`.
    pub fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = self.codec.encode(value)?;
        self.keys.save(key, bytes);
        Ok(())
    }

    /// Retrieve and decode the value at `key`, if present.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.keys.retrieve(key) {
            Some(bytes) => Ok(Some(self.codec.decode(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, keys: &[&str]) -> usize {
        self.keys.exists(keys)
    }

    pub fn delete(&mut self, keys: &[&str]) -> usize {
        self.keys.delete(keys)
    }

    pub fn search(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.keys.search(pattern)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn hash_tree(&self, key: &str) -> Option<&HashTree> {
        self.keys.hash_tree(key)
    }

    pub fn head(&self) -> Hash {
        self.keys.head()
    }

    pub fn copy(&self) -> Objects {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wallet {
        owner: String,
        balance: u64,
    }

    fn wallet() -> Wallet {
        Wallet {
            owner: "alice".to_string(),
            balance: 500,
        }
    }

    #[test]
    fn save_then_retrieve_typed() {
        let mut objects = Objects::new(Codec::new());
        objects.save("wallet:1", &wallet()).unwrap();

        let back: Wallet = objects.retrieve("wallet:1").unwrap().unwrap();
        assert_eq!(back, wallet());
    }

    #[test]
    fn retrieve_missing_is_none() {
        let objects = Objects::new(Codec::new());
        let got: Option<Wallet> = objects.retrieve("missing").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn retrieve_wrong_type_is_error() {
        let mut objects = Objects::new(Codec::new());
        objects.save("count", &7u64).unwrap();
        assert!(objects.retrieve::<Wallet>("count").is_err());
    }

    #[test]
    fn head_tracks_mutations() {
        let mut objects = Objects::new(Codec::new());
        let empty = objects.head();

        objects.save("wallet:1", &wallet()).unwrap();
        assert_ne!(objects.head(), empty);

        objects.delete(&["wallet:1"]);
        assert_eq!(objects.head(), empty);
    }

    #[test]
    fn copy_is_isolated() {
        let mut original = Objects::new(Codec::new());
        original.save("wallet:1", &wallet()).unwrap();

        let mut copied = original.copy();
        copied
            .save(
                "wallet:1",
                &Wallet {
                    owner: "mallory".to_string(),
                    balance: 0,
                },
            )
            .unwrap();

        let untouched: Wallet = original.retrieve("wallet:1").unwrap().unwrap();
        assert_eq!(untouched, wallet());
    }
}
