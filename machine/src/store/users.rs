//! The registry of known signer identities.
//!
//! Bootstrap code populates this before the application starts serving;
//! handlers consult it to decide whether a signer is known at all. Keyed
//! by the identity's hex form so the aggregate root stays deterministic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Keys;
use crate::hashtree::Hash;
use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum UsersError {
    #[error("identity {0} is already registered")]
    AlreadyExists(Identity),

    #[error("identity {0} is not registered")]
    NotFound(Identity),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Users {
    keys: Keys,
}

impl Users {
    pub fn new() -> Self {
        Users { keys: Keys::new() }
    }

    /// Register an identity; registering twice is an error.
    pub fn insert(&mut self, identity: &Identity) -> Result<(), UsersError> {
        if self.exists(identity) {
            return Err(UsersError::AlreadyExists(*identity));
        }

        self.keys
            .save(&identity.to_hex(), identity.as_bytes().to_vec());
        Ok(())
    }

    /// Remove an identity; removing an unknown one is an error.
    pub fn delete(&mut self, identity: &Identity) -> Result<(), UsersError> {
        if self.keys.delete(&[identity.to_hex().as_str()]) != 1 {
            return Err(UsersError::NotFound(*identity));
        }

        Ok(())
    }

    pub fn exists(&self, identity: &Identity) -> bool {
        self.keys.exists(&[identity.to_hex().as_str()]) == 1
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn head(&self) -> Hash {
        self.keys.head()
    }

    pub fn copy(&self) -> Users {
        self.clone()
    }
}

impl Default for Users {
    fn default() -> Self {
        Self::new()
    }
}
