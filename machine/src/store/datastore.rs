//! The aggregate datastore and its file-backed wrapper.
//!
//! `DataStore` composes the six substores and derives one root hash from
//! their heads, folded in a fixed order: Keys, Lists, Sets, Objects,
//! Users, Roles. That order is part of the consensus contract — reorder
//! it and every replica's root changes.
//!
//! `StoredDataStore` pins a `DataStore` to a file path. Persistence is a
//! single opaque bincode blob per file; the format is internal and not a
//! cross-implementation contract. A failed save is surfaced, never
//! swallowed: continuing after one would desynchronize in-memory state
//! from durable storage.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Keys, Lists, Objects, Roles, StoreError, Users};
use crate::codec::Codec;
use crate::hashtree::{Hash, HashTree};

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
pub struct DataStore {
    keys: Keys,
    lists: Lists,
    sets: Lists,
    objects: Objects,
    users: Users,
    roles: Roles,
}

impl DataStore {
    pub fn new(codec: Codec) -> Self {
        DataStore {
            keys: Keys::new(),
            lists: Lists::new_list(codec),
            sets: Lists::new_set(codec),
            objects: Objects::new(codec),
            users: Users::new(),
            roles: Roles::new(codec),
        }
    }

    /// The aggregate tree over the six substore heads, fixed order.
    pub fn head(&self) -> HashTree {
        let blocks: Vec<Vec<u8>> = vec![
            self.keys.head().to_vec(),
            self.lists.head().to_vec(),
            self.sets.head().to_vec(),
            self.objects.head().to_vec(),
            self.users.head().to_vec(),
            self.roles.head().to_vec(),
        ];

        HashTree::from_nonempty_blocks(&blocks)
    }

    /// The root hash every replica must agree on.
    pub fn root_hash(&self) -> Hash {
        *self.head().head()
    }

    /// Full structural copy of all six substores. O(total state size);
    /// the copy shares nothing with the original. This is what makes
    /// speculative ("check") execution safe.
    pub fn copy(&self) -> DataStore {
        self.clone()
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut Keys {
        &mut self.keys
    }

    pub fn lists(&self) -> &Lists {
        &self.lists
    }

    pub fn lists_mut(&mut self) -> &mut Lists {
        &mut self.lists
    }

    pub fn sets(&self) -> &Lists {
        &self.sets
    }

    pub fn sets_mut(&mut self) -> &mut Lists {
        &mut self.sets
    }

    pub fn objects(&self) -> &Objects {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut Objects {
        &mut self.objects
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut Users {
        &mut self.users
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn roles_mut(&mut self) -> &mut Roles {
        &mut self.roles
    }
}

// ---------------------------------------------------------------------------
// StoredDataStore
// ---------------------------------------------------------------------------

/// A `DataStore` pinned to a file path.
pub struct StoredDataStore {
    store: DataStore,
    codec: Codec,
    path: PathBuf,
}

impl StoredDataStore {
    /// Load the datastore serialized at `path`, or start empty if the file
    /// does not exist yet. A file that exists but cannot be read or
    /// decoded is an error — silently discarding state is not an option.
    pub fn retrieve_or_create<P: AsRef<Path>>(codec: Codec, path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let store = if path.exists() {
            let blob = fs::read(&path).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            codec.decode_blob(&blob)?
        } else {
            debug!(path = %path.display(), "no stored datastore found, starting empty");
            DataStore::new(codec)
        };

        Ok(StoredDataStore { store, codec, path })
    }

    /// Serialize the current datastore to its file. Errors propagate to
    /// the caller; a commit that cannot persist must abort.
    pub fn save(&self) -> Result<(), StoreError> {
        let blob = self.codec.encode_blob(&self.store)?;
        fs::write(&self.path, blob).map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DataStore {
        &mut self.store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
