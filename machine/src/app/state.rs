//! Committed chain state and the database that advances it.
//!
//! A `State` is the tuple consensus cares about: the app hash, the block
//! height, the number of delivered transactions and the version it
//! belongs to. The `Database` keeps one `State` per application version,
//! records every committed state inside the datastore itself (so a
//! restarted replica can replay them) and persists the whole store to
//! disk at each commit.
//!
//! Two behaviors here look odd but are load-bearing for compatibility:
//! the app hash is only re-derived from the store root when at least one
//! transaction has ever been delivered (a zero-size commit keeps the
//! prior hash), and the delivered-transaction count carries across
//! commits rather than resetting per block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{StoreError, StoredDataStore};

/// Before anything is committed, the app hash is this placeholder: the
/// eight zero bytes of a varint-encoded zero, kept for compatibility
/// with states committed by earlier deployments.
pub const EMPTY_HASH: [u8; 8] = [0u8; 8];

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("state {key} is listed in the {set} set but could not be retrieved")]
    MissingState { key: String, set: String },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    hash: Vec<u8>,
    height: u64,
    size: u64,
    version: String,
}

impl State {
    fn empty(version: &str) -> State {
        State {
            hash: EMPTY_HASH.to_vec(),
            height: 0,
            size: 0,
            version: version.to_string(),
        }
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// True until the first commit derives a real root hash.
    pub fn is_placeholder(&self) -> bool {
        self.hash == EMPTY_HASH
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Delivered-transaction count since genesis.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn increment(&mut self) -> u64 {
        self.size += 1;
        self.size
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

pub struct Database {
    state_key: String,
    states: BTreeMap<String, State>,
    stored: StoredDataStore,
}

impl Database {
    /// Rebuild the per-version state map from the datastore, or start
    /// fresh when nothing was ever committed.
    ///
    /// Committed state hashes live in the set at `state_key`; each full
    /// state record lives in the object store under
    /// `"<state_key>:<hash hex>"`. A hash listed in the set without a
    /// matching record means the store is corrupt, and that is an error.
    pub fn retrieve_or_create(stored: StoredDataStore, state_key: &str) -> Result<Self, CommitError> {
        let hashes = stored
            .store()
            .sets()
            .retrieve(state_key, 0, None)?
            .unwrap_or_default();

        let mut states: BTreeMap<String, State> = BTreeMap::new();
        for hash in &hashes {
            let key = format!("{state_key}:{}", hex::encode(hash));
            let state: State = stored.store().objects().retrieve(&key)?.ok_or_else(|| {
                CommitError::MissingState {
                    key: key.clone(),
                    set: state_key.to_string(),
                }
            })?;

            states.insert(state.version.clone(), state);
        }

        Ok(Database {
            state_key: state_key.to_string(),
            states,
            stored,
        })
    }

    /// The current state for `version`, bootstrapping an empty one on
    /// first access.
    pub fn state(&mut self, version: &str) -> &State {
        self.ensure(version)
    }

    /// Count one delivered transaction; returns the new size.
    pub fn increment(&mut self, version: &str) -> u64 {
        self.ensure(version).increment()
    }

    /// Advance the state for `version` by one height and persist.
    ///
    /// The new app hash is the datastore root when any transaction was
    /// ever delivered, otherwise the previous hash is kept. The new state
    /// is recorded in the set and object stores, and the datastore is
    /// flushed to disk; a hash already present in the set means this
    /// exact state was committed before, so the disk write is skipped.
    pub fn update(&mut self, version: &str) -> Result<State, CommitError> {
        let previous = self.ensure(version).clone();

        let hash = if previous.size > 0 {
            self.stored.store().root_hash().to_vec()
        } else {
            debug!(version, "no transactions delivered yet, keeping prior hash");
            previous.hash.clone()
        };

        let state = State {
            hash,
            height: previous.height + 1,
            size: previous.size,
            version: version.to_string(),
        };
        self.states.insert(version.to_string(), state.clone());

        let hash_hex = hex::encode(&state.hash);
        let added = self
            .stored
            .store_mut()
            .sets_mut()
            .add(&self.state_key, &[state.hash.clone()])?;
        if added != 1 {
            warn!(
                hash = %hash_hex,
                state_key = %self.state_key,
                "state hash already recorded, skipping save"
            );
            return Ok(state);
        }

        let record_key = format!("{}:{hash_hex}", self.state_key);
        self.stored
            .store_mut()
            .objects_mut()
            .save(&record_key, &state)?;
        self.stored.save()?;

        info!(
            version,
            height = state.height,
            size = state.size,
            hash = %hash_hex,
            "committed state"
        );

        Ok(state)
    }

    pub fn stored(&self) -> &StoredDataStore {
        &self.stored
    }

    pub fn stored_mut(&mut self) -> &mut StoredDataStore {
        &mut self.stored
    }

    fn ensure(&mut self, version: &str) -> &mut State {
        self.states
            .entry(version.to_string())
            .or_insert_with(|| State::empty(version))
    }
}
