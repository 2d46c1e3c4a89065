//! # Store — Content-Addressed State
//!
//! Everything the state machine knows lives here, layered bottom-up:
//!
//! - **keys** — the keyed store: opaque byte values, each wrapped in its
//!   own integrity hash tree, with a lazily-recomputed aggregate root.
//! - **objects** — typed save/retrieve over the keyed store via the codec.
//! - **lists** — ordered sequences and unique sets per key, with range
//!   reads, union and intersection.
//! - **users** — the registry of known signer identities.
//! - **roles** — named identity groups with regex-gated write access.
//! - **datastore** — the aggregate of all six substores, with a single
//!   root hash and full copy-on-write snapshots, plus the file-backed
//!   `StoredDataStore` wrapper.
//!
//! The one invariant that cannot bend: every aggregate root folds its
//! entries in a fixed lexicographic key order. Map-iteration-order roots
//! would differ across replicas and split consensus.

use thiserror::Error;

use crate::codec::CodecError;

mod datastore;
mod keys;
mod lists;
mod objects;
mod roles;
mod users;

pub use datastore::{DataStore, StoredDataStore};
pub use keys::{Keys, StoredInstance};
pub use lists::Lists;
pub use objects::Objects;
pub use roles::Roles;
pub use users::{Users, UsersError};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
