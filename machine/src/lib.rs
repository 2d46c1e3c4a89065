// Copyright (c) 2026 Ashlar Contributors. MIT License.
// See LICENSE for details.

//! # Ashlar — Replicated State Machine
//!
//! Ashlar is the application side of a permissioned blockchain: an
//! external BFT consensus engine decides the order of transactions, and
//! this crate executes them, deterministically, against a
//! content-addressed key-value state. Every honest replica running the
//! same transaction stream must end every block with the same root hash,
//! or consensus splits and everyone has a bad day.
//!
//! ## Architecture
//!
//! The crate is layered the way the data flows:
//!
//! - **hashtree** — SHA-256 Merkle trees over block lists. The
//!   determinism workhorse.
//! - **codec** — The serialization context, passed in by value. JSON for
//!   typed values, bincode for the on-disk blob.
//! - **identity** — Ed25519 verifying keys as signer identities.
//! - **store** — Keyed bytes, typed objects, lists and sets, users,
//!   roles, and the aggregate datastore with its single root hash.
//! - **router** — Path templates to handlers, gated by role membership
//!   and regex write-access grants.
//! - **app** — The consensus-facing surface: info, check, deliver,
//!   commit, query.
//!
//! ## Design Philosophy
//!
//! 1. Determinism is not negotiable. Sorted iteration, fixed fold
//!    orders, no wall clocks.
//! 2. The consensus engine always gets a well-formed response, even when
//!    a handler panics.
//! 3. A commit that cannot persist aborts. Diverging quietly is worse
//!    than stopping loudly.

pub mod app;
pub mod codec;
pub mod hashtree;
pub mod identity;
pub mod router;
pub mod store;

pub use app::{
    Application, Applications, CommitError, CommitResponse, Database, InfoRequest, InfoResponse,
    QueryRequest, QueryResponse, ResponseCode, State, TransactionRequest, TransactionResponse,
    EMPTY_HASH,
};
pub use codec::{Codec, CodecError};
pub use hashtree::{Compact, Hash, HashTree, HashTreeError};
pub use identity::{Identity, IdentityError};
pub use router::{
    HandlerError, Resolved, Route, RouteHandler, RouteParams, Router, RouterError, Verb,
};
pub use store::{
    DataStore, Keys, Lists, Objects, Roles, StoreError, StoredDataStore, Users, UsersError,
};
