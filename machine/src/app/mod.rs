//! # Application — The Consensus-Facing Surface
//!
//! The consensus engine never touches the stores directly; it speaks the
//! four-phase protocol implemented here. `info` reports the committed
//! state, `check_transact` speculatively executes against a throwaway
//! copy of the store, `transact` executes against the live store, and
//! `commit` seals a block by advancing the state and flushing to disk.
//! `query` serves reads between blocks.
//!
//! Whatever happens inside a handler — a miss, a refusal, an error, even
//! a panic — the engine gets back a well-formed coded response. Only
//! commit persistence failures are allowed to escape as errors, because
//! a replica that cannot persist must stop rather than diverge.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::Identity;
use crate::router::{RouteHandler, Router, Verb};
use crate::store::DataStore;

mod state;

pub use state::{CommitError, Database, State, EMPTY_HASH};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Outcome codes shared by every response the engine can receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Success = 0,
    NotFound = 1,
    ServerError = 2,
    Unauthorized = 3,
    Unauthenticated = 4,
    RouteNotFound = 5,
    InvalidRoute = 6,
    InvalidRequest = 7,
}

impl ResponseCode {
    pub fn value(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoRequest {
    version: String,
}

impl InfoRequest {
    pub fn new(version: &str) -> Self {
        InfoRequest {
            version: version.to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    version: String,
    size: u64,
    last_block_height: u64,
    last_block_app_hash: Vec<u8>,
}

impl InfoResponse {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_block_height(&self) -> u64 {
        self.last_block_height
    }

    pub fn last_block_app_hash(&self) -> &[u8] {
        &self.last_block_app_hash
    }
}

/// A signed write. A payload makes it a save; no payload makes it a
/// delete.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRequest {
    from: Identity,
    path: String,
    payload: Option<Vec<u8>>,
    signature: Vec<u8>,
}

impl TransactionRequest {
    pub fn save(from: Identity, path: &str, payload: Vec<u8>, signature: Vec<u8>) -> Self {
        TransactionRequest {
            from,
            path: path.to_string(),
            payload: Some(payload),
            signature,
        }
    }

    pub fn delete(from: Identity, path: &str, signature: Vec<u8>) -> Self {
        TransactionRequest {
            from,
            path: path.to_string(),
            payload: None,
            signature,
        }
    }

    pub fn from(&self) -> &Identity {
        &self.from
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn verb(&self) -> Verb {
        if self.payload.is_some() {
            Verb::Save
        } else {
            Verb::Delete
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    code: ResponseCode,
    log: String,
    gas_used: u64,
    tags: BTreeMap<String, Vec<u8>>,
}

impl TransactionResponse {
    pub fn success(gas_used: u64, tags: BTreeMap<String, Vec<u8>>) -> Self {
        TransactionResponse {
            code: ResponseCode::Success,
            log: String::new(),
            gas_used,
            tags,
        }
    }

    pub fn failure(code: ResponseCode, log: impl Into<String>) -> Self {
        TransactionResponse {
            code,
            log: log.into(),
            gas_used: 0,
            tags: BTreeMap::new(),
        }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn tags(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.tags
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    from: Identity,
    path: String,
    signature: Vec<u8>,
}

impl QueryRequest {
    pub fn new(from: Identity, path: &str, signature: Vec<u8>) -> Self {
        QueryRequest {
            from,
            path: path.to_string(),
            signature,
        }
    }

    pub fn from(&self) -> &Identity {
        &self.from
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    code: ResponseCode,
    log: String,
    key: String,
    value: Vec<u8>,
}

impl QueryResponse {
    pub fn success(key: &str, value: Vec<u8>) -> Self {
        QueryResponse {
            code: ResponseCode::Success,
            log: String::new(),
            key: key.to_string(),
            value,
        }
    }

    pub fn failure(code: ResponseCode, log: impl Into<String>) -> Self {
        QueryResponse {
            code,
            log: log.into(),
            key: String::new(),
            value: Vec::new(),
        }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitResponse {
    previous_hash: Vec<u8>,
    new_hash: Vec<u8>,
    height: u64,
}

impl CommitResponse {
    pub fn previous_hash(&self) -> &[u8] {
        &self.previous_hash
    }

    pub fn new_hash(&self) -> &[u8] {
        &self.new_hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub struct Application {
    from_block_index: u64,
    to_block_index: u64,
    version: String,
    router: Router,
    db: Database,
}

impl Application {
    /// An application serves the block window
    /// `[from_block_index, to_block_index)`.
    pub fn new(
        from_block_index: u64,
        to_block_index: u64,
        version: &str,
        router: Router,
        db: Database,
    ) -> Self {
        Application {
            from_block_index,
            to_block_index,
            version: version.to_string(),
            router,
            db,
        }
    }

    pub fn from_block_index(&self) -> u64 {
        self.from_block_index
    }

    pub fn to_block_index(&self) -> u64 {
        self.to_block_index
    }

    pub fn block_index(&mut self) -> u64 {
        self.db.state(&self.version).height()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// The committed state, echoed back with the engine's version string.
    pub fn info(&mut self, req: &InfoRequest) -> InfoResponse {
        let state = self.db.state(&self.version);
        InfoResponse {
            version: req.version.clone(),
            size: state.size(),
            last_block_height: state.height(),
            last_block_app_hash: state.hash().to_vec(),
        }
    }

    /// Execute a transaction against the live store. The delivered count
    /// grows only when the handler reports success.
    pub fn transact(&mut self, req: &TransactionRequest) -> TransactionResponse {
        let router = &self.router;
        let store = self.db.stored_mut().store_mut();
        let resp = exec_transaction(router, store, req);

        if resp.code == ResponseCode::Success {
            self.db.increment(&self.version);
        }

        resp
    }

    /// Speculatively execute against a copy of the store. Canonical state
    /// and the delivered count are untouched no matter what the handler
    /// does.
    pub fn check_transact(&self, req: &TransactionRequest) -> TransactionResponse {
        let mut store = self.db.stored().store().copy();
        exec_transaction(&self.router, &mut store, req)
    }

    /// Seal the block: advance the state, persist the store and report
    /// both hashes. Persistence failure aborts the commit.
    pub fn commit(&mut self) -> Result<CommitResponse, CommitError> {
        let previous_hash = self.db.state(&self.version).hash().to_vec();
        let state = self.db.update(&self.version)?;

        Ok(CommitResponse {
            previous_hash,
            new_hash: state.hash().to_vec(),
            height: state.height(),
        })
    }

    /// Serve a read. Resolution failures and handler failures both come
    /// back as coded responses.
    pub fn query(&self, req: &QueryRequest) -> QueryResponse {
        let store = self.db.stored().store();
        let Some(resolved) = self
            .router
            .route(store.roles(), &req.from, &req.path, Verb::Retrieve)
        else {
            return QueryResponse::failure(
                ResponseCode::RouteNotFound,
                "no route found for the given query",
            );
        };

        let RouteHandler::Query(query_fn) = resolved.handler() else {
            return QueryResponse::failure(
                ResponseCode::InvalidRoute,
                "the resolved route cannot serve queries",
            );
        };

        let path = resolved.path().to_string();
        let params = resolved.params().clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            query_fn(store, &req.from, &path, &params, &req.signature)
        }));

        match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                debug!(path = %req.path, %err, "query handler failed");
                QueryResponse::failure(
                    ResponseCode::InvalidRequest,
                    format!("the query handler failed: {err}"),
                )
            }
            Err(_) => {
                warn!(path = %req.path, "query handler panicked");
                QueryResponse::failure(ResponseCode::ServerError, "the query handler panicked")
            }
        }
    }
}

/// The shared transaction path: resolve, invoke, absorb failures.
fn exec_transaction(
    router: &Router,
    store: &mut DataStore,
    req: &TransactionRequest,
) -> TransactionResponse {
    let verb = req.verb();
    let Some(resolved) = router.route(store.roles(), &req.from, &req.path, verb) else {
        return TransactionResponse::failure(
            ResponseCode::RouteNotFound,
            "no route found for the given transaction",
        );
    };

    let path = resolved.path().to_string();
    let params = resolved.params().clone();
    let handler = resolved.handler();

    let outcome = catch_unwind(AssertUnwindSafe(|| match (handler, &req.payload) {
        (RouteHandler::Save(save_fn), Some(payload)) => {
            save_fn(store, &req.from, &path, &params, payload, &req.signature)
        }
        (RouteHandler::Delete(delete_fn), None) => {
            delete_fn(store, &req.from, &path, &params, &req.signature)
        }
        // The verb is derived from the payload, so these cannot pair up.
        _ => Ok(TransactionResponse::failure(
            ResponseCode::InvalidRoute,
            "the resolved route cannot serve this transaction",
        )),
    }));

    match outcome {
        Ok(Ok(resp)) => resp,
        Ok(Err(err)) => {
            debug!(path = %req.path, %err, "transaction handler failed");
            TransactionResponse::failure(
                ResponseCode::InvalidRequest,
                format!("the transaction handler failed: {err}"),
            )
        }
        Err(_) => {
            warn!(path = %req.path, "transaction handler panicked");
            TransactionResponse::failure(
                ResponseCode::ServerError,
                "the transaction handler panicked",
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Applications registry
// ---------------------------------------------------------------------------

/// Version-windowed applications, looked up by block index.
pub struct Applications {
    apps: Vec<Application>,
}

impl Applications {
    pub fn new(apps: Vec<Application>) -> Self {
        Applications { apps }
    }

    /// The application whose block window contains `index`.
    pub fn retrieve_by_block_index(&mut self, index: u64) -> Option<&mut Application> {
        self.apps
            .iter_mut()
            .find(|app| app.from_block_index <= index && index < app.to_block_index)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::router::{HandlerError, Route};
    use crate::store::StoredDataStore;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn identity() -> Identity {
        Identity::from(&SigningKey::generate(&mut OsRng).verifying_key())
    }

    fn message_routes() -> Vec<Route> {
        vec![
            Route::new(
                "/messages/<id|[0-9]+>",
                RouteHandler::Save(Box::new(|store, _, _, params, payload, signature| {
                    let id = params
                        .get("id")
                        .ok_or_else(|| HandlerError::message("missing id"))?;
                    store
                        .keys_mut()
                        .save(&format!("messages:{id}"), payload.to_vec());
                    store
                        .keys_mut()
                        .save(&format!("messages:{id}:sig"), signature.to_vec());
                    Ok(TransactionResponse::success(1, BTreeMap::new()))
                })),
            )
            .unwrap(),
            Route::new(
                "/messages/<id|[0-9]+>",
                RouteHandler::Delete(Box::new(|store, _, _, params, _signature| {
                    let id = params
                        .get("id")
                        .ok_or_else(|| HandlerError::message("missing id"))?;
                    if store.keys_mut().delete(&[format!("messages:{id}").as_str()]) != 1 {
                        return Ok(TransactionResponse::failure(
                            ResponseCode::NotFound,
                            "no such message",
                        ));
                    }
                    Ok(TransactionResponse::success(1, BTreeMap::new()))
                })),
            )
            .unwrap(),
            Route::new(
                "/messages/<id|[0-9]+>",
                RouteHandler::Query(Box::new(|store, _, path, params, _signature| {
                    let id = params
                        .get("id")
                        .ok_or_else(|| HandlerError::message("missing id"))?;
                    match store.keys().retrieve(&format!("messages:{id}")) {
                        Some(value) => Ok(QueryResponse::success(path, value.to_vec())),
                        None => Ok(QueryResponse::failure(
                            ResponseCode::NotFound,
                            "no such message",
                        )),
                    }
                })),
            )
            .unwrap(),
            Route::new(
                "/boom",
                RouteHandler::Save(Box::new(|_, _, _, _, _, _| panic!("handler exploded"))),
            )
            .unwrap(),
        ]
    }

    fn application(dir: &tempfile::TempDir, writer: &Identity) -> Application {
        let stored =
            StoredDataStore::retrieve_or_create(Codec::new(), dir.path().join("app.db")).unwrap();
        let mut db = Database::retrieve_or_create(stored, "app:states").unwrap();

        let store = db.stored_mut().store_mut();
        store.users_mut().insert(writer).unwrap();
        store.roles_mut().add("writers", &[*writer]).unwrap();
        store
            .roles_mut()
            .enable_write_access("writers", &["/messages/.*", "/boom"])
            .unwrap();

        Application::new(
            0,
            u64::MAX,
            "v1",
            Router::new("writers", message_routes()),
            db,
        )
    }

    #[test]
    fn info_reports_the_bootstrap_state() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let info = app.info(&InfoRequest::new("v1"));
        assert_eq!(info.version(), "v1");
        assert_eq!(info.size(), 0);
        assert_eq!(info.last_block_height(), 0);
        assert_eq!(info.last_block_app_hash(), &EMPTY_HASH);
    }

    #[test]
    fn transact_saves_and_counts_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let req = TransactionRequest::save(writer, "/messages/1", b"hello".to_vec(), vec![]);
        let resp = app.transact(&req);
        assert_eq!(resp.code(), ResponseCode::Success);
        assert_eq!(app.db_mut().state("v1").size(), 1);

        let value = app
            .db()
            .stored()
            .store()
            .keys()
            .retrieve("messages:1")
            .unwrap();
        assert_eq!(value, b"hello");
    }

    #[test]
    fn failed_transactions_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        // Delete of a message that does not exist.
        let req = TransactionRequest::delete(writer, "/messages/9", vec![]);
        let resp = app.transact(&req);
        assert_eq!(resp.code(), ResponseCode::NotFound);
        assert_eq!(app.db_mut().state("v1").size(), 0);
    }

    #[test]
    fn handlers_receive_the_request_signature() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let signature = vec![7u8; 64];
        let req =
            TransactionRequest::save(writer, "/messages/1", b"hello".to_vec(), signature.clone());
        assert_eq!(app.transact(&req).code(), ResponseCode::Success);

        let stored = app
            .db()
            .stored()
            .store()
            .keys()
            .retrieve("messages:1:sig")
            .unwrap();
        assert_eq!(stored, signature.as_slice());
    }

    #[test]
    fn unknown_signer_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let req =
            TransactionRequest::save(identity(), "/messages/1", b"hello".to_vec(), vec![]);
        assert_eq!(app.transact(&req).code(), ResponseCode::RouteNotFound);
    }

    #[test]
    fn check_transact_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let req = TransactionRequest::save(writer, "/messages/1", b"hello".to_vec(), vec![]);
        let resp = app.check_transact(&req);
        assert_eq!(resp.code(), ResponseCode::Success);

        assert_eq!(app.db_mut().state("v1").size(), 0);
        assert!(app
            .db()
            .stored()
            .store()
            .keys()
            .retrieve("messages:1")
            .is_none());
    }

    #[test]
    fn query_round_trips_a_saved_value() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        app.transact(&TransactionRequest::save(
            writer,
            "/messages/1",
            b"hello".to_vec(),
            vec![],
        ));

        let resp = app.query(&QueryRequest::new(writer, "/messages/1", vec![]));
        assert_eq!(resp.code(), ResponseCode::Success);
        assert_eq!(resp.key(), "/messages/1");
        assert_eq!(resp.value(), b"hello");

        let missing = app.query(&QueryRequest::new(writer, "/nowhere", vec![]));
        assert_eq!(missing.code(), ResponseCode::RouteNotFound);
    }

    #[test]
    fn panicking_handlers_become_server_errors() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        let req = TransactionRequest::save(writer, "/boom", b"x".to_vec(), vec![]);
        let resp = app.transact(&req);
        assert_eq!(resp.code(), ResponseCode::ServerError);
        assert_eq!(app.db_mut().state("v1").size(), 0);
    }

    #[test]
    fn commit_advances_height_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let writer = identity();
        let mut app = application(&dir, &writer);

        app.transact(&TransactionRequest::save(
            writer,
            "/messages/1",
            b"hello".to_vec(),
            vec![],
        ));

        let resp = app.commit().unwrap();
        assert_eq!(resp.height(), 1);
        assert_eq!(resp.previous_hash(), &EMPTY_HASH);
        assert_eq!(resp.new_hash().len(), 32);
        assert_ne!(resp.new_hash(), resp.previous_hash());
    }

    #[test]
    fn registry_selects_by_block_window() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let writer = identity();

        let mut first = application(&dir_a, &writer);
        first.from_block_index = 0;
        first.to_block_index = 10;
        let mut second = application(&dir_b, &writer);
        second.from_block_index = 10;
        second.to_block_index = 20;

        let mut apps = Applications::new(vec![first, second]);
        assert_eq!(apps.retrieve_by_block_index(5).unwrap().version(), "v1");
        assert_eq!(
            apps.retrieve_by_block_index(10)
                .unwrap()
                .from_block_index(),
            10
        );
        assert!(apps.retrieve_by_block_index(20).is_none());
    }
}
