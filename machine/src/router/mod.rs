//! # Router — Role-Gated Request Dispatch
//!
//! Routes bind URL-style path templates to exactly one handler each. A
//! template segment like `<id|[0-9]+>` declares a named variable with the
//! regex it must match; the whole template compiles to one anchored
//! pattern, so a route matches complete paths only.
//!
//! Every route is registered for a single verb, carried by the
//! [`RouteHandler`] variant. Write verbs (save, delete) resolve only when
//! the signer is a member of the router's role AND that role has an
//! enabled write-access pattern covering the path. Read resolution skips
//! the role checks entirely.
//!
//! A request that is unauthorized resolves exactly like one that matches
//! no route: `None`. Callers cannot distinguish the two, which keeps the
//! surface from leaking which paths exist.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::app::{QueryResponse, TransactionResponse};
use crate::identity::Identity;
use crate::store::{DataStore, Roles, StoreError};

/// Named path variables captured while matching a route.
pub type RouteParams = BTreeMap<String, String>;

/// Save handlers receive `(store, from, path, params, payload,
/// signature)`; verifying the signature against the payload is the
/// handler's call, not the router's.
pub type SaveFn = Box<
    dyn Fn(
            &mut DataStore,
            &Identity,
            &str,
            &RouteParams,
            &[u8],
            &[u8],
        ) -> Result<TransactionResponse, HandlerError>
        + Send
        + Sync,
>;

pub type DeleteFn = Box<
    dyn Fn(
            &mut DataStore,
            &Identity,
            &str,
            &RouteParams,
            &[u8],
        ) -> Result<TransactionResponse, HandlerError>
        + Send
        + Sync,
>;

pub type QueryFn = Box<
    dyn Fn(
            &DataStore,
            &Identity,
            &str,
            &RouteParams,
            &[u8],
        ) -> Result<QueryResponse, HandlerError>
        + Send
        + Sync,
>;

/// What a handler reports when it cannot produce a response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    pub fn message(msg: impl Into<String>) -> Self {
        HandlerError::Message(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid route template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("route template {template:?} does not compile: {source}")]
    InvalidPattern {
        template: String,
        source: regex::Error,
    },
}

// ---------------------------------------------------------------------------
// Verbs and handlers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Save,
    Delete,
    Retrieve,
}

/// One handler per route, tagged by the verb it serves.
pub enum RouteHandler {
    Save(SaveFn),
    Delete(DeleteFn),
    Query(QueryFn),
}

impl RouteHandler {
    pub fn verb(&self) -> Verb {
        match self {
            RouteHandler::Save(_) => Verb::Save,
            RouteHandler::Delete(_) => Verb::Delete,
            RouteHandler::Query(_) => Verb::Retrieve,
        }
    }

    /// Save and delete mutate state and therefore need write access.
    pub fn is_write(&self) -> bool {
        !matches!(self, RouteHandler::Query(_))
    }
}

// ---------------------------------------------------------------------------
// Pattern templates
// ---------------------------------------------------------------------------

/// Compile a template like `/wallets/<id|[0-9]+>` into an anchored regex
/// plus the variable names in capture order.
fn compile_pattern(template: &str) -> Result<(Regex, Vec<String>), RouterError> {
    // Both sub-patterns are literals; they always compile.
    let token = Regex::new("<[^>]+>").map_err(|source| RouterError::InvalidPattern {
        template: template.to_string(),
        source,
    })?;
    let name = Regex::new("[a-z_]+").map_err(|source| RouterError::InvalidPattern {
        template: template.to_string(),
        source,
    })?;

    let mut variables: Vec<String> = Vec::new();
    let mut compiled = template.to_string();
    for found in token.find_iter(template) {
        let inner = &found.as_str()[1..found.as_str().len() - 1];
        let Some((raw_name, raw_pattern)) = inner.split_once('|') else {
            return Err(RouterError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("segment {:?} needs one '|' delimiter", found.as_str()),
            });
        };
        if raw_pattern.contains('|') {
            return Err(RouterError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("segment {:?} has more than one '|' delimiter", found.as_str()),
            });
        }

        let variable = name
            .find(raw_name)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| RouterError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("segment {:?} has no variable name", found.as_str()),
            })?;
        if variables.contains(&variable) {
            return Err(RouterError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("duplicate variable name {variable:?}"),
            });
        }

        variables.push(variable);
        // One token, one capture group; tokens are processed left to
        // right, so each replacement targets its own occurrence.
        compiled = compiled.replacen(found.as_str(), &format!("({raw_pattern})"), 1);
    }

    let anchored = format!("^(?:{compiled})$");
    let pattern = Regex::new(&anchored).map_err(|source| RouterError::InvalidPattern {
        template: template.to_string(),
        source,
    })?;

    Ok((pattern, variables))
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub struct Route {
    pattern: Regex,
    variables: Vec<String>,
    handler: RouteHandler,
}

impl Route {
    pub fn new(template: &str, handler: RouteHandler) -> Result<Self, RouterError> {
        let (pattern, variables) = compile_pattern(template)?;
        Ok(Route {
            pattern,
            variables,
            handler,
        })
    }

    /// Captured params when the path matches this route in full.
    fn capture(&self, path: &str) -> Option<RouteParams> {
        let captures = self.pattern.captures(path)?;
        if captures.len() - 1 != self.variables.len() {
            return None;
        }

        let mut params = RouteParams::new();
        for (index, variable) in self.variables.iter().enumerate() {
            params.insert(
                variable.clone(),
                captures.get(index + 1)?.as_str().to_string(),
            );
        }

        Some(params)
    }
}

/// A matched route, ready to invoke.
pub struct Resolved<'a> {
    path: String,
    params: RouteParams,
    handler: &'a RouteHandler,
}

impl<'a> Resolved<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &RouteParams {
        &self.params
    }

    pub fn handler(&self) -> &'a RouteHandler {
        self.handler
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    role_key: String,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(role_key: &str, routes: Vec<Route>) -> Self {
        Router {
            role_key: role_key.to_string(),
            routes,
        }
    }

    pub fn role_key(&self) -> &str {
        &self.role_key
    }

    /// Resolve `path` under `verb` for the given signer.
    ///
    /// The first route of the right verb whose pattern matches the whole
    /// path wins. Writes additionally require role membership plus an
    /// enabled write-access pattern covering the path; a signer that
    /// fails either check gets `None`, same as a path no route knows.
    pub fn route(
        &self,
        roles: &Roles,
        from: &Identity,
        path: &str,
        verb: Verb,
    ) -> Option<Resolved<'_>> {
        for route in &self.routes {
            if route.handler.verb() != verb {
                continue;
            }

            let Some(params) = route.capture(path) else {
                continue;
            };

            if route.handler.is_write() && !self.may_write(roles, from, path) {
                debug!(%from, path, "write resolution denied");
                return None;
            }

            return Some(Resolved {
                path: path.to_string(),
                params,
                handler: &route.handler,
            });
        }

        debug!(path, ?verb, "no route matched");
        None
    }

    fn may_write(&self, roles: &Roles, from: &Identity, path: &str) -> bool {
        let member = match roles.is_member(&self.role_key, from) {
            Ok(member) => member,
            Err(err) => {
                debug!(role = %self.role_key, %err, "membership check failed");
                return false;
            }
        };
        if !member {
            return false;
        }

        match roles.has_write_access(&self.role_key, &[path]) {
            Ok(granted) => !granted.is_empty(),
            Err(err) => {
                debug!(role = %self.role_key, %err, "write-access check failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn identity() -> Identity {
        Identity::from(&SigningKey::generate(&mut OsRng).verifying_key())
    }

    fn save_route(template: &str) -> Route {
        Route::new(
            template,
            RouteHandler::Save(Box::new(|_, _, _, _, _, _| {
                Ok(TransactionResponse::success(0, BTreeMap::new()))
            })),
        )
        .unwrap()
    }

    fn query_route(template: &str) -> Route {
        Route::new(
            template,
            RouteHandler::Query(Box::new(|_, _, path, params, _| {
                let id = params.get("id").cloned().unwrap_or_default();
                Ok(QueryResponse::success(path, id.into_bytes()))
            })),
        )
        .unwrap()
    }

    #[test]
    fn plain_templates_have_no_variables() {
        let (pattern, variables) = compile_pattern("/wallets").unwrap();
        assert!(variables.is_empty());
        assert!(pattern.is_match("/wallets"));
        assert!(!pattern.is_match("/wallets/1"));
    }

    #[test]
    fn templates_compile_to_named_captures() {
        let (pattern, variables) =
            compile_pattern("/wallets/<id|[0-9]+>/notes/<slug|[a-z]+>").unwrap();
        assert_eq!(variables, vec!["id".to_string(), "slug".to_string()]);

        let captures = pattern.captures("/wallets/42/notes/rent").unwrap();
        assert_eq!(&captures[1], "42");
        assert_eq!(&captures[2], "rent");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(matches!(
            compile_pattern("/x/<id>"),
            Err(RouterError::InvalidTemplate { .. })
        ));
        assert!(matches!(
            compile_pattern("/x/<id|a|b>"),
            Err(RouterError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn duplicate_variable_names_are_rejected() {
        assert!(matches!(
            compile_pattern("/x/<id|[0-9]+>/y/<id|[0-9]+>"),
            Err(RouterError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn repeated_regexes_keep_their_own_captures() {
        // Two variables sharing one regex body must compile to two
        // distinct capture groups, not one group substituted twice.
        let (pattern, variables) =
            compile_pattern("/pair/<a|[0-9]+>/<b|[0-9]+>").unwrap();
        assert_eq!(variables, vec!["a".to_string(), "b".to_string()]);

        let captures = pattern.captures("/pair/1/2").unwrap();
        assert_eq!(captures.len(), 3);
        assert_eq!(&captures[1], "1");
        assert_eq!(&captures[2], "2");
    }

    #[test]
    fn query_routes_skip_role_checks() {
        let roles = Roles::new(Codec::new());
        let router = Router::new("writers", vec![query_route("/wallets/<id|[0-9]+>")]);

        let resolved = router
            .route(&roles, &identity(), "/wallets/7", Verb::Retrieve)
            .unwrap();
        assert_eq!(resolved.path(), "/wallets/7");
        assert_eq!(resolved.params().get("id").unwrap(), "7");
    }

    #[test]
    fn writes_require_membership_and_pattern() {
        let mut roles = Roles::new(Codec::new());
        let member = identity();
        let outsider = identity();
        roles.add("writers", &[member]).unwrap();

        let router = Router::new("writers", vec![save_route("/wallets/<id|[0-9]+>")]);

        // Member of the role, but no write-access pattern enabled yet.
        assert!(router
            .route(&roles, &member, "/wallets/7", Verb::Save)
            .is_none());

        roles.enable_write_access("writers", &["/wallets/.*"]).unwrap();
        assert!(router
            .route(&roles, &member, "/wallets/7", Verb::Save)
            .is_some());

        // Pattern enabled, but the signer is not in the role.
        assert!(router
            .route(&roles, &outsider, "/wallets/7", Verb::Save)
            .is_none());
    }

    #[test]
    fn verb_mismatch_does_not_resolve() {
        let roles = Roles::new(Codec::new());
        let router = Router::new("writers", vec![query_route("/wallets/<id|[0-9]+>")]);

        assert!(router
            .route(&roles, &identity(), "/wallets/7", Verb::Save)
            .is_none());
    }

    #[test]
    fn paths_must_match_in_full() {
        let roles = Roles::new(Codec::new());
        let router = Router::new("writers", vec![query_route("/wallets/<id|[0-9]+>")]);
        let id = identity();

        assert!(router
            .route(&roles, &id, "/wallets/7/extra", Verb::Retrieve)
            .is_none());
        assert!(router
            .route(&roles, &id, "prefix/wallets/7", Verb::Retrieve)
            .is_none());
    }

    #[test]
    fn first_matching_route_wins() {
        let roles = Roles::new(Codec::new());
        let router = Router::new(
            "writers",
            vec![
                query_route("/wallets/<id|[0-9]+>"),
                query_route("/wallets/<id|.*>"),
            ],
        );

        let resolved = router
            .route(&roles, &identity(), "/wallets/7", Verb::Retrieve)
            .unwrap();
        // Only the first route could have produced a digit-constrained
        // match; both would, so ordering is what we assert on.
        assert_eq!(resolved.params().get("id").unwrap(), "7");
    }
}
