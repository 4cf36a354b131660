//! Dispatcher: the authenticated entry point of the broker
//!
//! Every request goes through the same gate: the operation name is looked up
//! in the operation table, the session token is resolved by the
//! [`SessionAuthority`], and only then is a unit of work built and run.
//! Whatever happens afterwards, the caller gets exactly one [`Reply`].

use crate::config::BackboneConfig;
use crate::error::{BackboneError, Result};
use crate::executor::{Executor, UnitOfWork};
use crate::facade::DataStore;
use crate::handlers::{self, Scope, WorkResult};
use crate::operation::Operation;
use crate::policy::PathPolicy;
use crate::resolver::PathResolver;
use crate::sanitize::sanitize;
use crate::session::SessionAuthority;
use crate::types::{Identity, Payload, Reply, ReplyBody, Request};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Authenticated work-dispatch engine
pub struct Dispatcher {
    authority: Arc<dyn SessionAuthority>,
    executor: Executor,
    resolver: Arc<PathResolver>,
}

impl Dispatcher {
    /// Create a dispatcher from its collaborators
    pub fn new(
        authority: Arc<dyn SessionAuthority>,
        executor: Executor,
        resolver: PathResolver,
    ) -> Self {
        Self {
            authority,
            executor,
            resolver: Arc::new(resolver),
        }
    }

    /// Build a dispatcher from configuration
    ///
    /// Fails when the configuration is invalid or names an unknown path rule.
    pub fn from_config(
        config: &BackboneConfig,
        authority: Arc<dyn SessionAuthority>,
        store: Arc<dyn DataStore>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = PathPolicy::compile(&config.path_rules)?;
        let resolver = PathResolver::new(policy, &config.managed_repository_root)?;
        let executor = Executor::new(store, config.worker_pool_size())?;
        Ok(Self::new(authority, executor, resolver))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Handle one request and produce its reply
    pub async fn handle(&self, request: Request) -> Reply {
        let started = Instant::now();
        let Request {
            id,
            operation,
            payload,
        } = request;
        tracing::debug!(request_id = %id, operation = %operation, "Request received");

        let reply = match operation.parse::<Operation>() {
            Ok(op) => self.dispatch(&id, op, payload).await,
            Err(e) => {
                tracing::warn!(request_id = %id, operation = %operation, "Unsupported operation");
                Reply::failure(&e)
            }
        };

        tracing::debug!(
            request_id = %id,
            operation = %operation,
            success = reply.is_success(),
            code = ?reply.failure_code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        reply
    }

    /// Handle one request and send its reply on `reply_to`
    ///
    /// The sender is consumed, so a request is answered at most once; `handle`
    /// always produces a reply, so it is answered at least once. Returns
    /// false when the receiving side has already gone away.
    pub async fn handle_with_reply(&self, request: Request, reply_to: oneshot::Sender<Reply>) -> bool {
        let id = request.id.clone();
        let reply = self.handle(request).await;
        if reply_to.send(reply).is_err() {
            tracing::warn!(request_id = %id, "Reply receiver dropped before the reply was sent");
            return false;
        }
        true
    }

    /// Whether the payload's session token names a live session
    ///
    /// Lookup errors answer false; this check never fails.
    pub async fn is_session_valid(&self, payload: &Payload) -> bool {
        let Some(token) = payload.session_key() else {
            return false;
        };
        match self.authority.find(token).await {
            Ok(Some(session)) => !session.is_expired(chrono::Utc::now()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed during validity check");
                false
            }
        }
    }

    /// Resolve the payload's session token into an identity
    ///
    /// Absent, unknown, expired and unresolvable tokens are all `SessionInvalid`.
    pub async fn authenticate(&self, payload: &Payload) -> Result<Identity> {
        let token = payload.session_key().ok_or(BackboneError::SessionInvalid)?;
        match self.authority.find(token).await {
            Ok(Some(session)) if !session.is_expired(chrono::Utc::now()) => Ok(session.identity()),
            Ok(_) => Err(BackboneError::SessionInvalid),
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed");
                Err(BackboneError::SessionInvalid)
            }
        }
    }

    async fn dispatch(&self, request_id: &str, op: Operation, payload: Payload) -> Reply {
        if op == Operation::IsSessionValid {
            return Reply::bool(self.is_session_valid(&payload).await);
        }

        let identity = match self.authenticate(&payload).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(request_id, operation = op.name(), "Rejected: session invalid");
                return Reply::failure(&e);
            }
        };
        tracing::debug!(request_id, operation = op.name(), subject = %identity.subject, "Authenticated");

        match self.run(op, identity, payload).await {
            Ok(body) => Reply::Success(body),
            Err(e) => {
                if e.code() == crate::error::CODE_UNEXPECTED {
                    tracing::error!(request_id, operation = op.name(), error = %e, "Request failed");
                } else {
                    tracing::debug!(request_id, operation = op.name(), error = %e, "Request failed");
                }
                Reply::failure(&e)
            }
        }
    }

    async fn run(&self, op: Operation, identity: Identity, payload: Payload) -> Result<ReplyBody> {
        let handler = handlers::handler(op)
            .ok_or_else(|| BackboneError::UnsupportedOperation(op.subject().to_string()))?;
        let resolver = Arc::clone(&self.resolver);

        let unit = UnitOfWork::new(op.name(), identity, move |cx| {
            let scope = Scope {
                tx: cx.tx,
                store: cx.store,
                resolver: &resolver,
            };
            encode(handler(&scope, &payload)?)
        });
        self.executor.execute(unit).await
    }
}

/// Turn a handler result into a reply body
///
/// Graphs are sanitized first, which also drops nodes no root reaches.
/// Serialization of a graph still carrying an ambient context fails.
pub fn encode(result: WorkResult) -> Result<ReplyBody> {
    let value = match result {
        WorkResult::Bool(b) => return Ok(ReplyBody::Bool(b)),
        WorkResult::Graph(mut graph) => {
            let report = sanitize(&mut graph);
            tracing::debug!(
                visited = report.visited,
                cleared = report.cleared,
                pruned = report.pruned,
                "Graph sanitized"
            );
            serde_json::to_vec(&graph)?
        }
        WorkResult::Text(text) => serde_json::to_vec(&text)?,
        WorkResult::Json(value) => serde_json::to_vec(&value)?,
        WorkResult::Empty => serde_json::to_vec(&serde_json::Value::Null)?,
    };
    Ok(ReplyBody::Serialized(Bytes::from(value)))
}
