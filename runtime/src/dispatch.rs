//! Request dispatch table: operation name to local handler.
//!
//! Every inbound request resolves to exactly one reply payload. Handlers decode
//! their request schema, call a local capability and encode the result; every
//! failure along the way (bad field, capability error, unknown operation, even a
//! panic) becomes an `{ "error": ... }` payload so the requester always gets a
//! deterministic answer instead of a hang.
//!
//! # Example
//!
//! ```
//! use onboarding_rpc_core::operations::{KanbanProgress, KanbanProgressRequest};
//! use onboarding_rpc_core::payload::Payload;
//! use onboarding_rpc_runtime::dispatch::DispatchTable;
//! use serde_json::json;
//!
//! # async fn example() {
//! let table = DispatchTable::new().route("count_kanban_progress", |request: KanbanProgressRequest| async move {
//!     let _ = request.employee_id;
//!     Ok::<_, String>(KanbanProgress { todo: 1, in_progress: 0, done: 2 })
//! });
//!
//! let reply = table.dispatch("count_kanban_progress", Payload::new()).await;
//! assert_eq!(reply.get("error"), Some(&json!("missing 'employee_id'")));
//! # }
//! ```

use futures::FutureExt;
use onboarding_rpc_core::envelope::REPLY_MESSAGE_TYPE;
use onboarding_rpc_core::payload::{self, FieldError, FromPayload, IntoPayload, Payload};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error message for operations with no handler.
pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown message type";

/// Error message for handlers that panicked.
pub const INTERNAL_ERROR: &str = "internal error";

/// Failure of a single handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The request payload failed validation
    #[error(transparent)]
    Invalid(#[from] FieldError),

    /// The capability reported a failure
    #[error("{0}")]
    Failed(String),
}

/// Future returned by a [`RequestHandler`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Payload, HandlerError>> + Send + 'a>>;

/// Handler for one operation.
pub trait RequestHandler: Send + Sync {
    /// Handle a request payload, producing the reply payload.
    fn handle(&self, payload: Payload) -> HandlerFuture<'_>;
}

/// Adapter coupling a request schema and a response schema to an async function.
struct TypedHandler<Req, Resp, F> {
    handler: F,
    _schema: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F, Fut, E> RequestHandler for TypedHandler<Req, Resp, F>
where
    Req: FromPayload + Send + 'static,
    Resp: IntoPayload + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    E: fmt::Display + 'static,
{
    fn handle(&self, payload: Payload) -> HandlerFuture<'_> {
        Box::pin(async move {
            let request = Req::from_payload(&payload)?;
            let response = (self.handler)(request)
                .await
                .map_err(|e| HandlerError::Failed(e.to_string()))?;
            Ok(response.into_payload())
        })
    }
}

/// Operation name to handler map.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("operations", &self.operations())
            .finish()
    }
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `operation`.
    ///
    /// Returns `true` if a previous handler was replaced. The reserved reply tag
    /// is never routed; registering it has no effect.
    pub fn register(
        &mut self,
        operation: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> bool {
        let operation = operation.into();
        if operation == REPLY_MESSAGE_TYPE {
            tracing::warn!("Refusing to route the reserved reply tag");
            return false;
        }
        self.handlers.insert(operation, Arc::new(handler)).is_some()
    }

    /// Route `operation` to a typed async handler.
    ///
    /// The request is decoded with [`FromPayload`] before `handler` runs; a
    /// decoding failure short-circuits with `missing '<field>'`. An `Err` from
    /// `handler` is rendered with `Display` into the error payload.
    #[must_use]
    pub fn route<Req, Resp, F, Fut, E>(mut self, operation: impl Into<String>, handler: F) -> Self
    where
        Req: FromPayload + Send + 'static,
        Resp: IntoPayload + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.register(
            operation,
            TypedHandler {
                handler,
                _schema: PhantomData,
            },
        );
        self
    }

    /// Whether `operation` has a handler.
    #[must_use]
    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `operation` and return the reply payload.
    ///
    /// Never fails: every failure is an error payload.
    pub async fn dispatch(&self, operation: &str, payload: Payload) -> Payload {
        let handler = if operation == REPLY_MESSAGE_TYPE {
            None
        } else {
            self.handlers.get(operation).cloned()
        };

        let Some(handler) = handler else {
            tracing::warn!(operation, "No handler for operation");
            return payload::error_payload(UNKNOWN_MESSAGE_TYPE);
        };

        let outcome = AssertUnwindSafe(async move { handler.handle(payload).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(HandlerError::Invalid(e))) => {
                tracing::warn!(
                    operation,
                    field = e.field(),
                    error = ?e,
                    "Rejected invalid request"
                );
                payload::error_payload(e.to_string())
            }
            Ok(Err(HandlerError::Failed(message))) => {
                tracing::warn!(operation, error = %message, "Handler failed");
                payload::error_payload(message)
            }
            Err(_) => {
                tracing::error!(operation, "Handler panicked");
                payload::error_payload(INTERNAL_ERROR)
            }
        }
    }
}
