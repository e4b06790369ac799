//! Outgoing calls: request, wait for the correlated reply, decode.
//!
//! A call registers in the [`CorrelationTable`] *before* its request is handed
//! to the publish task, so a reply can never arrive ahead of its entry. The
//! wait is always bounded; there is no unbounded call.

use crate::correlation::{CorrelationError, CorrelationTable, WaitError};
use crate::dispatcher::{DispatchError, OutboundDispatcher};
use crate::metrics::CallMetrics;
use onboarding_rpc_core::envelope::OutboundEnvelope;
use onboarding_rpc_core::payload::{self, FieldError, FromPayload, IntoPayload, Payload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time;

/// Errors from an outgoing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The correlation id could not be registered
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The publish task is gone
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// No reply arrived in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that was called
        operation: String,
        /// Bound that elapsed
        after: Duration,
    },

    /// The reply channel was released before a reply arrived
    #[error("{operation} reply channel closed before a reply arrived")]
    ReplyDropped {
        /// Operation that was called
        operation: String,
    },

    /// The remote service answered with an error payload
    #[error("remote error: {0}")]
    Remote(String),

    /// The reply did not match the expected schema
    #[error("invalid reply: {0}")]
    Decode(#[from] FieldError),
}

impl CallError {
    /// Whether the call ended because no reply arrived in time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Caller side of the request/reply protocol.
///
/// Cheap to clone; clones share the correlation table and publish task.
#[derive(Clone, Debug)]
pub struct RpcClient {
    reply_to: String,
    table: Arc<CorrelationTable>,
    dispatcher: OutboundDispatcher,
}

impl RpcClient {
    /// Create a client whose replies come back on `reply_to`.
    ///
    /// `reply_to` must be the queue this process consumes, or replies will
    /// never reach `table`.
    #[must_use]
    pub fn new(
        reply_to: impl Into<String>,
        table: Arc<CorrelationTable>,
        dispatcher: OutboundDispatcher,
    ) -> Self {
        Self {
            reply_to: reply_to.into(),
            table,
            dispatcher,
        }
    }

    /// Queue replies are addressed to.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Send `operation` with `payload` to `destination` and wait for the reply.
    ///
    /// An `{ "error": ... }` reply is returned as [`CallError::Remote`]; any
    /// other reply payload is returned as is.
    ///
    /// # Errors
    ///
    /// - [`CallError::Timeout`] if the request could not be enqueued and
    ///   answered within `timeout`
    /// - [`CallError::Remote`] if the reply carries an error
    /// - [`CallError::Dispatch`] if the publish task has stopped
    #[tracing::instrument(
        name = "rpc_call",
        skip(self, payload),
        fields(correlation_id = tracing::field::Empty)
    )]
    pub async fn call(
        &self,
        destination: &str,
        operation: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, CallError> {
        let pending = self.table.register_new();
        let id = pending.id().clone();
        tracing::Span::current().record("correlation_id", tracing::field::display(&id));

        let envelope =
            OutboundEnvelope::with_id(id, operation, payload, self.reply_to.as_str());
        let started = Instant::now();
        // One bound covers enqueueing behind a stalled publisher and waiting.
        let deadline = time::Instant::now() + timeout;

        // On failure `pending` drops here and releases the entry.
        let enqueue = self.dispatcher.dispatch(destination, envelope);
        match time::timeout_at(deadline, enqueue).await {
            Ok(enqueued) => enqueued?,
            Err(_) => return Err(timed_out(operation, timeout)),
        }

        let remaining = deadline.saturating_duration_since(time::Instant::now());
        let reply = match pending.wait(remaining).await {
            Ok(reply) => reply,
            Err(WaitError::TimedOut(_)) => return Err(timed_out(operation, timeout)),
            Err(WaitError::Closed) => {
                return Err(CallError::ReplyDropped {
                    operation: operation.to_string(),
                });
            }
        };

        CallMetrics::record_completed(operation, started.elapsed());

        if let Some(message) = payload::error_message(&reply.message_data) {
            CallMetrics::record_remote_error(operation);
            tracing::debug!(error = %message, "Remote error reply");
            return Err(CallError::Remote(message.to_string()));
        }

        Ok(reply.message_data)
    }

    /// Typed variant of [`call`](Self::call): encodes `request` and decodes the reply.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`CallError::Decode`] if the reply does not
    /// match `Resp`.
    pub async fn call_typed<Req, Resp>(
        &self,
        destination: &str,
        operation: &str,
        request: Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: IntoPayload,
        Resp: FromPayload,
    {
        let reply = self
            .call(destination, operation, request.into_payload(), timeout)
            .await?;
        Ok(Resp::from_payload(&reply)?)
    }
}

fn timed_out(operation: &str, after: Duration) -> CallError {
    CallMetrics::record_timeout(operation);
    tracing::warn!(
        timeout_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        "Call timed out"
    );
    CallError::Timeout {
        operation: operation.to_string(),
        after,
    }
}
