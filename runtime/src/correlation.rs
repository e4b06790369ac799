//! Correlation table: pending calls keyed by correlation id.
//!
//! Every outgoing call registers a single-use reply channel here before its
//! request is published. The consumer loop hands replies to [`CorrelationTable::deliver`],
//! which removes the entry and forwards the envelope to the waiting caller.
//!
//! # Invariants
//!
//! - At most one entry per correlation id; a duplicate registration is rejected,
//!   never overwritten.
//! - At most one reply reaches a caller: `deliver` removes the entry before sending.
//! - Entries never outlive their caller: [`PendingReply`] releases its entry when
//!   dropped, which covers success, timeout, cancellation and error paths alike.
//!
//! # Example
//!
//! ```
//! use onboarding_rpc_core::envelope::InboundEnvelope;
//! use onboarding_rpc_core::payload::Payload;
//! use onboarding_rpc_runtime::correlation::CorrelationTable;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let table = Arc::new(CorrelationTable::new());
//! let pending = table.register_new();
//! let id = pending.id().clone();
//!
//! table.deliver(InboundEnvelope::reply(id.clone(), Payload::new())).ok();
//! let reply = pending.wait(Duration::from_secs(5)).await?;
//! assert_eq!(reply.id, id);
//! assert!(!table.contains(&id));
//! # Ok(())
//! # }
//! ```

use crate::metrics::CorrelationMetrics;
use onboarding_rpc_core::envelope::{CorrelationId, InboundEnvelope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Registration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// The id already has an outstanding call.
    #[error("Correlation id {0} is already registered")]
    Duplicate(CorrelationId),
}

/// Errors while waiting for a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No reply arrived within the bound.
    #[error("No reply within {0:?}")]
    TimedOut(Duration),

    /// The reply channel closed without a reply.
    #[error("Reply channel closed")]
    Closed,
}

/// A reply that could not be handed to a caller.
#[derive(Debug)]
pub enum Undelivered {
    /// No call is waiting on this id (unknown, late, or already released).
    NoEntry(InboundEnvelope),
    /// The entry existed but its caller stopped waiting before the send.
    CallerGone(InboundEnvelope),
}

impl Undelivered {
    /// Recover the envelope.
    #[must_use]
    pub fn into_envelope(self) -> InboundEnvelope {
        match self {
            Self::NoEntry(envelope) | Self::CallerGone(envelope) => envelope,
        }
    }
}

/// Process-wide registry of calls awaiting a reply.
///
/// Only `register`, `deliver` and `release` mutate the table; the map itself is
/// never exposed.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<InboundEnvelope>>>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<InboundEnvelope>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a reply channel under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Duplicate`] if `id` already has an outstanding
    /// call; the existing entry is left untouched.
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> Result<PendingReply, CorrelationError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = self.lock();
            if pending.contains_key(&id) {
                return Err(CorrelationError::Duplicate(id));
            }
            pending.insert(id.clone(), sender);
            CorrelationMetrics::record_pending(pending.len());
        }

        tracing::trace!(correlation_id = %id, "Registered pending call");

        Ok(PendingReply {
            id,
            receiver,
            table: Arc::clone(self),
        })
    }

    /// Register a reply channel under a freshly generated id.
    #[must_use]
    pub fn register_new(self: &Arc<Self>) -> PendingReply {
        loop {
            match self.register(CorrelationId::generate()) {
                Ok(pending) => return pending,
                Err(CorrelationError::Duplicate(id)) => {
                    tracing::warn!(
                        correlation_id = %id,
                        "Generated correlation id collided, regenerating"
                    );
                }
            }
        }
    }

    /// Hand `envelope` to the call waiting on `envelope.id`, consuming the entry.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Undelivered`] with the envelope if no caller received it.
    pub fn deliver(&self, envelope: InboundEnvelope) -> Result<(), Undelivered> {
        let sender = {
            let mut pending = self.lock();
            let sender = pending.remove(&envelope.id);
            CorrelationMetrics::record_pending(pending.len());
            sender
        };

        let Some(sender) = sender else {
            return Err(Undelivered::NoEntry(envelope));
        };

        let id = envelope.id.clone();
        sender.send(envelope).map_err(Undelivered::CallerGone)?;
        tracing::trace!(correlation_id = %id, "Delivered reply");
        Ok(())
    }

    /// Remove the entry for `id`, whether or not a reply arrived.
    ///
    /// Returns `true` if an entry was removed.
    pub fn release(&self, id: &CorrelationId) -> bool {
        let mut pending = self.lock();
        let removed = pending.remove(id).is_some();
        CorrelationMetrics::record_pending(pending.len());
        removed
    }

    /// Whether a call is waiting on `id`.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of calls waiting for a reply.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no call is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving side of a registered call.
///
/// Dropping it releases the table entry.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    receiver: oneshot::Receiver<InboundEnvelope>,
    table: Arc<CorrelationTable>,
}

impl PendingReply {
    /// Correlation id this reply is registered under.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the reply, at most `timeout`.
    ///
    /// The entry is released when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`WaitError::TimedOut`] if nothing arrived in time
    /// - [`WaitError::Closed`] if the entry was released by someone else
    pub async fn wait(mut self, timeout: Duration) -> Result<InboundEnvelope, WaitError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => {
                tracing::debug!(
                    correlation_id = %self.id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Timed out waiting for reply"
                );
                Err(WaitError::TimedOut(timeout))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.table.release(&self.id) {
            tracing::debug!(correlation_id = %self.id, "Released pending call without reply");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use onboarding_rpc_core::payload::Payload;
    use serde_json::json;
    use std::collections::HashSet;

    fn reply(id: &CorrelationId, data: serde_json::Value) -> InboundEnvelope {
        InboundEnvelope::reply(id.clone(), serde_json::from_value(data).unwrap())
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let table = Arc::new(CorrelationTable::new());
        let id = CorrelationId::from("dup");

        let first = table.register(id.clone()).unwrap();
        let second = table.register(id.clone());

        assert_eq!(second.unwrap_err(), CorrelationError::Duplicate(id.clone()));
        assert!(table.contains(&id));
        assert_eq!(table.len(), 1);
        drop(first);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn reply_is_delivered_once_and_entry_removed() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register("X".into()).unwrap();
        let id = pending.id().clone();

        table.deliver(reply(&id, json!({ "result": "ok" }))).unwrap();
        assert!(!table.contains(&id));

        let second = table.deliver(reply(&id, json!({ "result": "late" })));
        assert!(matches!(second, Err(Undelivered::NoEntry(_))));

        let received = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.message_data.get("result"), Some(&json!("ok")));
    }

    #[tokio::test]
    async fn waiter_is_woken_by_delivery() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register("W".into()).unwrap();
        let id = pending.id().clone();
        let mut wait = tokio_test::task::spawn(pending.wait(Duration::from_secs(5)));

        tokio_test::assert_pending!(wait.poll());
        table.deliver(reply(&id, json!({ "result": "ok" }))).unwrap();

        assert!(wait.is_woken());
        let received = tokio_test::assert_ready_ok!(wait.poll());
        assert_eq!(received.message_data.get("result"), Some(&json!("ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_entry() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register("Y".into()).unwrap();
        let id = pending.id().clone();

        let result = pending.wait(Duration::from_millis(250)).await;

        assert_eq!(result.unwrap_err(), WaitError::TimedOut(Duration::from_millis(250)));
        assert!(!table.contains(&id));
        assert!(matches!(
            table.deliver(reply(&id, json!({}))),
            Err(Undelivered::NoEntry(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_wait_releases_entry() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register_new();
        let id = pending.id().clone();

        let waiter = tokio::spawn(pending.wait(Duration::from_secs(3600)));
        tokio::task::yield_now().await;
        assert!(table.contains(&id));

        waiter.abort();
        let _ = waiter.await;
        assert!(!table.contains(&id));
    }

    #[tokio::test]
    async fn explicit_release_closes_waiter() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register_new();
        let id = pending.id().clone();

        assert!(table.release(&id));
        assert!(!table.release(&id));
        assert_eq!(
            pending.wait(Duration::from_secs(1)).await.unwrap_err(),
            WaitError::Closed
        );
    }

    #[test]
    fn delivery_to_dropped_receiver_is_caller_gone() {
        let table = Arc::new(CorrelationTable::new());
        let (sender, receiver) = oneshot::channel();
        drop(receiver);
        table.lock().insert("gone".into(), sender);

        let outcome = table.deliver(InboundEnvelope::reply("gone".into(), Payload::new()));
        let Err(Undelivered::CallerGone(envelope)) = outcome else {
            panic!("expected CallerGone");
        };
        assert_eq!(envelope.id, CorrelationId::from("gone"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn concurrent_registrations_get_distinct_ids() {
        let table = Arc::new(CorrelationTable::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let table = Arc::clone(&table);
                tokio::spawn(async move { table.register_new() })
            })
            .collect();

        let mut pendings = Vec::new();
        for handle in handles {
            pendings.push(handle.await.unwrap());
        }

        let ids: HashSet<_> = pendings.iter().map(|p| p.id().clone()).collect();
        assert_eq!(ids.len(), 64);
        assert_eq!(table.len(), 64);

        drop(pendings);
        assert!(table.is_empty());
    }
}
