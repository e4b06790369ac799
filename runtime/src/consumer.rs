//! Inbound consumer loop over the service's own queue.
//!
//! The loop alternates between two states: **Idle** (waiting for the next
//! delivery) and **Processing** (classifying one delivery). Processing never
//! awaits a handler; requests are handled on their own task so the loop goes
//! straight back to Idle and can keep delivering replies, including replies to
//! calls made by those very handlers.
//!
//! Per delivery:
//!
//! 1. Parse the body into an [`InboundEnvelope`]. Unparseable bodies are logged
//!    and rejected (discarded, never redelivered).
//! 2. Acknowledge.
//! 3. Offer the envelope to the [`CorrelationTable`]. If a call was waiting on
//!    its id, it was a reply and we are done.
//! 4. Otherwise a `"reply"` is an orphan (logged, dropped) and anything else is a
//!    request: dispatched through the [`DispatchTable`], answered through the
//!    [`ReplyEmitter`] to its `reply_to` under the same correlation id.
//!
//! Acknowledgement happens before handling: a crash between the two loses the
//! request, and the requester times out. Handlers are not required to be
//! idempotent.

use crate::correlation::{CorrelationTable, Undelivered};
use crate::dispatch::DispatchTable;
use crate::dispatcher::ReplyEmitter;
use crate::metrics::{ConsumerMetrics, CorrelationMetrics};
use futures::StreamExt;
use onboarding_rpc_core::broker::{BrokerError, Delivery, DeliveryStream, MessageBroker};
use onboarding_rpc_core::envelope::{InboundEnvelope, OutboundEnvelope};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Reader of one service queue.
pub struct InboundConsumer {
    broker: Arc<dyn MessageBroker>,
    queue: String,
    table: Arc<CorrelationTable>,
    dispatch: Arc<DispatchTable>,
    replies: ReplyEmitter,
}

impl InboundConsumer {
    /// Create a consumer for `queue`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        queue: impl Into<String>,
        table: Arc<CorrelationTable>,
        dispatch: Arc<DispatchTable>,
        replies: ReplyEmitter,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            table,
            dispatch,
            replies,
        }
    }

    /// Subscribe to the queue, then run the loop on a background task.
    ///
    /// Subscription failures surface here, before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConsumeFailed`] if the queue cannot be consumed.
    pub async fn start(self) -> Result<JoinHandle<()>, BrokerError> {
        let deliveries = self.broker.consume(&self.queue).await?;
        Ok(tokio::spawn(self.run_stream(deliveries)))
    }

    /// Subscribe to the queue and run the loop until the delivery stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConsumeFailed`] if the queue cannot be consumed.
    pub async fn run(self) -> Result<(), BrokerError> {
        let deliveries = self.broker.consume(&self.queue).await?;
        self.run_stream(deliveries).await;
        Ok(())
    }

    async fn run_stream(self, mut deliveries: DeliveryStream) {
        tracing::info!(queue = %self.queue, "Consumer loop started");

        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => self.process(delivery),
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "Failed to receive delivery");
                }
            }
        }

        tracing::info!(queue = %self.queue, "Consumer loop stopped: delivery stream ended");
    }

    fn process(&self, delivery: Delivery) {
        let envelope = match InboundEnvelope::from_slice(delivery.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                ConsumerMetrics::record_malformed();
                tracing::warn!(
                    queue = %self.queue,
                    bytes = delivery.body().len(),
                    error = %e,
                    "Discarding malformed message"
                );
                if let Err(e) = delivery.reject() {
                    tracing::warn!(
                        queue = %self.queue,
                        error = %e,
                        "Failed to reject malformed message"
                    );
                }
                return;
            }
        };

        if let Err(e) = delivery.ack() {
            tracing::warn!(
                correlation_id = %envelope.id,
                error = %e,
                "Failed to acknowledge message (it may be redelivered)"
            );
        }

        match self.table.deliver(envelope) {
            Ok(()) => {}
            Err(Undelivered::NoEntry(envelope)) if !envelope.is_reply() => {
                self.handle_request(envelope);
            }
            Err(undelivered) => {
                let envelope = undelivered.into_envelope();
                CorrelationMetrics::record_orphan();
                tracing::warn!(
                    correlation_id = %envelope.id,
                    message_type = %envelope.message_type,
                    "Dropping orphan reply: no call is waiting for it"
                );
            }
        }
    }

    fn handle_request(&self, envelope: InboundEnvelope) {
        let OutboundEnvelope {
            id,
            message_type,
            message_data,
            reply_to,
        } = match envelope.into_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping request with nowhere to reply");
                return;
            }
        };

        tracing::debug!(
            correlation_id = %id,
            operation = %message_type,
            reply_to = %reply_to,
            "Dispatching request"
        );

        let dispatch = Arc::clone(&self.dispatch);
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let payload = dispatch.dispatch(&message_type, message_data).await;
            ConsumerMetrics::record_dispatch(&message_type, started.elapsed());

            let reply = InboundEnvelope::reply(id, payload);
            let correlation_id = reply.id.clone();
            if let Err(e) = replies.emit(reply_to, reply).await {
                tracing::error!(
                    correlation_id = %correlation_id,
                    operation = %message_type,
                    error = %e,
                    "Failed to enqueue reply"
                );
            }
        });
    }
}
