//! Message broker abstraction.
//!
//! This module provides the [`MessageBroker`] trait: publish raw bytes to a named
//! queue, and consume a queue as a stream of [`Delivery`] values that must be
//! acknowledged explicitly.
//!
//! # Topology
//!
//! ```text
//! ┌────────────────────┐  find_employee_by_id   ┌────────────────────┐
//! │ onboarding-service │ ─────────────────────► │  employee-service  │
//! │       queue        │ ◄───────────────────── │       queue        │
//! └────────────────────┘        reply           └────────────────────┘
//! ```
//!
//! - Each service owns a durable queue named after itself
//! - Requests are published to the target service's queue
//! - Replies are published to the `reply_to` queue named by the caller
//!
//! # Acknowledgement
//!
//! Deliveries are acknowledged manually. A delivery is either [`Delivery::ack`]ed
//! (processed) or [`Delivery::reject`]ed (discarded without requeue, used for
//! messages that can never be parsed). Dropping a delivery without settling it
//! leaves it unacknowledged; brokers may redeliver it after a restart.
//!
//! # Implementations
//!
//! - `RedpandaBroker` (`onboarding-rpc-redpanda`) - Kafka-compatible, production
//! - `InMemoryBroker` (`onboarding-rpc-testing`) - in-process, for tests

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations (transport errors).
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish to a queue
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// Destination queue
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start consuming a queue
    #[error("Consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// Queue being consumed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to settle (ack/reject) a delivery
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Settlement decision for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; do not redeliver
    Ack,
    /// Unprocessable; discard without requeue
    Reject,
}

/// Callback settling one delivery with the broker.
pub type AckFn = Box<dyn FnOnce(Settlement) -> Result<(), BrokerError> + Send>;

/// Handle used to settle a single delivery exactly once.
pub struct AckHandle {
    settle: AckFn,
}

impl AckHandle {
    /// Wrap a broker-specific settlement callback.
    #[must_use]
    pub fn new(
        settle: impl FnOnce(Settlement) -> Result<(), BrokerError> + Send + 'static,
    ) -> Self {
        Self {
            settle: Box::new(settle),
        }
    }

    /// A handle that settles nothing (for brokers without acknowledgements).
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| Ok(()))
    }

    fn settle(self, settlement: Settlement) -> Result<(), BrokerError> {
        (self.settle)(settlement)
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle").finish_non_exhaustive()
    }
}

/// A message delivered from a queue, awaiting settlement.
#[derive(Debug)]
pub struct Delivery {
    queue: String,
    body: Vec<u8>,
    ack: AckHandle,
}

impl Delivery {
    /// Create a delivery.
    #[must_use]
    pub fn new(queue: impl Into<String>, body: Vec<u8>, ack: AckHandle) -> Self {
        Self {
            queue: queue.into(),
            body,
            ack,
        }
    }

    /// Queue the message was consumed from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Raw message body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledge: the message was received and will be handled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the acknowledgement.
    pub fn ack(self) -> Result<(), BrokerError> {
        self.ack.settle(Settlement::Ack)
    }

    /// Reject: the message is discarded and must not be redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the settlement.
    pub fn reject(self) -> Result<(), BrokerError> {
        self.ack.settle(Settlement::Reject)
    }
}

/// Stream of deliveries from a consumed queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for message broker implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn MessageBroker>` between the publish task and
/// the consumer task.
pub trait MessageBroker: Send + Sync {
    /// Publish `body` to `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not accept the message.
    fn publish(
        &self,
        queue: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Start consuming `queue`.
    ///
    /// The stream ends when the broker connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConsumeFailed`] if the subscription cannot be set up.
    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;
}
