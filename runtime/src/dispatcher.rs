//! Serialized publish path: the outbound dispatcher and the reply emitter.
//!
//! All broker writes go through one task. Callers and the consumer loop never
//! touch the broker directly; they enqueue a [`PublishIntent`] and the publish
//! task encodes and sends intents one at a time, in queue order.
//!
//! ```text
//! RpcClient ──dispatch()──┐
//!                         ├──► mpsc ──► publish task ──► MessageBroker::publish
//! consumer ───emit()──────┘
//! ```
//!
//! Publish failures are logged and counted, not retried. A caller whose request
//! was never published observes it as a timeout.

use crate::metrics::PublishMetrics;
use onboarding_rpc_core::broker::MessageBroker;
use onboarding_rpc_core::envelope::{
    CorrelationId, EnvelopeError, InboundEnvelope, OutboundEnvelope,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors when handing an intent to the publish task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The publish task has stopped.
    #[error("Publish dispatcher is closed")]
    Closed,
}

/// Something to publish.
#[derive(Debug, Clone)]
pub enum PublishIntent {
    /// A request to another service's queue
    Request {
        /// Target service queue
        destination: String,
        /// Request envelope
        envelope: OutboundEnvelope,
    },
    /// A reply to a requester's `reply_to` queue
    Reply {
        /// Requester's reply queue
        destination: String,
        /// Reply envelope
        envelope: InboundEnvelope,
    },
}

impl PublishIntent {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
        }
    }

    fn destination(&self) -> &str {
        match self {
            Self::Request { destination, .. } | Self::Reply { destination, .. } => destination,
        }
    }

    const fn id(&self) -> &CorrelationId {
        match self {
            Self::Request { envelope, .. } => &envelope.id,
            Self::Reply { envelope, .. } => &envelope.id,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Self::Request { envelope, .. } => envelope.to_vec(),
            Self::Reply { envelope, .. } => envelope.to_vec(),
        }
    }
}

/// Handle enqueueing outbound requests onto the publish task.
///
/// Cloning is cheap; all clones feed the same task. The task exits once every
/// handle (including [`ReplyEmitter`]s) is dropped and the queue is drained.
#[derive(Clone, Debug)]
pub struct OutboundDispatcher {
    sender: mpsc::Sender<PublishIntent>,
}

impl OutboundDispatcher {
    /// Start the publish task.
    ///
    /// `buffer` bounds the number of queued intents; enqueueing waits for room
    /// when it is full. A zero buffer is treated as one.
    #[must_use]
    pub fn spawn(broker: Arc<dyn MessageBroker>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(publish_loop(broker, receiver));
        (Self { sender }, task)
    }

    /// Enqueue a request for publication to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] if the publish task has stopped.
    pub async fn dispatch(
        &self,
        destination: impl Into<String>,
        envelope: OutboundEnvelope,
    ) -> Result<(), DispatchError> {
        self.sender
            .send(PublishIntent::Request {
                destination: destination.into(),
                envelope,
            })
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Reply emitter sharing this dispatcher's publish task.
    #[must_use]
    pub fn reply_emitter(&self) -> ReplyEmitter {
        ReplyEmitter {
            sender: self.sender.clone(),
        }
    }

    /// Whether the publish task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Handle enqueueing replies onto the publish task.
#[derive(Clone, Debug)]
pub struct ReplyEmitter {
    sender: mpsc::Sender<PublishIntent>,
}

impl ReplyEmitter {
    /// Enqueue `reply` for publication to the requester's `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] if the publish task has stopped.
    pub async fn emit(
        &self,
        destination: impl Into<String>,
        reply: InboundEnvelope,
    ) -> Result<(), DispatchError> {
        self.sender
            .send(PublishIntent::Reply {
                destination: destination.into(),
                envelope: reply,
            })
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

async fn publish_loop(broker: Arc<dyn MessageBroker>, mut receiver: mpsc::Receiver<PublishIntent>) {
    tracing::info!("Publish dispatcher started");

    while let Some(intent) = receiver.recv().await {
        publish_one(broker.as_ref(), &intent).await;
    }

    tracing::info!("Publish dispatcher stopped");
}

async fn publish_one(broker: &dyn MessageBroker, intent: &PublishIntent) {
    let kind = intent.kind();
    let destination = intent.destination();

    let body = match intent.encode() {
        Ok(body) => body,
        Err(e) => {
            PublishMetrics::record_error(kind);
            tracing::error!(
                correlation_id = %intent.id(),
                queue = %destination,
                kind,
                error = %e,
                "Failed to encode envelope, dropping"
            );
            return;
        }
    };

    match broker.publish(destination, &body).await {
        Ok(()) => {
            PublishMetrics::record_published(kind);
            tracing::debug!(
                correlation_id = %intent.id(),
                queue = %destination,
                kind,
                "Envelope published"
            );
        }
        Err(e) => {
            PublishMetrics::record_error(kind);
            tracing::error!(
                correlation_id = %intent.id(),
                queue = %destination,
                kind,
                error = %e,
                "Failed to publish envelope"
            );
        }
    }
}
