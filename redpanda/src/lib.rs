//! Redpanda message broker for the onboarding RPC stack.
//!
//! This crate provides a Redpanda-based broker that implements the
//! [`MessageBroker`] trait from `onboarding-rpc-core`. It uses rdkafka for
//! Kafka-compatible messaging, so any Kafka-compatible cluster works.
//!
//! # Topology
//!
//! | Broker concept | Kafka mapping |
//! |---|---|
//! | service queue | topic named after the service |
//! | queue consumer | consumer group (default: the queue name) |
//! | ack / reject | manual offset commit |
//!
//! Every instance of a service joins the same consumer group, so requests are
//! load-balanced across instances. Replies are addressed to the service queue
//! too, which means a reply may be consumed by an instance other than the one
//! waiting for it; that instance logs it as an orphan and the caller times out.
//!
//! # Delivery Semantics
//!
//! Offsets are committed manually, once the consumer settles the delivery:
//! - [`Delivery::ack`] and [`Delivery::reject`] both commit; a rejected message
//!   is never seen again
//! - A delivery dropped without settlement is not committed and is redelivered
//!   after a restart or rebalance
//! - Deliveries are handed out one at a time; the next message is read only
//!   once the previous one is settled or dropped
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use onboarding_rpc_core::broker::MessageBroker;
//! use onboarding_rpc_redpanda::RedpandaBroker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::new("localhost:9092")?;
//!
//! broker.publish("employee-service", br#"{"id":"1","message_type":"ping"}"#).await?;
//!
//! let mut deliveries = broker.consume("onboarding-service").await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("Received {} bytes", delivery.body().len());
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use onboarding_rpc_core::broker::{
    AckHandle, BrokerError, Delivery, DeliveryStream, MessageBroker, Settlement,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "earliest";

/// Redpanda broker implementation.
///
/// Holds one producer shared by all publishes; every [`consume`](MessageBroker::consume)
/// creates its own consumer.
///
/// # Example
///
/// ```no_run
/// use onboarding_rpc_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let local = RedpandaBroker::new("localhost:9092")?;
///
/// let clustered = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .consumer_group("onboarding-service")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// `brokers` is the `bootstrap.servers` list, comma-separated.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers this broker connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for `queue`.
    #[must_use]
    pub fn consumer_group_for<'a>(&'a self, queue: &'a str) -> &'a str {
        self.consumer_group.as_deref().unwrap_or(queue)
    }

    fn create_consumer(&self, queue: &str, group: &str) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::ConsumeFailed {
                queue: queue.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer.subscribe(&[queue]).map_err(|e| BrokerError::ConsumeFailed {
            queue: queue.to_string(),
            reason: format!("Failed to subscribe to topic: {e}"),
        })?;

        Ok(consumer)
    }
}

/// Builder for configuring a [`RedpandaBroker`].
///
/// # Example
///
/// ```no_run
/// use onboarding_rpc_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("redpanda-0:9092")
///     .timeout(Duration::from_secs(2))
///     .auto_offset_reset("latest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Broker addresses, comma-separated.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer `acks` setting: "0", "1" or "all".
    ///
    /// Default: "all", so a published request survives a leader failover.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec for published messages: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a publish may wait for the cluster (`message.timeout.ms`).
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group used for every queue.
    ///
    /// If not set, each queue is consumed by a group named after the queue, so
    /// all instances of one service share its requests.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many deliveries may be buffered ahead of the consumer.
    ///
    /// Default: 1000. Zero is treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a consumer group with no committed offset starts reading:
    /// `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: "earliest", so requests sent before a service first starts are
    /// still answered.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no brokers were given or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let timeout_ms = timeout.as_millis().to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", &timeout_ms)
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        queue: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        let body = body.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&queue).payload(&body).key(queue.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %queue,
                        partition,
                        offset,
                        bytes = body.len(),
                        "Message produced"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => Err(BrokerError::PublishFailed {
                    queue,
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }

    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let group = self.consumer_group_for(&queue).to_string();
            let consumer = self.create_consumer(&queue, &group)?;

            tracing::info!(
                topic = %queue,
                consumer_group = %group,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, mut rx) = mpsc::channel(self.buffer_size);
            tokio::spawn(forward_deliveries(consumer, queue, tx));

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

/// Own `consumer`, forward each message as a [`Delivery`] and commit it once settled.
async fn forward_deliveries(
    consumer: StreamConsumer,
    queue: String,
    tx: mpsc::Sender<Result<Delivery, BrokerError>>,
) {
    use futures::StreamExt;
    use rdkafka::consumer::CommitMode;
    use rdkafka::message::Message;

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = BrokerError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        // A message without payload is forwarded empty; the consumer rejects it.
        let body = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let (settled_tx, settled_rx) = oneshot::channel();
        let ack = AckHandle::new(move |settlement| {
            settled_tx
                .send(settlement)
                .map_err(|_| BrokerError::AckFailed("Consumer task has stopped".to_string()))
        });

        if tx.send(Ok(Delivery::new(queue.as_str(), body, ack))).await.is_err() {
            tracing::debug!(topic = %queue, "Delivery receiver dropped, exiting consumer task");
            break;
        }

        let Ok(settlement) = settled_rx.await else {
            tracing::warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Delivery dropped without settlement, not committing"
            );
            continue;
        };

        if settlement == Settlement::Reject {
            tracing::debug!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Committing rejected message"
            );
        }

        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
            tracing::warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Offset commit failed; delivery will be seen again after a rebalance"
            );
        }
    }

    tracing::debug!(topic = %queue, "Consumer task exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn consumer_group_defaults_to_queue_name() {
        let broker = RedpandaBroker::new("localhost:9092").unwrap();
        assert_eq!(broker.consumer_group_for("onboarding-service"), "onboarding-service");

        let grouped = RedpandaBroker::builder()
            .brokers("localhost:9092")
            .consumer_group("onboarding-blue")
            .build()
            .unwrap();
        assert_eq!(grouped.consumer_group_for("onboarding-service"), "onboarding-blue");
    }
}
