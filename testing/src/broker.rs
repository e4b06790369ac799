//! In-memory message broker for fast, deterministic tests.
//!
//! Implements [`MessageBroker`] over per-queue channels and records everything
//! that happens so tests can assert on it:
//! - every body published to a queue, in order
//! - every settlement (ack/reject) made on a queue's deliveries
//!
//! Messages published before a consumer attaches are kept and delivered once
//! one does, like a durable queue.

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use futures::StreamExt;
use onboarding_rpc_core::broker::{
    AckHandle, BrokerError, Delivery, DeliveryStream, MessageBroker, Settlement,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

type Sender = mpsc::UnboundedSender<Result<Delivery, BrokerError>>;

#[derive(Default)]
struct QueueState {
    published: Vec<Vec<u8>>,
    backlog: VecDeque<Vec<u8>>,
    settlements: Vec<Settlement>,
    consumer: Option<Sender>,
}

impl QueueState {
    fn has_consumer(&self) -> bool {
        self.consumer.as_ref().is_some_and(|sender| !sender.is_closed())
    }
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    failing_publishes: Mutex<HashSet<String>>,
    failing_consumes: Mutex<HashSet<String>>,
    changed: Notify,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_settlement(&self, queue: &str, settlement: Settlement) {
        self.queues()
            .entry(queue.to_string())
            .or_default()
            .settlements
            .push(settlement);
        self.changed.notify_waiters();
    }
}

/// In-memory [`MessageBroker`].
///
/// Cheap to clone; clones share the same queues.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use onboarding_rpc_core::broker::MessageBroker;
/// use onboarding_rpc_testing::InMemoryBroker;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.publish("employee-service", b"{}").await?;
///
/// let mut deliveries = broker.consume("employee-service").await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.body(), b"{}");
/// delivery.ack()?;
///
/// assert_eq!(broker.acked("employee-service"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues: Vec<String> = self.inner.queues().keys().cloned().collect();
        f.debug_struct("InMemoryBroker").field("queues", &queues).finish()
    }
}

impl InMemoryBroker {
    /// Create a broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `queue` fail with [`BrokerError::PublishFailed`].
    pub fn fail_publishes_to(&self, queue: &str) {
        self.inner
            .failing_publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_string());
    }

    /// Make consuming `queue` fail with [`BrokerError::ConsumeFailed`].
    pub fn fail_consumes_from(&self, queue: &str) {
        self.inner
            .failing_consumes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_string());
    }

    /// Bodies successfully published to `queue`, in publish order.
    #[must_use]
    pub fn published_to(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues()
            .get(queue)
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Settlements made on deliveries from `queue`, in settlement order.
    #[must_use]
    pub fn settlements(&self, queue: &str) -> Vec<Settlement> {
        self.inner
            .queues()
            .get(queue)
            .map(|state| state.settlements.clone())
            .unwrap_or_default()
    }

    /// Number of deliveries from `queue` that were acknowledged.
    #[must_use]
    pub fn acked(&self, queue: &str) -> usize {
        self.count_settlements(queue, Settlement::Ack)
    }

    /// Number of deliveries from `queue` that were rejected.
    #[must_use]
    pub fn rejected(&self, queue: &str) -> usize {
        self.count_settlements(queue, Settlement::Reject)
    }

    fn count_settlements(&self, queue: &str, wanted: Settlement) -> usize {
        self.settlements(queue)
            .into_iter()
            .filter(|settlement| *settlement == wanted)
            .count()
    }

    /// Whether `queue` currently has an attached consumer.
    #[must_use]
    pub fn has_consumer(&self, queue: &str) -> bool {
        self.inner
            .queues()
            .get(queue)
            .is_some_and(QueueState::has_consumer)
    }

    /// End the delivery stream of `queue`'s consumer.
    pub fn close(&self, queue: &str) {
        if let Some(state) = self.inner.queues().get_mut(queue) {
            state.consumer = None;
        }
    }

    /// End every delivery stream.
    pub fn close_all(&self) {
        for state in self.inner.queues().values_mut() {
            state.consumer = None;
        }
    }

    /// Wait until at least `count` bodies were published to `queue`.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` elapses first.
    #[allow(clippy::panic)]
    pub async fn wait_for_published(
        &self,
        queue: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Vec<u8>> {
        let reached = self
            .wait_until(timeout, || {
                let published = self.published_to(queue);
                (published.len() >= count).then_some(published)
            })
            .await;
        match reached {
            Some(published) => published,
            None => panic!(
                "expected {count} messages on '{queue}' within {timeout:?}, got {}",
                self.published_to(queue).len()
            ),
        }
    }

    /// Wait until `queue` has an attached consumer.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` elapses first.
    #[allow(clippy::panic)]
    pub async fn wait_for_consumer(&self, queue: &str, timeout: Duration) {
        let attached = self
            .wait_until(timeout, || self.has_consumer(queue).then_some(()))
            .await;
        if attached.is_none() {
            panic!("no consumer attached to '{queue}' within {timeout:?}");
        }
    }

    async fn wait_until<T>(
        &self,
        timeout: Duration,
        mut check: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = check() {
                return Some(value);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return check();
            }
        }
    }

    fn attach(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let failing = self
            .inner
            .failing_consumes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(queue);
        if failing {
            return Err(BrokerError::ConsumeFailed {
                queue: queue.to_string(),
                reason: "consume failure injected by test".to_string(),
            });
        }

        let (sender, mut receiver) = mpsc::unbounded_channel();
        {
            let mut queues = self.inner.queues();
            let state = queues.entry(queue.to_string()).or_default();
            if state.has_consumer() {
                return Err(BrokerError::ConsumeFailed {
                    queue: queue.to_string(),
                    reason: "queue already has a consumer".to_string(),
                });
            }
            while let Some(body) = state.backlog.pop_front() {
                let _ = sender.send(Ok(self.delivery(queue, body)));
            }
            state.consumer = Some(sender);
        }
        self.inner.changed.notify_waiters();

        let stream = async_stream::stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        };
        Ok(stream.boxed())
    }

    fn delivery(&self, queue: &str, body: Vec<u8>) -> Delivery {
        let inner = Arc::clone(&self.inner);
        let settled_queue = queue.to_string();
        Delivery::new(
            queue,
            body,
            AckHandle::new(move |settlement| {
                inner.record_settlement(&settled_queue, settlement);
                Ok(())
            }),
        )
    }

    fn push(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let failing = self
            .inner
            .failing_publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(queue);
        if failing {
            return Err(BrokerError::PublishFailed {
                queue: queue.to_string(),
                reason: "publish failure injected by test".to_string(),
            });
        }

        {
            let mut queues = self.inner.queues();
            let state = queues.entry(queue.to_string()).or_default();
            state.published.push(body.to_vec());

            let body = body.to_vec();
            match state.consumer.as_ref() {
                Some(sender) if !sender.is_closed() => {
                    let _ = sender.send(Ok(self.delivery(queue, body)));
                }
                _ => state.backlog.push_back(body),
            }
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        queue: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let result = self.push(queue, body);
        Box::pin(async move { result })
    }

    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let result = self.attach(queue);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_is_delivered_when_consumer_attaches() {
        let broker = InMemoryBroker::new();
        broker.publish("q", b"one").await.unwrap();
        broker.publish("q", b"two").await.unwrap();

        let mut deliveries = broker.consume("q").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        let second = deliveries.next().await.unwrap().unwrap();

        assert_eq!(first.body(), b"one");
        assert_eq!(second.body(), b"two");
        first.ack().unwrap();
        second.reject().unwrap();
        assert_eq!(broker.settlements("q"), vec![Settlement::Ack, Settlement::Reject]);
    }

    #[tokio::test]
    async fn second_consumer_is_refused_until_first_closes() {
        let broker = InMemoryBroker::new();
        let first = broker.consume("q").await.unwrap();

        assert!(matches!(
            broker.consume("q").await,
            Err(BrokerError::ConsumeFailed { .. })
        ));

        drop(first);
        assert!(broker.consume("q").await.is_ok());
    }

    #[tokio::test]
    async fn close_ends_stream() {
        let broker = InMemoryBroker::new();
        let mut deliveries = broker.consume("q").await.unwrap();
        broker.close("q");
        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_publish_failure_records_nothing() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to("q");

        let result = broker.publish("q", b"lost").await;

        assert!(matches!(result, Err(BrokerError::PublishFailed { .. })));
        assert!(broker.published_to("q").is_empty());
    }

    #[tokio::test]
    async fn wait_for_published_sees_later_publish() {
        let broker = InMemoryBroker::new();
        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish("q", b"late").await.unwrap();
        });

        let published = broker.wait_for_published("q", 1, Duration::from_secs(5)).await;
        assert_eq!(published, vec![b"late".to_vec()]);
    }
}
