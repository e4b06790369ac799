//! One running participant: consumer loop, publish task and client wired together.

use crate::client::RpcClient;
use crate::consumer::InboundConsumer;
use crate::correlation::CorrelationTable;
use crate::dispatch::DispatchTable;
use crate::dispatcher::OutboundDispatcher;
use onboarding_rpc_core::broker::{BrokerError, MessageBroker};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A service attached to its queue.
///
/// Owns the consumer loop over `queue` and the single publish task. Every
/// [`RpcClient`] handed out shares the node's correlation table and addresses
/// replies to `queue`.
#[derive(Debug)]
pub struct RpcNode {
    queue: String,
    table: Arc<CorrelationTable>,
    dispatch: Arc<DispatchTable>,
    client: RpcClient,
    consumer: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

impl RpcNode {
    /// Start the publish task and the consumer loop for `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if `queue` cannot be consumed. Nothing is left
    /// running in that case.
    pub async fn start(
        broker: Arc<dyn MessageBroker>,
        queue: impl Into<String>,
        dispatch: DispatchTable,
        publish_buffer: usize,
    ) -> Result<Self, BrokerError> {
        Self::start_with(broker, queue, publish_buffer, |_| dispatch).await
    }

    /// Like [`start`](Self::start), building the dispatch table from the node's
    /// own client.
    ///
    /// Handlers that call other services capture the client they are given;
    /// their replies come back through this node's consumer loop.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if `queue` cannot be consumed.
    pub async fn start_with<F>(
        broker: Arc<dyn MessageBroker>,
        queue: impl Into<String>,
        publish_buffer: usize,
        build: F,
    ) -> Result<Self, BrokerError>
    where
        F: FnOnce(RpcClient) -> DispatchTable,
    {
        let queue = queue.into();
        let table = Arc::new(CorrelationTable::new());
        let (dispatcher, publisher) =
            OutboundDispatcher::spawn(Arc::clone(&broker), publish_buffer);
        let client = RpcClient::new(queue.clone(), Arc::clone(&table), dispatcher.clone());
        let dispatch = Arc::new(build(client.clone()));

        let consumer = InboundConsumer::new(
            broker,
            queue.clone(),
            Arc::clone(&table),
            Arc::clone(&dispatch),
            dispatcher.reply_emitter(),
        );
        let consumer = match consumer.start().await {
            Ok(handle) => handle,
            Err(e) => {
                publisher.abort();
                tracing::error!(queue = %queue, error = %e, "Failed to start consumer");
                return Err(e);
            }
        };

        tracing::info!(
            queue = %queue,
            operations = ?dispatch.operations(),
            "Node started"
        );

        Ok(Self {
            queue,
            table,
            dispatch,
            client,
            consumer,
            publisher,
        })
    }

    /// Queue this node consumes and receives replies on.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Client for outgoing calls.
    #[must_use]
    pub fn client(&self) -> RpcClient {
        self.client.clone()
    }

    /// Operations this node answers.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        self.dispatch.operations()
    }

    /// Number of outgoing calls waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.table.len()
    }

    /// Stop consuming, then let queued publishes drain for at most `grace`.
    ///
    /// Calls still waiting will time out on their own. Clients handed out keep
    /// the publish task alive until they are dropped or `grace` elapses.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!(queue = %self.queue, "Shutting down node");

        self.consumer.abort();
        let _ = self.consumer.await;

        // Handlers may hold clients too; all of them must go before the publish
        // task sees its queue close.
        drop(self.client);
        drop(self.dispatch);
        let mut publisher = self.publisher;
        if tokio::time::timeout(grace, &mut publisher).await.is_err() {
            tracing::warn!(queue = %self.queue, "Publish queue did not drain in time, aborting");
            publisher.abort();
        }

        tracing::info!(queue = %self.queue, "Node stopped");
    }
}
