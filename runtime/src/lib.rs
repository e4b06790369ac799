//! # Onboarding RPC Runtime
//!
//! Request/reply correlation engine for services talking over a message broker.
//!
//! ## Core Components
//!
//! - **Correlation table** ([`correlation`]): pending calls keyed by id, each with
//!   a single-use reply channel
//! - **Outbound dispatcher** ([`dispatcher`]): the one task that writes to the
//!   broker, fed by callers and by the reply emitter
//! - **Consumer loop** ([`consumer`]): reads the service queue, routes replies to
//!   waiting calls and requests to the dispatch table
//! - **Dispatch table** ([`dispatch`]): operation name to typed local handler
//! - **Client** ([`client`]): bounded, correlated calls to other services
//! - **Node** ([`node`]): all of the above wired for one service queue
//!
//! ## Example
//!
//! ```no_run
//! use onboarding_rpc_core::broker::MessageBroker;
//! use onboarding_rpc_core::operations::{KanbanProgress, KanbanProgressRequest};
//! use onboarding_rpc_runtime::{DispatchTable, RpcNode};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(broker: Arc<dyn MessageBroker>) -> Result<(), Box<dyn std::error::Error>> {
//! let table = DispatchTable::new().route("count_kanban_progress", |_: KanbanProgressRequest| async {
//!     Ok::<_, String>(KanbanProgress::default())
//! });
//!
//! let node = RpcNode::start(broker, "onboarding-service", table, 1024).await?;
//! let reply = node
//!     .client()
//!     .call("employee-service", "find_employee_by_id", Default::default(), Duration::from_secs(5))
//!     .await?;
//! println!("{reply:?}");
//!
//! node.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod consumer;
pub mod correlation;
pub mod dispatch;
pub mod dispatcher;
pub mod metrics;
pub mod node;

pub use client::{CallError, RpcClient};
pub use consumer::InboundConsumer;
pub use correlation::{CorrelationError, CorrelationTable, PendingReply, Undelivered, WaitError};
pub use dispatch::{DispatchTable, HandlerError, HandlerFuture, RequestHandler};
pub use dispatcher::{DispatchError, OutboundDispatcher, PublishIntent, ReplyEmitter};
pub use node::RpcNode;
