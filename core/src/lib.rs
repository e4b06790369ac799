//! # Onboarding RPC Core
//!
//! Wire types and abstractions shared by every part of the onboarding RPC stack.
//!
//! The onboarding service talks to its sibling services (employee directory,
//! mail service, ...) over an asynchronous message broker. Calls look like
//! ordinary async functions to application code; underneath, every call is a
//! pair of JSON envelopes correlated by id.
//!
//! ## Modules
//!
//! - [`envelope`]: the outbound request and inbound reply/request wire shapes
//! - [`payload`]: field-level decoding of untyped `message_data` maps
//! - [`operations`]: operation names and the typed schema of each operation
//! - [`broker`]: the [`MessageBroker`](broker::MessageBroker) trait implemented by
//!   the Redpanda adapter and the in-memory test broker
//!
//! ## Example
//!
//! ```
//! use onboarding_rpc_core::envelope::{InboundEnvelope, OutboundEnvelope};
//! use onboarding_rpc_core::operations::{FIND_EMPLOYEE_BY_ID, ProfileLookup};
//! use onboarding_rpc_core::payload::IntoPayload;
//!
//! let lookup = ProfileLookup { employee_id: "emp-42".to_string() };
//! let request = OutboundEnvelope::new(FIND_EMPLOYEE_BY_ID, lookup.into_payload(), "onboarding-service");
//!
//! let bytes = request.to_vec().unwrap();
//! let decoded = InboundEnvelope::from_slice(&bytes).unwrap();
//! assert_eq!(decoded.id, request.id);
//! assert!(!decoded.is_reply());
//! ```

pub mod broker;
pub mod envelope;
pub mod operations;
pub mod payload;

pub use broker::{AckHandle, BrokerError, Delivery, DeliveryStream, MessageBroker, Settlement};
pub use envelope::{
    CorrelationId, EnvelopeError, InboundEnvelope, OutboundEnvelope, REPLY_MESSAGE_TYPE,
};
pub use payload::{FieldError, FromPayload, IntoPayload, Payload, PayloadReader};
