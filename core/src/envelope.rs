//! Wire envelopes exchanged over the broker.
//!
//! Two shapes travel on the wire:
//!
//! ```text
//! outbound request  { "id", "message_type": "<operation>", "message_data": {..}, "reply_to": "<queue>" }
//! inbound reply     { "id", "message_type": "reply",       "message_data": {..} }
//! ```
//!
//! The wire format does not distinguish a reply from a request structurally:
//! only `message_type` does. Every delivery is therefore parsed into an
//! [`InboundEnvelope`] (with an optional `reply_to`) and classified afterwards.
//! A request arriving from another service is that service's
//! [`OutboundEnvelope`]; [`InboundEnvelope::into_request`] recovers it.

use crate::payload::{self, Payload};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Reserved `message_type` marking a reply envelope.
///
/// The request dispatch table never routes this value.
pub const REPLY_MESSAGE_TYPE: &str = "reply";

/// Errors raised while encoding or classifying envelopes (protocol errors).
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The delivered bytes are not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    /// A request envelope arrived without a reply destination.
    #[error("Request {id} ('{message_type}') has no reply_to")]
    MissingReplyTo {
        /// Correlation id of the request
        id: CorrelationId,
        /// Operation the request asked for
        message_type: String,
    },
}

/// Correlation identifier linking a request to its reply.
///
/// Locally generated ids are UUID v4 strings. Ids received from other services
/// are kept verbatim, whatever their format.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, globally unique id (128-bit random).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Request published to another service's queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Correlation id, fixed for the lifetime of the call
    pub id: CorrelationId,
    /// Operation requested from the remote service
    pub message_type: String,
    /// Operation-specific fields
    #[serde(default)]
    pub message_data: Payload,
    /// Queue the responder must publish its reply to
    pub reply_to: String,
}

impl OutboundEnvelope {
    /// Build a request with a freshly generated correlation id.
    #[must_use]
    pub fn new(
        message_type: impl Into<String>,
        message_data: Payload,
        reply_to: impl Into<String>,
    ) -> Self {
        Self::with_id(CorrelationId::generate(), message_type, message_data, reply_to)
    }

    /// Build a request under an already registered correlation id.
    #[must_use]
    pub fn with_id(
        id: CorrelationId,
        message_type: impl Into<String>,
        message_data: Payload,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            id,
            message_type: message_type.into(),
            message_data,
            reply_to: reply_to.into(),
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }
}

/// Envelope as received from the broker: either a reply or a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Correlation id
    pub id: CorrelationId,
    /// `"reply"` for replies, otherwise the requested operation
    pub message_type: String,
    /// Result fields, a single `error` field, or request input fields
    #[serde(default)]
    pub message_data: Payload,
    /// Reply destination, present on requests only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl InboundEnvelope {
    /// Build a reply echoing `id`.
    #[must_use]
    pub fn reply(id: CorrelationId, message_data: Payload) -> Self {
        Self {
            id,
            message_type: REPLY_MESSAGE_TYPE.to_string(),
            message_data,
            reply_to: None,
        }
    }

    /// Build an error reply `{ "error": message }` echoing `id`.
    #[must_use]
    pub fn error_reply(id: CorrelationId, message: impl Into<String>) -> Self {
        Self::reply(id, payload::error_payload(message))
    }

    /// Parse an envelope from raw delivery bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not a JSON object with
    /// at least `id` and `message_type`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Whether this envelope carries the reserved reply tag.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.message_type == REPLY_MESSAGE_TYPE
    }

    /// The `error` message of a reply, if it failed remotely.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        payload::error_message(&self.message_data)
    }

    /// Reinterpret this envelope as another service's request.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingReplyTo`] when there is nowhere to reply to.
    pub fn into_request(self) -> Result<OutboundEnvelope, EnvelopeError> {
        match self.reply_to {
            Some(reply_to) if !reply_to.is_empty() => Ok(OutboundEnvelope {
                id: self.id,
                message_type: self.message_type,
                message_data: self.message_data,
                reply_to,
            }),
            _ => Err(EnvelopeError::MissingReplyTo {
                id: self.id,
                message_type: self.message_type,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_distinct() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn outbound_uses_wire_field_names() {
        let mut data = Payload::new();
        data.insert("employee_id".to_string(), json!("emp-1"));
        let envelope = OutboundEnvelope::with_id(
            "abc".into(),
            "find_employee_by_id",
            data,
            "onboarding-service",
        );

        let value: serde_json::Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "abc",
                "message_type": "find_employee_by_id",
                "message_data": { "employee_id": "emp-1" },
                "reply_to": "onboarding-service",
            })
        );
    }

    #[test]
    fn reply_omits_reply_to() {
        let reply = InboundEnvelope::reply("abc".into(), Payload::new());
        let value: serde_json::Value = serde_json::from_slice(&reply.to_vec().unwrap()).unwrap();
        assert_eq!(value, json!({ "id": "abc", "message_type": "reply", "message_data": {} }));
    }

    #[test]
    fn inbound_parses_requests_and_replies_alike() {
        let request = br#"{"id":"r1","message_type":"send_mail","message_data":{"to":"a@b.c"},"reply_to":"mail-client"}"#;
        let reply = br#"{"id":"r2","message_type":"reply","message_data":{"result":"ok"}}"#;

        let request = InboundEnvelope::from_slice(request).unwrap();
        let reply = InboundEnvelope::from_slice(reply).unwrap();

        assert!(!request.is_reply());
        assert!(reply.is_reply());
        assert_eq!(request.reply_to.as_deref(), Some("mail-client"));
        assert!(reply.reply_to.is_none());
    }

    #[test]
    fn missing_message_data_defaults_to_empty() {
        let envelope =
            InboundEnvelope::from_slice(br#"{"id":"x","message_type":"reply"}"#).unwrap();
        assert!(envelope.message_data.is_empty());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = InboundEnvelope::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));

        let err = InboundEnvelope::from_slice(br#"{"message_type":"reply"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn into_request_requires_reply_to() {
        let envelope = InboundEnvelope {
            id: "r1".into(),
            message_type: "send_mail".to_string(),
            message_data: Payload::new(),
            reply_to: None,
        };
        assert!(matches!(
            envelope.into_request(),
            Err(EnvelopeError::MissingReplyTo { .. })
        ));

        let envelope = InboundEnvelope {
            id: "r2".into(),
            message_type: "send_mail".to_string(),
            message_data: Payload::new(),
            reply_to: Some("hr-portal".to_string()),
        };
        let request = envelope.into_request().unwrap();
        assert_eq!(request.reply_to, "hr-portal");
        assert_eq!(request.id, CorrelationId::from("r2"));
    }

    #[test]
    fn error_reply_exposes_message() {
        let reply = InboundEnvelope::error_reply("e1".into(), "employee not found");
        assert_eq!(reply.error(), Some("employee not found"));
        assert!(InboundEnvelope::reply("e2".into(), Payload::new()).error().is_none());
    }
}
