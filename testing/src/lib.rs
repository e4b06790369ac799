//! # Onboarding RPC Testing
//!
//! Testing utilities for the onboarding RPC stack.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: an in-process [`MessageBroker`](onboarding_rpc_core::broker::MessageBroker)
//!   that records publishes and settlements
//! - [`fixtures`]: raw envelope bodies for driving a consumer directly
//! - [`init_tracing`]: log output for tests, filtered by `RUST_LOG`
//!
//! ## Example
//!
//! ```
//! use onboarding_rpc_core::broker::MessageBroker;
//! use onboarding_rpc_testing::{InMemoryBroker, fixtures};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! broker
//!     .publish("onboarding-service", &fixtures::reply("X", json!({ "result": "ok" })))
//!     .await?;
//! assert_eq!(broker.published_to("onboarding-service").len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod broker;

pub use broker::InMemoryBroker;

/// Raw envelope bodies, built without going through the typed envelope API.
pub mod fixtures {
    #![allow(clippy::expect_used)] // Serializing a `Value` cannot fail

    use onboarding_rpc_core::payload::Payload;
    use serde_json::{Value, json};

    /// Request body for `operation` with `reply_to`.
    #[must_use]
    pub fn request(id: &str, operation: &str, data: Value, reply_to: &str) -> Vec<u8> {
        encode(&json!({
            "id": id,
            "message_type": operation,
            "message_data": data,
            "reply_to": reply_to,
        }))
    }

    /// Reply body carrying `data`.
    #[must_use]
    pub fn reply(id: &str, data: Value) -> Vec<u8> {
        encode(&json!({
            "id": id,
            "message_type": "reply",
            "message_data": data,
        }))
    }

    /// Error reply body.
    #[must_use]
    pub fn error_reply(id: &str, message: &str) -> Vec<u8> {
        reply(id, json!({ "error": message }))
    }

    /// Convert a JSON object into a payload.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not an object.
    #[must_use]
    pub fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic_not_object(&other),
        }
    }

    #[allow(clippy::panic)]
    fn panic_not_object(value: &Value) -> ! {
        panic!("payload fixture must be a JSON object, got {value}")
    }

    #[allow(clippy::expect_used)]
    fn encode(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).expect("JSON values always serialize")
    }
}

/// Install a test log subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboarding_rpc_core::envelope::{InboundEnvelope, REPLY_MESSAGE_TYPE};
    use serde_json::json;

    #[test]
    fn fixtures_decode_as_envelopes() {
        let request = InboundEnvelope::from_slice(&fixtures::request(
            "r1",
            "send_mail",
            json!({ "to": "a@example.com" }),
            "hr-portal",
        ))
        .ok();
        let request = request.and_then(|envelope| envelope.into_request().ok());
        assert_eq!(request.map(|r| r.reply_to), Some("hr-portal".to_string()));

        let reply = InboundEnvelope::from_slice(&fixtures::error_reply("r1", "boom")).ok();
        assert_eq!(
            reply.as_ref().map(|r| r.message_type.as_str()),
            Some(REPLY_MESSAGE_TYPE)
        );
        assert_eq!(reply.as_ref().and_then(InboundEnvelope::error), Some("boom"));
    }
}
