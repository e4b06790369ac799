//! Field-level decoding of `message_data` maps.
//!
//! Payloads cross a service boundary with no schema enforcement, so every field
//! is checked for presence and type before use. Decoding never panics: a bad
//! field surfaces as a [`FieldError`], which the dispatch table turns into an
//! `{ "error": "missing '<field>'" }` reply and the typed callers turn into a
//! decode failure.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

/// Untyped `message_data` map.
pub type Payload = Map<String, Value>;

/// Key carrying the failure message in an error reply.
pub const ERROR_FIELD: &str = "error";

/// A required field is absent or has the wrong shape.
///
/// Both variants render as `missing '<field>'`, which is the message put on the
/// wire; the expected type is kept for logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Field not present (or `null`)
    #[error("missing '{field}'")]
    Missing {
        /// Field name
        field: String,
    },

    /// Field present with an unexpected JSON type or format
    #[error("missing '{field}'")]
    WrongType {
        /// Field name
        field: String,
        /// What the decoder expected, e.g. `"string"`
        expected: &'static str,
    },
}

impl FieldError {
    /// Name of the offending field.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field } | Self::WrongType { field, .. } => field,
        }
    }

    fn missing(field: &str) -> Self {
        Self::Missing {
            field: field.to_string(),
        }
    }

    fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

/// Build an error payload `{ "error": message }`.
#[must_use]
pub fn error_payload(message: impl Into<String>) -> Payload {
    let mut payload = Payload::new();
    payload.insert(ERROR_FIELD.to_string(), Value::String(message.into()));
    payload
}

/// Extract the `error` message of a payload, if any.
///
/// A non-string `error` value still counts as a failure; it is rendered as JSON.
#[must_use]
pub fn error_message(payload: &Payload) -> Option<&str> {
    match payload.get(ERROR_FIELD)? {
        Value::String(message) => Some(message),
        Value::Null => None,
        _ => Some("remote error"),
    }
}

/// Decode a typed schema from a payload.
pub trait FromPayload: Sized {
    /// Decode, validating every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] encountered.
    fn from_payload(payload: &Payload) -> Result<Self, FieldError>;
}

/// Encode a typed schema into a payload.
pub trait IntoPayload {
    /// Encode into `message_data`.
    fn into_payload(self) -> Payload;
}

impl FromPayload for Payload {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        Ok(payload.clone())
    }
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Payload {
        self
    }
}

/// Checked accessor over a payload.
///
/// # Example
///
/// ```
/// use onboarding_rpc_core::payload::{Payload, PayloadReader};
/// use serde_json::json;
///
/// let payload: Payload = serde_json::from_value(json!({ "to": "new.hire@example.com" })).unwrap();
/// let reader = PayloadReader::new(&payload);
///
/// assert_eq!(reader.string("to").unwrap(), "new.hire@example.com");
/// assert_eq!(reader.string("subject").unwrap_err().to_string(), "missing 'subject'");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    payload: &'a Payload,
}

impl<'a> PayloadReader<'a> {
    /// Wrap a payload.
    #[must_use]
    pub const fn new(payload: &'a Payload) -> Self {
        Self { payload }
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.payload.get(field).filter(|value| !value.is_null())
    }

    /// Required string field.
    ///
    /// # Errors
    ///
    /// [`FieldError`] if absent or not a string.
    pub fn string(&self, field: &str) -> Result<String, FieldError> {
        self.optional_string(field)?
            .ok_or_else(|| FieldError::missing(field))
    }

    /// Optional string field; absent and `null` both yield `None`.
    ///
    /// # Errors
    ///
    /// [`FieldError::WrongType`] if present but not a string.
    pub fn optional_string(&self, field: &str) -> Result<Option<String>, FieldError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(FieldError::wrong_type(field, "string")),
        }
    }

    /// Required non-negative integer field.
    ///
    /// # Errors
    ///
    /// [`FieldError`] if absent or not an unsigned integer.
    pub fn u64(&self, field: &str) -> Result<u64, FieldError> {
        let value = self.present(field).ok_or_else(|| FieldError::missing(field))?;
        value
            .as_u64()
            .ok_or_else(|| FieldError::wrong_type(field, "unsigned integer"))
    }

    /// Required `YYYY-MM-DD` date field.
    ///
    /// # Errors
    ///
    /// [`FieldError`] if absent, not a string, or not a valid calendar date.
    pub fn date(&self, field: &str) -> Result<NaiveDate, FieldError> {
        let raw = self.string(field)?;
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| FieldError::wrong_type(field, "date (YYYY-MM-DD)"))
    }

    /// Required list of strings.
    ///
    /// # Errors
    ///
    /// [`FieldError`] if absent, not an array, or an element is not a string.
    pub fn string_list(&self, field: &str) -> Result<Vec<String>, FieldError> {
        let items = match self.present(field) {
            None => return Err(FieldError::missing(field)),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(FieldError::wrong_type(field, "array of strings")),
        };
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| FieldError::wrong_type(field, "array of strings"))
            })
            .collect()
    }
}
