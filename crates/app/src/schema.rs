//! The payload-validation hook of §4.8.
//!
//! This crate does not ship schema *content* (out of scope, §1); it ships
//! the `PayloadSchema` trait application code implements, typically by
//! deserializing the payload into a `validator`-derived struct and calling
//! `Validate::validate` (`#[derive(Validate)]` + `#[validate(...)]` field
//! attributes).

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// A payload-schema validation failure (§4.8, §7 item 3).
#[derive(Debug, Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// Validates a message's `data` map before the user callback runs.
///
/// Implementations typically deserialize `data` into a
/// `#[derive(serde::Deserialize, validator::Validate)]` struct and call
/// `.validate()`, mapping any `validator::ValidationErrors` into one
/// [`ValidationError`].
pub trait PayloadSchema: Send + Sync {
    fn validate(&self, data: &Map<String, JsonValue>) -> Result<(), ValidationError>;
}

/// Adapts a `validator`-derived request type into a [`PayloadSchema`]:
/// deserialize `data` into `T`, then run `T`'s derived `Validate` impl.
/// Deserialization failure is itself reported as a validation error (the
/// payload doesn't even have the right shape).
pub struct DeserializeAndValidate<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for DeserializeAndValidate<T> {
    fn default() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> DeserializeAndValidate<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> PayloadSchema for DeserializeAndValidate<T>
where
    T: serde::de::DeserializeOwned + validator::Validate + Send + Sync,
{
    fn validate(&self, data: &Map<String, JsonValue>) -> Result<(), ValidationError> {
        let value = JsonValue::Object(data.clone());
        let parsed: T = serde_json::from_value(value)
            .map_err(|e| ValidationError(format!("payload does not match schema: {e}")))?;
        parsed
            .validate()
            .map_err(|e| ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use validator::Validate;

    #[derive(Debug, Deserialize, Validate)]
    struct Order {
        #[validate(length(min = 1, message = "sku must not be empty"))]
        sku: String,
        #[validate(range(min = 1, message = "quantity must be positive"))]
        quantity: i64,
    }

    #[test]
    fn valid_payload_passes() {
        let schema = DeserializeAndValidate::<Order>::new();
        let data = serde_json::json!({"sku": "WIDGET", "quantity": 3})
            .as_object()
            .unwrap()
            .clone();
        assert!(schema.validate(&data).is_ok());
    }

    #[test]
    fn invalid_payload_is_reported() {
        let schema = DeserializeAndValidate::<Order>::new();
        let data = serde_json::json!({"sku": "", "quantity": 0})
            .as_object()
            .unwrap()
            .clone();
        assert!(schema.validate(&data).is_err());
    }

    #[test]
    fn mismatched_shape_is_a_validation_error_not_a_panic() {
        let schema = DeserializeAndValidate::<Order>::new();
        let data = serde_json::json!({"unrelated": true}).as_object().unwrap().clone();
        assert!(schema.validate(&data).is_err());
    }
}
