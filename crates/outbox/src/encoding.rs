//! Payload encoding for staged messages (§4.2).
//!
//! The outbox accepts a mapping of JSON scalars plus two extensions:
//! timestamps become ISO-8601 strings and UUIDs become their canonical
//! hex-with-dashes form. Anything else (an array, a nested object, a float
//! `NaN`) is a type error at insert time, not a silently-lossy write.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::OutboxError;

/// A value a staged message's `data` map may hold.
///
/// Closed on purpose: the accepted set is "whatever JSON can represent,
/// plus timestamps and UUIDs", and everything else is a type error.
/// Modeling that as a Rust enum makes the accepted set explicit at the
/// type level instead of discovering it from a runtime error.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl From<bool> for StagedValue {
    fn from(v: bool) -> Self {
        StagedValue::Bool(v)
    }
}

impl From<i64> for StagedValue {
    fn from(v: i64) -> Self {
        StagedValue::Int(v)
    }
}

impl From<f64> for StagedValue {
    fn from(v: f64) -> Self {
        StagedValue::Float(v)
    }
}

impl From<String> for StagedValue {
    fn from(v: String) -> Self {
        StagedValue::Str(v)
    }
}

impl From<&str> for StagedValue {
    fn from(v: &str) -> Self {
        StagedValue::Str(v.to_string())
    }
}

impl From<DateTime<Utc>> for StagedValue {
    fn from(v: DateTime<Utc>) -> Self {
        StagedValue::Timestamp(v)
    }
}

impl From<Uuid> for StagedValue {
    fn from(v: Uuid) -> Self {
        StagedValue::Uuid(v)
    }
}

/// Accept a raw `serde_json::Value` scalar, the path taken when a payload
/// arrives already JSON-encoded (e.g. deserialized off an HTTP request).
/// Arrays and objects are rejected: the wire contract is a flat scalar map.
impl TryFrom<JsonValue> for StagedValue {
    type Error = OutboxError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Null => Ok(StagedValue::Null),
            JsonValue::Bool(b) => Ok(StagedValue::Bool(b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(StagedValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(StagedValue::Float(f))
                } else {
                    Err(OutboxError::Encoding(format!(
                        "number {n} does not fit in i64 or f64"
                    )))
                }
            }
            JsonValue::String(s) => Ok(StagedValue::Str(s)),
            JsonValue::Array(_) => Err(OutboxError::Encoding(
                "array values are not JSON-scalars; outbox data must be a flat mapping".into(),
            )),
            JsonValue::Object(_) => Err(OutboxError::Encoding(
                "nested object values are not JSON-scalars; outbox data must be a flat mapping"
                    .into(),
            )),
        }
    }
}

fn encode_scalar(value: &StagedValue) -> Result<JsonValue, OutboxError> {
    Ok(match value {
        StagedValue::Null => JsonValue::Null,
        StagedValue::Bool(b) => JsonValue::Bool(*b),
        StagedValue::Int(i) => JsonValue::from(*i),
        StagedValue::Float(f) => {
            if f.is_nan() || f.is_infinite() {
                return Err(OutboxError::Encoding(format!(
                    "float {f} is not representable in JSON"
                )));
            }
            serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| OutboxError::Encoding(format!("float {f} is not representable in JSON")))?
        }
        StagedValue::Str(s) => JsonValue::String(s.clone()),
        // ISO-8601 (§4.2).
        StagedValue::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
        // Canonical hex-with-dashes, not the hyphen-less "simple" form.
        StagedValue::Uuid(u) => JsonValue::String(u.hyphenated().to_string()),
    })
}

/// Encode a staged message's data map into the `JSONB` payload stored on
/// the outbox row and later appended to the stream (§4.2, §6).
pub fn encode_payload(
    data: &std::collections::HashMap<String, StagedValue>,
) -> Result<JsonValue, OutboxError> {
    let mut out = Map::with_capacity(data.len());
    for (key, value) in data {
        out.insert(key.clone(), encode_scalar(value)?);
    }
    Ok(JsonValue::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_encode_as_iso8601() {
        let mut data = std::collections::HashMap::new();
        data.insert(
            "at".to_string(),
            StagedValue::Timestamp(DateTime::parse_from_rfc3339("2017-10-31T12:34:11.518Z")
                .unwrap()
                .with_timezone(&Utc)),
        );
        let encoded = encode_payload(&data).unwrap();
        assert_eq!(
            encoded["at"].as_str().unwrap(),
            "2017-10-31T12:34:11.518+00:00"
        );
    }

    #[test]
    fn uuids_encode_with_dashes() {
        let uid = Uuid::nil();
        let mut data = std::collections::HashMap::new();
        data.insert("id".to_string(), StagedValue::Uuid(uid));
        let encoded = encode_payload(&data).unwrap();
        assert_eq!(
            encoded["id"].as_str().unwrap(),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_encoding_raises_correct_type_error() {
        let err = StagedValue::try_from(serde_json::json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, OutboxError::Encoding(_)));

        let err = StagedValue::try_from(serde_json::json!({"nested": true})).unwrap_err();
        assert!(matches!(err, OutboxError::Encoding(_)));
    }

    #[test]
    fn nan_float_is_a_type_error() {
        let mut data = std::collections::HashMap::new();
        data.insert("n".to_string(), StagedValue::Float(f64::NAN));
        assert!(encode_payload(&data).is_err());
    }
}
