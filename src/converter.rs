//! Data converter: stable serialize/deserialize of user payloads.
//!
//! Payloads (`input`/`result`) are opaque to every other component; only
//! user code and the converter ever interpret them.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Errors converting between user types and the wire payload format.
#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Converts between typed user values and the JSON payloads persisted in
/// history and carried across the wire.
///
/// A trait (rather than a free function) so hosts can swap in a different
/// wire format without touching the rest of the runtime; the default
/// [`JsonDataConverter`] is what every other component is written against.
pub trait DataConverter: Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Value, ConverterError>;
    fn deserialize<T: DeserializeOwned>(&self, value: Value) -> Result<T, ConverterError>;
}

/// The default converter: `serde_json::Value` as the stable wire shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataConverter;

impl DataConverter for JsonDataConverter {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Value, ConverterError> {
        serde_json::to_value(value).map_err(ConverterError::Serialize)
    }

    fn deserialize<T: DeserializeOwned>(&self, value: Value) -> Result<T, ConverterError> {
        serde_json::from_value(value).map_err(ConverterError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    #[test]
    fn round_trips_through_json() {
        let converter = JsonDataConverter;
        let value = Greeting { name: "World".into() };
        let encoded = converter.serialize(&value).unwrap();
        let decoded: Greeting = converter.deserialize(encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn deserialize_failure_is_reported() {
        let converter = JsonDataConverter;
        let result: Result<Greeting, _> = converter.deserialize(serde_json::json!(42));
        assert!(matches!(result, Err(ConverterError::Deserialize(_))));
    }
}
