//! Serialization framework for Cadence.
//!
//! Workflow inputs, results, signal payloads and activity arguments all
//! cross the host boundary as [`Payload`] values.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Encoded value passed between workflow logic, the host and callers.
pub type Payload = serde_json::Value;

/// Trait for data converters/serializers
pub trait DataConverter: Send + Sync {
    /// Encode a value to a payload
    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, EncodingError>;
    /// Decode a payload to a value
    fn decode<T: DeserializeOwned>(&self, payload: Payload) -> Result<T, EncodingError>;
}

/// Default JSON data converter
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataConverter;

impl DataConverter for JsonDataConverter {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, EncodingError> {
        serde_json::to_value(value).map_err(|e| EncodingError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, payload: Payload) -> Result<T, EncodingError> {
        serde_json::from_value(payload).map_err(|e| EncodingError::Deserialization(e.to_string()))
    }
}

/// Encode with the default converter.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, EncodingError> {
    JsonDataConverter.encode(value)
}

/// Decode with the default converter.
pub fn from_payload<T: DeserializeOwned>(payload: Payload) -> Result<T, EncodingError> {
    JsonDataConverter.decode(payload)
}

/// Encoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EncodingError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Named arguments captured from a synchronous signal invocation.
///
/// Ordered by name so that the encoded form is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalArgs(BTreeMap<String, Payload>);

impl SignalArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, encoding it with the default converter.
    pub fn with<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self, EncodingError> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn insert<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<(), EncodingError> {
        self.0.insert(name.into(), to_payload(value)?);
        Ok(())
    }

    /// Decode a named argument. `Ok(None)` if the argument was not supplied.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, EncodingError> {
        self.0
            .get(name)
            .cloned()
            .map(from_payload)
            .transpose()
    }

    pub fn raw(&self, name: &str) -> Option<&Payload> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Payload)> for SignalArgs {
    fn from_iter<I: IntoIterator<Item = (String, Payload)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn test_json_converter() {
        let order = Order {
            id: 7,
            sku: "widget".into(),
        };
        let payload = to_payload(&order).unwrap();
        assert_eq!(payload["sku"], "widget");
        let decoded: Order = from_payload(payload).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_decode_type_mismatch() {
        let err = from_payload::<u32>(serde_json::json!("not a number")).unwrap_err();
        assert!(matches!(err, EncodingError::Deserialization(_)));
    }

    #[test]
    fn test_signal_args() {
        let args = SignalArgs::new()
            .with("reason", &"customer request")
            .unwrap()
            .with("refund", &true)
            .unwrap();

        assert_eq!(args.len(), 2);
        assert_eq!(args.get::<bool>("refund").unwrap(), Some(true));
        assert_eq!(args.get::<String>("missing").unwrap(), None);
        assert!(args.get::<u32>("reason").is_err());

        let names: Vec<&str> = args.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["reason", "refund"]);

        let encoded = to_payload(&args).unwrap();
        assert_eq!(encoded, serde_json::json!({"reason": "customer request", "refund": true}));
    }
}
