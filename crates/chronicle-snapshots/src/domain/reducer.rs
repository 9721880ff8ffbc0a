//! State reducers turn event payloads into aggregate state.

use chronicle_core::error::StoreError;
use serde_json::{Map, Value};

/// Interprets event payloads.
///
/// Implementations must be deterministic: the same inputs always produce the
/// same bytes, so that replaying a history twice yields identical state.
pub trait StateReducer: Send + Sync + std::fmt::Debug {
    /// Opaque schema descriptor stored alongside each snapshot.
    fn schema(&self, aggregate_name: &str) -> Vec<u8>;

    /// Initial state established by a `Create` payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the payload cannot be decoded.
    fn create(&self, data: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// State after applying an `Update` diff to `state`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if either side cannot be decoded.
    fn update(&self, state: &[u8], diff: &[u8]) -> Result<Vec<u8>, StoreError>;
}

/// Treats payloads as JSON objects and updates as a shallow field merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergeReducer;

fn decode(bytes: &[u8]) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(StoreError::Serialization(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(StoreError::Serialization(err.to_string())),
    }
}

fn encode(fields: Map<String, Value>) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(&Value::Object(fields)).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl StateReducer for JsonMergeReducer {
    fn schema(&self, aggregate_name: &str) -> Vec<u8> {
        serde_json::json!({ "name": aggregate_name, "format": "json-merge" })
            .to_string()
            .into_bytes()
    }

    fn create(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        encode(decode(data)?)
    }

    fn update(&self, state: &[u8], diff: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut fields = decode(state)?;
        fields.extend(decode(diff)?);
        encode(fields)
    }
}
