//! String-keyed JSON maps used for flight input and working state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlightMapError {
    #[error("missing required key '{0}'")]
    Missing(String),

    #[error("key '{key}': {message}")]
    Serde { key: String, message: String },
}

/// Key-value map whose values are stored as JSON.
///
/// Values round-trip through serde so the map can be persisted verbatim as
/// part of a flight record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightMap(BTreeMap<String, JsonValue>);

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put<T>(&mut self, key: &str, value: &T) -> Result<(), FlightMapError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_value(value).map_err(|e| FlightMapError::Serde {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.0.insert(key.to_string(), encoded);
        Ok(())
    }

    /// Builder-style [`FlightMap::put`].
    pub fn with<T>(mut self, key: &str, value: &T) -> Result<Self, FlightMapError>
    where
        T: Serialize + ?Sized,
    {
        self.put(key, value)?;
        Ok(self)
    }

    /// Decode the value under `key`; `Ok(None)` if absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FlightMapError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| FlightMapError::Serde {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Decode the value under `key`, failing if it is absent.
    pub fn get_required<T: DeserializeOwned>(&self, key: &str) -> Result<T, FlightMapError> {
        self.get(key)?
            .ok_or_else(|| FlightMapError::Missing(key.to_string()))
    }

    pub fn get_raw(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_round_trip() {
        let map = FlightMap::new()
            .with("project_id", "wsm-123")
            .unwrap()
            .with("attempts", &3u32)
            .unwrap();

        assert_eq!(
            map.get::<String>("project_id").unwrap().as_deref(),
            Some("wsm-123")
        );
        assert_eq!(map.get_required::<u32>("attempts").unwrap(), 3);
        assert_eq!(map.get::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn required_keys_report_missing() {
        let map = FlightMap::new();
        assert_eq!(
            map.get_required::<String>("workspace_id"),
            Err(FlightMapError::Missing("workspace_id".to_string()))
        );
    }

    #[test]
    fn type_mismatch_is_a_serde_error() {
        let map = FlightMap::new().with("count", "not a number").unwrap();
        assert!(matches!(
            map.get::<u32>("count"),
            Err(FlightMapError::Serde { key, .. }) if key == "count"
        ));
    }
}
