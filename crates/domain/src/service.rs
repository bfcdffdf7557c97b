//! Service: a command routed to the integration owning an entity.
//!
//! Examples: `turn_on`, `volume_set`, `select_source`, `play_media`.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A request to run `service` against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Target entity, by `entity_id` (e.g. `media_player.kitchen`).
    pub entity_id: String,
    pub service: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ServiceCall {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            service: service.into(),
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Read a required parameter from `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the key is missing or has the wrong shape.
    pub fn param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, ValidationError> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| ValidationError::MissingField(key.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|err| ValidationError::invalid_field(key, err.to_string()))
    }

    /// Read an optional parameter from `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] when present with the wrong shape.
    pub fn param_opt<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ValidationError> {
        match self.data.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| ValidationError::invalid_field(key, err.to_string())),
        }
    }

    /// Error for a service the target entity does not support.
    #[must_use]
    pub fn unsupported(&self) -> ValidationError {
        ValidationError::UnsupportedService(self.service.clone())
    }
}
