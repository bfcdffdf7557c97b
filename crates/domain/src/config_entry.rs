//! Config entry: one persisted, user-created instance of an integration.
//!
//! A config entry is created by a user flow, mutated only by reauth/options
//! flows and lifecycle transitions, and destroyed when the user removes it.
//! Its `data` holds connection parameters, its `options` user preferences.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{SetupError, ValidationError};
use crate::id::EntryId;
use crate::time::{Timestamp, now};

/// JSON object holding entry data or options.
pub type EntryData = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    /// Setup failed with a transient error; another attempt is scheduled.
    SetupRetry,
    /// Setup failed permanently (auth or fatal); user action required.
    SetupError,
    UnloadInProgress,
    FailedUnload,
}

impl EntryState {
    /// Whether the entry currently owns a runtime handle.
    #[must_use]
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Stable string used in storage and the API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::SetupInProgress => "setup_in_progress",
            Self::Loaded => "loaded",
            Self::SetupRetry => "setup_retry",
            Self::SetupError => "setup_error",
            Self::UnloadInProgress => "unload_in_progress",
            Self::FailedUnload => "failed_unload",
        }
    }

    /// State an entry lands in after a failed setup.
    #[must_use]
    pub fn after_setup_failure(err: &SetupError) -> Self {
        if err.is_retryable() {
            Self::SetupRetry
        } else {
            Self::SetupError
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "not_loaded" => Self::NotLoaded,
            "setup_in_progress" => Self::SetupInProgress,
            "loaded" => Self::Loaded,
            "setup_retry" => Self::SetupRetry,
            "setup_error" => Self::SetupError,
            "unload_in_progress" => Self::UnloadInProgress,
            "failed_unload" => Self::FailedUnload,
            other => {
                return Err(ValidationError::invalid_field(
                    "state",
                    format!("unknown entry state {other:?}"),
                ));
            }
        })
    }
}

/// A persisted integration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: EntryId,
    /// Integration name (e.g. `"backblaze"`).
    pub domain: String,
    /// Stable identity within `domain`; two entries never share it.
    pub unique_id: Option<String>,
    pub title: String,
    pub data: EntryData,
    pub options: EntryData,
    pub state: EntryState,
    /// Last setup failure message, cleared once loaded.
    pub reason: Option<String>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl ConfigEntry {
    /// Start building a new [`ConfigEntry`].
    #[must_use]
    pub fn builder() -> ConfigEntryBuilder {
        ConfigEntryBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the domain or title is empty, or if a
    /// unique id is set but blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.domain.trim().is_empty() {
            return Err(ValidationError::EmptyDomain);
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self
            .unique_id
            .as_deref()
            .is_some_and(|uid| uid.trim().is_empty())
        {
            return Err(ValidationError::EmptyUniqueId);
        }
        Ok(())
    }

    /// Move to `state`, recording `reason` and bumping `modified_at`.
    pub fn set_state(&mut self, state: EntryState, reason: Option<String>) {
        self.state = state;
        self.reason = reason;
        self.modified_at = now();
    }

    /// Deserialize a required `data` field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] when absent and
    /// [`ValidationError::InvalidField`] when it has the wrong shape.
    pub fn data_field<T: DeserializeOwned>(&self, key: &str) -> Result<T, ValidationError> {
        read_field(&self.data, key)?.ok_or_else(|| ValidationError::MissingField(key.to_string()))
    }

    /// Deserialize an optional `data` field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] when present with the wrong shape.
    pub fn data_field_opt<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ValidationError> {
        read_field(&self.data, key)
    }

    /// Deserialize an `options` field, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] when present with the wrong shape.
    pub fn option_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ValidationError> {
        Ok(read_field(&self.options, key)?.unwrap_or(default))
    }
}

fn read_field<T: DeserializeOwned>(map: &EntryData, key: &str) -> Result<Option<T>, ValidationError> {
    match map.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| ValidationError::invalid_field(key, err.to_string())),
    }
}

/// Builder for [`ConfigEntry`].
#[derive(Debug, Default)]
pub struct ConfigEntryBuilder {
    entry_id: Option<EntryId>,
    domain: Option<String>,
    unique_id: Option<String>,
    title: Option<String>,
    data: EntryData,
    options: EntryData,
}

impl ConfigEntryBuilder {
    #[must_use]
    pub fn entry_id(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn data(mut self, data: EntryData) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn options(mut self, options: EntryData) -> Self {
        self.options = options;
        self
    }

    /// Build and validate the entry. New entries start `not_loaded`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when an invariant fails.
    pub fn build(self) -> Result<ConfigEntry, ValidationError> {
        let ts = now();
        let entry = ConfigEntry {
            entry_id: self.entry_id.unwrap_or_default(),
            domain: self.domain.unwrap_or_default(),
            unique_id: self.unique_id,
            title: self.title.unwrap_or_default(),
            data: self.data,
            options: self.options,
            state: EntryState::NotLoaded,
            reason: None,
            created_at: ts,
            modified_at: ts,
        };
        entry.validate()?;
        Ok(entry)
    }
}
