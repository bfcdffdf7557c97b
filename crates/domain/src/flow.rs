//! Flow: the outcome of one config-flow step.
//!
//! A flow collects connection parameters, validates them with one round
//! trip to the external system and either re-shows the form with an error
//! code, creates a config entry, or aborts with a reason.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::config_entry::ConfigEntry;

/// Which wizard step produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    User,
    Reauth,
}

/// User-facing error code shown next to a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowErrorCode {
    CannotConnect,
    InvalidAuth,
    Timeout,
    Unknown,
    /// Integration-specific code such as `invalid_bucket_name`.
    Custom(&'static str),
}

impl FlowErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CannotConnect => "cannot_connect",
            Self::InvalidAuth => "invalid_auth",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for FlowErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FlowErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A validation failure reported by an integration.
///
/// `field` is the form field the error belongs to, `"base"` for errors that
/// concern the whole form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {code}")]
pub struct FlowError {
    pub field: &'static str,
    pub code: FlowErrorCode,
}

impl FlowError {
    /// Error attached to the whole form.
    #[must_use]
    pub fn base(code: FlowErrorCode) -> Self {
        Self {
            field: "base",
            code,
        }
    }

    /// Error attached to a single field.
    #[must_use]
    pub fn field(field: &'static str, code: FlowErrorCode) -> Self {
        Self { field, code }
    }
}

/// Why a flow stopped without creating an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Another entry of the same integration already has this unique id.
    AlreadyConfigured,
    /// Reauthentication succeeded and the entry was reloaded.
    ReauthSuccessful,
    /// Reauth credentials belong to a different account or device.
    UniqueIdMismatch,
}

/// Result of submitting a flow step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show the form again with errors.
    Form {
        step_id: FlowStep,
        errors: BTreeMap<&'static str, FlowErrorCode>,
    },
    /// A config entry was created.
    CreateEntry { entry: Box<ConfigEntry> },
    /// The flow ended.
    Abort { reason: AbortReason },
}

impl FlowResult {
    /// Re-show `step` with a single error.
    #[must_use]
    pub fn form_error(step: FlowStep, error: &FlowError) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(error.field, error.code);
        Self::Form {
            step_id: step,
            errors,
        }
    }

    #[must_use]
    pub fn abort(reason: AbortReason) -> Self {
        Self::Abort { reason }
    }
}
