//! Backup metadata exchanged with backup agents.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::slug::slugify;

/// An add-on included in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub name: String,
    pub slug: String,
    pub version: String,
}

/// Metadata describing one backup archive as stored by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBackup {
    pub backup_id: String,
    pub name: String,
    /// RFC 3339 creation date.
    pub date: String,
    /// Archive length in bytes.
    pub size: u64,
    #[serde(default)]
    pub addons: Vec<AddonInfo>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub database_included: bool,
    #[serde(default)]
    pub homeassistant_included: bool,
    #[serde(default)]
    pub homeassistant_version: Option<String>,
    #[serde(default)]
    pub extra_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub protected: bool,
}

impl AgentBackup {
    /// Check the fields every agent relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the id or name is blank or the date
    /// is not RFC 3339.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backup_id.trim().is_empty() {
            return Err(ValidationError::MissingField("backup_id".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".into()));
        }
        DateTime::parse_from_rfc3339(&self.date)
            .map_err(|err| ValidationError::invalid_field("date", err.to_string()))?;
        Ok(())
    }

    /// File name agents use for the archive:
    /// `{slug(name)}_{date:%Y-%m-%d_%H.%M_%S%6f}.tar`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] when `date` is not RFC 3339.
    pub fn suggested_filename(&self) -> Result<String, ValidationError> {
        let date = DateTime::parse_from_rfc3339(&self.date)
            .map_err(|err| ValidationError::invalid_field("date", err.to_string()))?;
        Ok(format!(
            "{}_{}.tar",
            slugify(&self.name),
            date.format("%Y-%m-%d_%H.%M_%S%6f")
        ))
    }
}
