//! Object naming and the `.metadata.json` sidecar format.
//!
//! ```text
//! {prefix}my_backup_2024-11-22_11.48_48727189.tar
//! {prefix}my_backup_2024-11-22_11.48_48727189.metadata.json
//! ```

use serde_json::{Map, Value};

use plughub_app::ports::BackupAgentError;
use plughub_domain::backup::AgentBackup;

pub const METADATA_VERSION: &str = "1";

const ARCHIVE_SUFFIX: &str = ".tar";
pub const METADATA_SUFFIX: &str = ".metadata.json";

/// Archive object name for `backup` under `prefix`.
///
/// # Errors
///
/// Returns an agent error when the backup date is not RFC 3339.
pub fn archive_name(prefix: &str, backup: &AgentBackup) -> Result<String, BackupAgentError> {
    let file_name = backup
        .suggested_filename()
        .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;
    Ok(format!("{prefix}{file_name}"))
}

/// Sidecar object name for an archive object name.
#[must_use]
pub fn metadata_name(archive_name: &str) -> String {
    let stem = archive_name
        .strip_suffix(ARCHIVE_SUFFIX)
        .unwrap_or(archive_name);
    format!("{stem}{METADATA_SUFFIX}")
}

/// Archive object name for a sidecar object name.
#[must_use]
pub fn archive_name_for(metadata_name: &str) -> Option<String> {
    metadata_name
        .strip_suffix(METADATA_SUFFIX)
        .map(|stem| format!("{stem}{ARCHIVE_SUFFIX}"))
}

/// Serialize the sidecar document for `backup`.
///
/// # Errors
///
/// Returns an agent error when serialization fails.
pub fn sidecar_body(backup: &AgentBackup) -> Result<Vec<u8>, BackupAgentError> {
    let body = serde_json::json!({
        "metadata_version": METADATA_VERSION,
        "backup_id": backup.backup_id,
        "backup_metadata": backup,
    });
    serde_json::to_vec(&body)
        .map_err(|err| BackupAgentError::with_source("Failed to serialize backup metadata", err))
}

/// Parse a sidecar into its JSON object.
///
/// # Errors
///
/// `Invalid JSON format` for unparsable bytes and
/// `JSON content is not a dictionary` for any other JSON value.
pub fn parse_sidecar(bytes: &[u8]) -> Result<Map<String, Value>, BackupAgentError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| BackupAgentError::with_source("Invalid JSON format", err))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(BackupAgentError::agent("JSON content is not a dictionary")),
    }
}

/// Build the backup described by a sidecar. `size` is the stored archive length.
///
/// # Errors
///
/// Returns an agent error when `backup_metadata` is missing or invalid.
pub fn backup_from_sidecar(
    mut sidecar: Map<String, Value>,
    size: u64,
) -> Result<AgentBackup, BackupAgentError> {
    let metadata = sidecar
        .remove("backup_metadata")
        .ok_or_else(|| BackupAgentError::agent("Missing backup_metadata"))?;
    let mut backup: AgentBackup = serde_json::from_value(metadata)
        .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;
    backup
        .validate()
        .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;
    backup.size = size;
    Ok(backup)
}
