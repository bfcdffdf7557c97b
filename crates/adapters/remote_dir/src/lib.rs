//! # plughub-adapter-remote-dir
//!
//! Backup agent writing archives into a directory with the SFTP backup
//! layout: `{backup_id}.tar` next to a hidden
//! `.{backup_id}_hass_backup_metadata.json`.
//!
//! The directory is reached through the [`RemoteFs`] port. An entry with a
//! `host` goes through [`SftpFs`] and logs in with a password or a private
//! key. Without one, the integration's own transport is used, [`LocalFs`]
//! by default, which covers local disks and network mounts.

mod agent;
mod fs;
mod sftp;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use plughub_app::ports::{BackupAgent, EntityContext, Integration, ValidatedEntry};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::service::ServiceCall;
use serde_json::Value;

pub use agent::{MetadataFile, RemoteDirAgent, archive_file_name, metadata_file_name};
pub use fs::{DirEntry, FileStream, LocalFs, RemoteFs};
pub use sftp::{DEFAULT_PORT, SftpFs, SshAuth, SshError, SshTarget};

pub const DOMAIN: &str = "remote_dir";

const LOCATION: &str = "backup_location";
const HOST: &str = "host";
const PORT: &str = "port";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const PRIVATE_KEY: &str = "private_key";
const PASSPHRASE: &str = "private_key_passphrase";

const LOCATION_INVALID: FlowErrorCode = FlowErrorCode::Custom("backup_location_invalid");
const KEY_OR_PASSWORD_NEEDED: FlowErrorCode = FlowErrorCode::Custom("key_or_password_needed");

pub struct RemoteDirRuntime {
    agent: Arc<dyn BackupAgent>,
}

/// Directory backup integration. Local entries go through `F`.
#[derive(Debug, Clone, Default)]
pub struct RemoteDirIntegration<F = LocalFs> {
    fs: F,
}

impl<F: RemoteFs + Clone> RemoteDirIntegration<F> {
    #[must_use]
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

fn text<'a>(input: &'a EntryData, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn port(input: &EntryData) -> Result<u16, FlowError> {
    let invalid = || FlowError::field(PORT, FlowErrorCode::Unknown);
    let port = match input.get(PORT) {
        None | Some(Value::Null) => return Ok(DEFAULT_PORT),
        Some(Value::Number(port)) => port.as_u64().and_then(|port| u16::try_from(port).ok()),
        Some(Value::String(port)) => port.trim().parse().ok(),
        Some(_) => None,
    };
    port.filter(|port| *port != 0).ok_or_else(invalid)
}

/// SSH target of an entry, `None` when the directory is local.
fn ssh_target(input: &EntryData) -> Result<Option<SshTarget>, FlowError> {
    let Some(host) = text(input, HOST) else {
        return Ok(None);
    };
    let port = port(input)?;
    let username = text(input, USERNAME)
        .ok_or(FlowError::field(USERNAME, FlowErrorCode::Unknown))?
        .to_string();
    let private_key = input
        .get(PRIVATE_KEY)
        .and_then(Value::as_str)
        .filter(|pem| !pem.trim().is_empty());
    let auth = match (private_key, text(input, PASSWORD)) {
        (Some(pem), _) => SshAuth::PrivateKey {
            pem: pem.to_string(),
            passphrase: text(input, PASSPHRASE).map(ToString::to_string),
        },
        (None, Some(password)) => SshAuth::Password(password.to_string()),
        (None, None) => return Err(FlowError::base(KEY_OR_PASSWORD_NEEDED)),
    };
    Ok(Some(SshTarget {
        host: host.to_string(),
        port,
        username,
        auth,
    }))
}

fn flow_error(err: &SshError) -> FlowError {
    match err {
        SshError::Connect { .. } | SshError::Handshake(_) => {
            FlowError::base(FlowErrorCode::CannotConnect)
        }
        SshError::Auth(_) => FlowError::base(FlowErrorCode::InvalidAuth),
        SshError::NotADirectory(_) | SshError::Sftp(_) | SshError::Io(_) => {
            FlowError::field(LOCATION, LOCATION_INVALID)
        }
    }
}

fn setup_error(err: &SshError) -> SetupError {
    match err {
        SshError::Auth(_) => SetupError::AuthFailed(err.to_string()),
        _ => SetupError::NotReady(err.to_string()),
    }
}

fn entry_data(target: &SshTarget, location: &str) -> EntryData {
    let mut data = EntryData::new();
    data.insert(LOCATION.into(), location.into());
    data.insert(HOST.into(), target.host.clone().into());
    data.insert(PORT.into(), target.port.into());
    data.insert(USERNAME.into(), target.username.clone().into());
    match &target.auth {
        SshAuth::Password(password) => {
            data.insert(PASSWORD.into(), password.clone().into());
        }
        SshAuth::PrivateKey { pem, passphrase } => {
            data.insert(PRIVATE_KEY.into(), pem.clone().into());
            if let Some(passphrase) = passphrase {
                data.insert(PASSPHRASE.into(), passphrase.clone().into());
            }
        }
    }
    data
}

impl<F: RemoteFs + Clone> Integration for RemoteDirIntegration<F> {
    type Runtime = RemoteDirRuntime;

    fn domain(&self) -> &'static str {
        DOMAIN
    }

    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let location =
            text(input, LOCATION).ok_or(FlowError::field(LOCATION, LOCATION_INVALID))?;

        if let Some(target) = ssh_target(input)? {
            let canonical = SftpFs::new(target.clone())
                .check_location(Path::new(location))
                .await
                .map_err(|err| {
                    tracing::warn!(host = %target.host, location, error = %err, "sftp location rejected");
                    flow_error(&err)
                })?;
            let canonical = canonical.display().to_string();
            return Ok(ValidatedEntry {
                title: format!("{}@{}:{canonical}", target.username, target.host),
                unique_id: Some(format!(
                    "{}@{}:{}:{canonical}",
                    target.username, target.host, target.port
                )),
                data: entry_data(&target, &canonical),
            });
        }

        let canonical = self.fs.probe(&PathBuf::from(location)).await.map_err(|err| {
            tracing::warn!(location, error = %err, "backup location rejected");
            FlowError::field(LOCATION, LOCATION_INVALID)
        })?;
        let canonical = canonical.display().to_string();

        let mut data = EntryData::new();
        data.insert(LOCATION.into(), canonical.clone().into());
        Ok(ValidatedEntry {
            title: canonical.clone(),
            unique_id: Some(canonical),
            data,
        })
    }

    #[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry<C>(&self, entry: &ConfigEntry, _ctx: C) -> Result<Self::Runtime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let location: String = entry
            .data_field(LOCATION)
            .map_err(|err| SetupError::Fatal(err.to_string()))?;
        let target = ssh_target(&entry.data).map_err(|err| SetupError::Fatal(err.to_string()))?;

        let agent: Arc<dyn BackupAgent> = match target {
            Some(target) => {
                let fs = SftpFs::new(target);
                let location = fs
                    .check_location(Path::new(&location))
                    .await
                    .map_err(|err| setup_error(&err))?;
                tracing::info!(host = %fs.target().host, location = %location.display(), "sftp backup directory ready");
                Arc::new(RemoteDirAgent::new(fs, location))
            }
            None => {
                let location = self
                    .fs
                    .probe(&PathBuf::from(&location))
                    .await
                    .map_err(|err| SetupError::NotReady(format!("{location}: {err}")))?;
                tracing::info!(location = %location.display(), "backup directory ready");
                Arc::new(RemoteDirAgent::new(self.fs.clone(), location))
            }
        };
        Ok(RemoteDirRuntime { agent })
    }

    async fn unload_entry(&self, _runtime: Arc<Self::Runtime>) -> Result<(), PlugHubError> {
        Ok(())
    }

    async fn handle_service_call(
        &self,
        _runtime: &Self::Runtime,
        _entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        Err(call.unsupported().into())
    }

    fn backup_agent(
        &self,
        runtime: &Arc<Self::Runtime>,
        _entry: &ConfigEntry,
    ) -> Option<Arc<dyn BackupAgent>> {
        Some(Arc::clone(&runtime.agent))
    }
}
