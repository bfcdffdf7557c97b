//! Backup agent over a [`RemoteFs`] directory.
//!
//! ```text
//! {location}/{backup_id}.tar
//! {location}/.{backup_id}_hass_backup_metadata.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use plughub_app::ports::{BackupAgent, BackupAgentError, ByteStream};
use plughub_domain::backup::AgentBackup;

use crate::fs::{DirEntry, RemoteFs};

const METADATA_PREFIX: &str = ".";
const METADATA_SUFFIX: &str = "_hass_backup_metadata.json";

/// Content of a metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFile {
    /// Where the archive was written.
    pub file_path: String,
    pub metadata: AgentBackup,
}

#[must_use]
pub fn archive_file_name(backup_id: &str) -> String {
    format!("{backup_id}.tar")
}

#[must_use]
pub fn metadata_file_name(backup_id: &str) -> String {
    format!("{METADATA_PREFIX}{backup_id}{METADATA_SUFFIX}")
}

fn is_metadata_file(name: &str) -> bool {
    name.len() > METADATA_PREFIX.len() + METADATA_SUFFIX.len()
        && name.starts_with(METADATA_PREFIX)
        && name.ends_with(METADATA_SUFFIX)
}

fn check_backup_id(backup_id: &str) -> Result<(), BackupAgentError> {
    let invalid = backup_id.is_empty()
        || backup_id == "."
        || backup_id == ".."
        || backup_id.contains(['/', '\\']);
    if invalid {
        return Err(BackupAgentError::agent(format!("Invalid backup id {backup_id:?}")));
    }
    Ok(())
}

/// A backup whose archive and metadata are both present.
struct StoredBackup {
    backup: AgentBackup,
    archive: PathBuf,
    metadata: PathBuf,
}

/// [`BackupAgent`] writing into one directory.
pub struct RemoteDirAgent<F> {
    fs: F,
    location: PathBuf,
    name: String,
}

impl<F: RemoteFs> RemoteDirAgent<F> {
    pub fn new(fs: F, location: impl Into<PathBuf>) -> Self {
        let location = location.into();
        Self {
            fs,
            name: location.display().to_string(),
            location,
        }
    }

    async fn entries(&self) -> Result<Vec<DirEntry>, BackupAgentError> {
        self.fs
            .list(&self.location)
            .await
            .map_err(|err| BackupAgentError::with_source("Failed to list backups", err))
    }

    async fn read_metadata(&self, path: &Path) -> Result<MetadataFile, BackupAgentError> {
        let bytes = self.fs.read(path).await.map_err(|err| {
            BackupAgentError::with_source(format!("Failed to read {}", path.display()), err)
        })?;
        let file: MetadataFile = serde_json::from_slice(&bytes)
            .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;
        file.metadata
            .validate()
            .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;
        Ok(file)
    }

    /// Pair a metadata file with its archive in `entries`.
    async fn stored(
        &self,
        entries: &[DirEntry],
        metadata_name: &str,
    ) -> Result<Option<StoredBackup>, BackupAgentError> {
        let metadata = self.location.join(metadata_name);
        let file = self.read_metadata(&metadata).await?;
        let archive_name = Path::new(&file.file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .map_or_else(|| archive_file_name(&file.metadata.backup_id), ToString::to_string);
        let Some(archive) = entries.iter().find(|entry| entry.name == archive_name) else {
            tracing::warn!(
                metadata = %metadata.display(),
                "found metadata file {metadata_name} but no corresponding backup file"
            );
            return Ok(None);
        };
        let mut backup = file.metadata;
        backup.size = archive.size;
        Ok(Some(StoredBackup {
            backup,
            archive: self.location.join(&archive.name),
            metadata,
        }))
    }

    async fn find(&self, backup_id: &str) -> Result<StoredBackup, BackupAgentError> {
        check_backup_id(backup_id)?;
        let entries = self.entries().await?;
        let metadata_name = metadata_file_name(backup_id);
        if !entries.iter().any(|entry| entry.name == metadata_name) {
            return Err(BackupAgentError::NotFound(backup_id.to_string()));
        }
        self.stored(&entries, &metadata_name)
            .await?
            .filter(|stored| stored.backup.backup_id == backup_id)
            .ok_or_else(|| BackupAgentError::NotFound(backup_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<AgentBackup>, BackupAgentError> {
        let entries = self.entries().await?;
        let mut backups = Vec::new();
        for entry in entries.iter().filter(|entry| is_metadata_file(&entry.name)) {
            match self.stored(&entries, &entry.name).await {
                Ok(Some(stored)) => backups.push(stored.backup),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(metadata = %entry.name, error = %err, "skipping unreadable backup metadata");
                }
            }
        }
        backups.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(backups)
    }

    async fn remove_partial(&self, path: &Path) {
        match self.fs.remove(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::error!(
                path = %path.display(),
                error = %err,
                "Failed to clean up {}. Manual intervention may be required",
                path.display()
            ),
        }
    }

    #[tracing::instrument(skip_all, fields(backup_id = %backup.backup_id))]
    async fn upload(&self, stream: ByteStream, mut backup: AgentBackup) -> Result<(), BackupAgentError> {
        check_backup_id(&backup.backup_id)?;
        backup
            .validate()
            .map_err(|err| BackupAgentError::with_source("Invalid backup metadata", err))?;

        let archive = self.location.join(archive_file_name(&backup.backup_id));
        let stream = stream.map_err(io::Error::other).boxed();
        match self.fs.write_stream(&archive, stream).await {
            Ok(written) => backup.size = written,
            Err(err) => {
                tracing::error!(archive = %archive.display(), error = %err, "backup upload failed");
                self.remove_partial(&archive).await;
                return Err(BackupAgentError::with_source("Failed to upload backup", err));
            }
        }

        let metadata = self.location.join(metadata_file_name(&backup.backup_id));
        let body = serde_json::to_vec_pretty(&MetadataFile {
            file_path: archive.display().to_string(),
            metadata: backup,
        })
        .map_err(|err| BackupAgentError::with_source("Failed to serialize backup metadata", err))?;
        self.fs.write(&metadata, body).await.map_err(|err| {
            tracing::error!(metadata = %metadata.display(), error = %err, "backup metadata upload failed");
            BackupAgentError::with_source("Failed to upload backup metadata", err)
        })?;
        tracing::info!(archive = %archive.display(), "backup uploaded");
        Ok(())
    }

    async fn delete(&self, backup_id: &str) -> Result<(), BackupAgentError> {
        let stored = self.find(backup_id).await?;
        self.fs
            .remove(&stored.archive)
            .await
            .map_err(|err| BackupAgentError::with_source("Failed to delete backup", err))?;
        self.fs
            .remove(&stored.metadata)
            .await
            .map_err(|err| BackupAgentError::with_source("Failed to delete backup metadata", err))?;
        tracing::info!(backup_id, "backup deleted");
        Ok(())
    }
}

impl<F: RemoteFs> BackupAgent for RemoteDirAgent<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_backups(&self) -> BoxFuture<'_, Result<Vec<AgentBackup>, BackupAgentError>> {
        Box::pin(self.list())
    }

    fn get_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<AgentBackup, BackupAgentError>> {
        Box::pin(async move { Ok(self.find(backup_id).await?.backup) })
    }

    fn upload_backup(
        &self,
        stream: ByteStream,
        backup: AgentBackup,
    ) -> BoxFuture<'_, Result<(), BackupAgentError>> {
        Box::pin(self.upload(stream, backup))
    }

    fn download_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<ByteStream, BackupAgentError>> {
        Box::pin(async move {
            let stored = self.find(backup_id).await?;
            let stream = self.fs.open(&stored.archive).await.map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    BackupAgentError::NotFound(backup_id.to_string())
                } else {
                    BackupAgentError::with_source("Failed to download backup", err)
                }
            })?;
            Ok(stream
                .map_err(|err| BackupAgentError::with_source("Failed to read backup", err))
                .boxed())
        })
    }

    fn delete_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackupAgentError>> {
        Box::pin(self.delete(backup_id))
    }
}
