//! Backup agent storing archives and sidecars in one bucket prefix.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::TryStreamExt;
use futures::future::BoxFuture;

use plughub_app::ports::{BackupAgent, BackupAgentError, ByteStream};
use plughub_domain::backup::AgentBackup;

use crate::metadata;
use crate::store::{FileInfo, ObjectStore};

/// Largest archive accepted by a single-part B2 upload (5 GB).
pub const MAX_BACKUP_SIZE: u64 = 5 * 1000 * 1000 * 1000;

/// How long file and backup listings are reused.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// A backup whose archive and sidecar are both present.
#[derive(Debug, Clone)]
struct StoredBackup {
    backup: AgentBackup,
    archive: FileInfo,
    sidecar: FileInfo,
}

struct Cached<T> {
    at: Instant,
    value: T,
}

impl<T: Clone> Cached<T> {
    fn fresh(slot: &Option<Self>) -> Option<T> {
        slot.as_ref()
            .filter(|cached| cached.at.elapsed() < CACHE_TTL)
            .map(|cached| cached.value.clone())
    }
}

#[derive(Default)]
struct Caches {
    files: Option<Cached<Vec<FileInfo>>>,
    backups: Option<Cached<Vec<StoredBackup>>>,
}

/// [`BackupAgent`] over an [`ObjectStore`] bucket.
pub struct BackblazeAgent<S> {
    store: S,
    prefix: String,
    caches: Mutex<Caches>,
}

impl<S: ObjectStore> BackblazeAgent<S> {
    /// `prefix` is either empty or ends with `/`.
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            caches: Mutex::new(Caches::default()),
        }
    }

    fn caches(&self) -> std::sync::MutexGuard<'_, Caches> {
        self.caches.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn invalidate(&self) {
        let mut caches = self.caches();
        caches.files = None;
        caches.backups = None;
    }

    /// Drop deleted objects from the cached listing without refetching.
    fn forget(&self, names: &[&str]) {
        let mut caches = self.caches();
        if let Some(files) = caches.files.as_mut() {
            files
                .value
                .retain(|file| !names.contains(&file.file_name.as_str()));
        }
        caches.backups = None;
    }

    async fn files(&self) -> Result<Vec<FileInfo>, BackupAgentError> {
        let cached = Cached::fresh(&self.caches().files);
        if let Some(files) = cached {
            return Ok(files);
        }
        let files = self
            .store
            .list_files(&self.prefix)
            .await
            .map_err(|err| err.into_agent("Failed to list backups"))?;
        self.caches().files = Some(Cached {
            at: Instant::now(),
            value: files.clone(),
        });
        Ok(files)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, BackupAgentError> {
        let stream = self
            .store
            .download(name)
            .await
            .map_err(|err| err.into_agent(format!("Failed to read {name}")))?;
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        Ok(chunks.concat())
    }

    async fn stored_backups(&self) -> Result<Vec<StoredBackup>, BackupAgentError> {
        let cached = Cached::fresh(&self.caches().backups);
        if let Some(backups) = cached {
            return Ok(backups);
        }
        let files = self.files().await?;
        let mut backups = Vec::new();
        for sidecar in files
            .iter()
            .filter(|file| file.file_name.ends_with(metadata::METADATA_SUFFIX))
        {
            let Some(archive_name) = metadata::archive_name_for(&sidecar.file_name) else {
                continue;
            };
            let Some(archive) = files.iter().find(|file| file.file_name == archive_name) else {
                tracing::warn!(
                    metadata = %sidecar.file_name,
                    "found metadata file {} but no corresponding backup file",
                    sidecar.file_name
                );
                continue;
            };
            let parsed = self
                .read(&sidecar.file_name)
                .await
                .and_then(|bytes| metadata::parse_sidecar(&bytes))
                .and_then(|doc| metadata::backup_from_sidecar(doc, archive.content_length));
            match parsed {
                Ok(backup) => backups.push(StoredBackup {
                    backup,
                    archive: archive.clone(),
                    sidecar: sidecar.clone(),
                }),
                Err(err) => {
                    tracing::warn!(metadata = %sidecar.file_name, error = %err, "skipping unreadable backup metadata");
                }
            }
        }
        self.caches().backups = Some(Cached {
            at: Instant::now(),
            value: backups.clone(),
        });
        Ok(backups)
    }

    async fn find(&self, backup_id: &str) -> Result<StoredBackup, BackupAgentError> {
        self.stored_backups()
            .await?
            .into_iter()
            .find(|stored| stored.backup.backup_id == backup_id)
            .ok_or_else(|| BackupAgentError::NotFound(backup_id.to_string()))
    }

    /// Best-effort removal of a partially written archive.
    async fn cleanup(&self, name: &str) {
        let leftovers = match self.store.list_files(name).await {
            Ok(files) => files,
            Err(err) => {
                tracing::error!(name, error = %err, "Failed to clean up {name}. Manual intervention may be required");
                return;
            }
        };
        for file in leftovers.iter().filter(|file| file.file_name == name) {
            if let Err(err) = self.store.delete(file).await {
                tracing::error!(name, error = %err, "Failed to clean up {name}. Manual intervention may be required");
            }
        }
    }

    async fn upload(&self, stream: ByteStream, backup: AgentBackup) -> Result<(), BackupAgentError> {
        if backup.size > MAX_BACKUP_SIZE {
            return Err(BackupAgentError::agent(format!(
                "Backup size {} exceeds maximum allowed size of {MAX_BACKUP_SIZE} bytes",
                backup.size
            )));
        }
        let archive_name = metadata::archive_name(&self.prefix, &backup)?;
        let sidecar_name = metadata::metadata_name(&archive_name);
        let sidecar = metadata::sidecar_body(&backup)?;

        if let Err(err) = self.store.upload(&archive_name, backup.size, stream).await {
            tracing::error!(archive = %archive_name, error = %err, "backup upload failed");
            self.cleanup(&archive_name).await;
            self.invalidate();
            return Err(err.into_agent("Failed to upload backup"));
        }

        let length = sidecar.len() as u64;
        let body: ByteStream = Box::pin(futures::stream::once(async move {
            Ok(Bytes::from(sidecar))
        }));
        let result = self.store.upload(&sidecar_name, length, body).await;
        self.invalidate();
        match result {
            Ok(_) => {
                tracing::info!(backup_id = %backup.backup_id, archive = %archive_name, "backup uploaded");
                Ok(())
            }
            Err(err) => {
                tracing::error!(metadata = %sidecar_name, error = %err, "backup metadata upload failed");
                Err(err.into_agent("Failed to upload backup metadata"))
            }
        }
    }

    async fn delete(&self, backup_id: &str) -> Result<(), BackupAgentError> {
        let stored = self.find(backup_id).await?;
        self.store.delete(&stored.archive).await.map_err(|err| {
            if err.is_not_found() {
                BackupAgentError::NotFound(backup_id.to_string())
            } else {
                err.into_agent("Failed to delete backup")
            }
        })?;
        if let Err(err) = self.store.delete(&stored.sidecar).await {
            tracing::warn!(metadata = %stored.sidecar.file_name, error = %err, "metadata file could not be deleted");
        }
        self.forget(&[&stored.archive.file_name, &stored.sidecar.file_name]);
        tracing::info!(backup_id, "backup deleted");
        Ok(())
    }
}

impl<S: ObjectStore> BackupAgent for BackblazeAgent<S> {
    fn name(&self) -> &str {
        self.store.bucket_name()
    }

    fn list_backups(&self) -> BoxFuture<'_, Result<Vec<AgentBackup>, BackupAgentError>> {
        Box::pin(async move {
            let stored = self.stored_backups().await?;
            Ok(stored.into_iter().map(|stored| stored.backup).collect())
        })
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
            self.store
                .download(&stored.archive.file_name)
                .await
                .map_err(|err| {
                    if err.is_not_found() {
                        BackupAgentError::NotFound(backup_id.to_string())
                    } else {
                        err.into_agent("Failed to download backup")
                    }
                })
        })
    }

    fn delete_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackupAgentError>> {
        Box::pin(self.delete(backup_id))
    }
}
