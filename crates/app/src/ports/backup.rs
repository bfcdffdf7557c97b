//! Backup agent port: the contract integrations implement to store backups.
//!
//! The trait is dyn-compatible (boxed futures) because agents from different
//! integrations live side by side in the
//! [`BackupAgentRegistry`](crate::backup_registry::BackupAgentRegistry).

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use plughub_domain::backup::AgentBackup;
use plughub_domain::error::{NotFoundError, PlugHubError};

/// Archive bytes flowing into or out of an agent.
pub type ByteStream = BoxStream<'static, Result<Bytes, BackupAgentError>>;

/// Single error type every agent reports.
#[derive(Debug, thiserror::Error)]
pub enum BackupAgentError {
    /// No complete archive + metadata pair exists for this id.
    #[error("backup {0} not found")]
    NotFound(String),

    /// Any failure of the underlying store, with a user-facing message.
    #[error("{message}")]
    Agent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BackupAgentError {
    /// Agent error without an underlying cause.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
            source: None,
        }
    }

    /// Agent error wrapping the store's own error.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Agent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<BackupAgentError> for PlugHubError {
    fn from(err: BackupAgentError) -> Self {
        match err {
            BackupAgentError::NotFound(id) => NotFoundError {
                entity: "Backup",
                id,
            }
            .into(),
            other => PlugHubError::integration(other),
        }
    }
}

/// A remote store holding backup archives and their metadata.
pub trait BackupAgent: Send + Sync {
    /// Display name of the store (bucket, directory, …).
    fn name(&self) -> &str;

    /// Every backup with both an archive and readable metadata.
    fn list_backups(&self) -> BoxFuture<'_, Result<Vec<AgentBackup>, BackupAgentError>>;

    /// Metadata of one backup.
    ///
    /// Returns [`BackupAgentError::NotFound`] when the archive or its
    /// metadata is missing.
    fn get_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<AgentBackup, BackupAgentError>>;

    /// Store `stream` as the archive for `backup`, then its metadata.
    fn upload_backup(
        &self,
        stream: ByteStream,
        backup: AgentBackup,
    ) -> BoxFuture<'_, Result<(), BackupAgentError>>;

    /// Stream the archive bytes back.
    fn download_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<ByteStream, BackupAgentError>>;

    /// Remove the archive and its metadata.
    fn delete_backup<'a>(&'a self, backup_id: &'a str)
    -> BoxFuture<'a, Result<(), BackupAgentError>>;
}
